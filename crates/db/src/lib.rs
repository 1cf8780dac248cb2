pub mod attachments;
pub mod connection;
pub mod migrations;
pub mod store;

pub use attachments::LocalAttachmentStore;
pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use store::SqlRecordStore;

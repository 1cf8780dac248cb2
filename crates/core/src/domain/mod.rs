pub mod customer;
pub mod job;
pub mod lead;
pub mod member;
pub mod organization;
pub mod quote;
pub mod settings;

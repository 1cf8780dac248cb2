pub mod attachments;
pub mod audit;
pub mod capability;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod gateway;
pub mod locks;
pub mod platform;
pub mod pricing;
pub mod provisioning;
pub mod store;
pub mod tenant;

pub use attachments::{AttachmentError, AttachmentStore, InMemoryAttachmentStore, StoredPath};
pub use audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
    TracingAuditSink,
};
pub use capability::{
    Capability, CapabilityCategory, CapabilityEngine, CapabilityMap, CategoryDefaults,
    RoleProfile,
};
pub use config::{AppConfig, ConfigError, LoadOptions};
pub use domain::customer::{Customer, CustomerId};
pub use domain::job::{Job, JobId, JobStatus};
pub use domain::lead::{Lead, LeadId, LeadStatus, NewLead};
pub use domain::member::{Availability, Member, MemberId, MemberRole, UserId};
pub use domain::organization::{OrgId, Organization, PlanTier};
pub use domain::quote::{Quote, QuoteDraft, QuoteId, QuoteItem, QuoteStatus};
pub use domain::settings::Settings;
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{
    CascadeStep, CloseLostReport, CloseWonReport, DealOrchestrator, ImportSummary, LossReason,
};
pub use gateway::{Collection, Entity, EntityGateway};
pub use platform::PlatformAdmin;
pub use provisioning::{OwnerSignup, ProvisionedTenant, TenantProvisioner};
pub use store::{Document, Filter, InMemoryRecordStore, RecordStore, SortKey, StoreError};
pub use tenant::{Actor, AppRole, Session, TenantContext, TenantResolver};

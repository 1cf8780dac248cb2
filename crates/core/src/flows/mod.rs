pub mod cascade;
pub mod engine;
pub mod import;
pub mod leads;
pub mod orchestrator;
pub mod staff;
pub mod states;

pub use cascade::{CascadeKind, CascadeRun, CascadeStatus, CascadeStep, NewCascadeRun};
pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, LeadFlow};
pub use import::{ImportFailure, ImportSummary};
pub use leads::{AvailabilityReport, CallOutcome};
pub use orchestrator::{
    CloseLostReport, CloseWonReport, DealOrchestrator, LossReason, QuoteDocument,
};
pub use states::{LeadAction, LeadEvent, TransitionOutcome};

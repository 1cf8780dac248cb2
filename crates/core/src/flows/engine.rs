use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::lead::LeadStatus;
use crate::flows::states::{LeadAction, LeadEvent, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> LeadStatus;
    fn transition(
        &self,
        current: LeadStatus,
        event: LeadEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Sales pipeline for a single lead.
#[derive(Clone, Debug, Default)]
pub struct LeadFlow;

impl FlowDefinition for LeadFlow {
    fn initial_state(&self) -> LeadStatus {
        LeadStatus::New
    }

    fn transition(
        &self,
        current: LeadStatus,
        event: LeadEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_lead(current, event)
    }
}

#[derive(Clone, Debug)]
pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> LeadStatus {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: LeadStatus,
        event: LeadEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: LeadStatus,
        event: LeadEvent,
        lead_id: &str,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    audit
                        .event(
                            Some(lead_id.to_owned()),
                            "lead.transition_applied",
                            AuditCategory::Lifecycle,
                            AuditOutcome::Success,
                        )
                        .with_metadata("from", outcome.from.as_str())
                        .with_metadata("to", outcome.to.as_str())
                        .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event(
                            Some(lead_id.to_owned()),
                            "lead.transition_rejected",
                            AuditCategory::Lifecycle,
                            AuditOutcome::Rejected,
                        )
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<LeadFlow> {
    fn default() -> Self {
        Self::new(LeadFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid lead transition from {state:?} using event {event:?}")]
    InvalidTransition { state: LeadStatus, event: LeadEvent },
}

fn transition_lead(
    current: LeadStatus,
    event: LeadEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use LeadAction::{
        AssignMember, ClearRejectionReason, IncrementCallCount, LinkQuote, RecordActualValue,
        RecordFollowUp, RecordRejectionReason,
    };
    use LeadEvent::{
        CallLogged, DealLost, DealWon, FollowUpScheduled, MeetingScheduled, NoAnswer,
        QueuedForAssignment, QuoteApproved, QuoteCreated, Reopened, WorkerAssigned,
    };
    use LeadStatus::{Assigned, InProgress, Lost, MeetingHeld, New, Won, WaitingForAssignment};

    let open = !current.is_closed();
    let (to, actions) = match (current, event) {
        (New, CallLogged) => (InProgress, vec![IncrementCallCount]),
        (state, CallLogged) if open => (state, vec![IncrementCallCount]),
        (_, NoAnswer) if open => (LeadStatus::NoAnswer, vec![IncrementCallCount]),
        (_, FollowUpScheduled) if open => (LeadStatus::FollowUp, vec![RecordFollowUp]),
        (_, MeetingScheduled) if open => (LeadStatus::MeetingScheduled, vec![RecordFollowUp]),
        (Lost, QuoteCreated) => (MeetingHeld, vec![LinkQuote, ClearRejectionReason]),
        (_, QuoteCreated) if open => (MeetingHeld, vec![LinkQuote]),
        (_, QuoteApproved) if open => (LeadStatus::QuoteApproved, vec![LinkQuote]),
        (Lost, DealWon) => (Won, vec![RecordActualValue, ClearRejectionReason]),
        (_, DealWon) => (Won, vec![RecordActualValue]),
        (_, DealLost) if current != Won => (Lost, vec![RecordRejectionReason]),
        (_, QueuedForAssignment) if open => (WaitingForAssignment, Vec::new()),
        (WaitingForAssignment, WorkerAssigned) => (Assigned, vec![AssignMember]),
        (Lost, Reopened) => (New, vec![ClearRejectionReason]),
        _ => return Err(FlowTransitionError::InvalidTransition { state: current, event }),
    };

    Ok(TransitionOutcome { from: current, to, event, actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::lead::LeadStatus;
    use crate::flows::engine::{FlowDefinition, FlowEngine, FlowTransitionError, LeadFlow};
    use crate::flows::states::{LeadAction, LeadEvent};

    #[test]
    fn pipeline_happy_path_reaches_won() {
        let engine = FlowEngine::new(LeadFlow);
        let mut state = engine.initial_state();

        for (event, expected) in [
            (LeadEvent::CallLogged, LeadStatus::InProgress),
            (LeadEvent::MeetingScheduled, LeadStatus::MeetingScheduled),
            (LeadEvent::QuoteCreated, LeadStatus::MeetingHeld),
            (LeadEvent::QuoteApproved, LeadStatus::QuoteApproved),
            (LeadEvent::DealWon, LeadStatus::Won),
        ] {
            state = engine.apply(state, event).expect("transition").to;
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn repeated_calls_keep_status_but_count() {
        let engine = FlowEngine::default();
        let outcome = engine.apply(LeadStatus::MeetingScheduled, LeadEvent::CallLogged).expect("call");
        assert!(!outcome.changes_status());
        assert!(outcome.requires(LeadAction::IncrementCallCount));
    }

    #[test]
    fn won_is_terminal_except_for_repeat_win() {
        let engine = FlowEngine::default();
        assert!(engine.apply(LeadStatus::Won, LeadEvent::DealWon).is_ok());
        for event in [LeadEvent::CallLogged, LeadEvent::QuoteCreated, LeadEvent::DealLost, LeadEvent::Reopened] {
            let error = engine.apply(LeadStatus::Won, event).expect_err("won is final");
            assert!(matches!(error, FlowTransitionError::InvalidTransition { state: LeadStatus::Won, .. }));
        }
    }

    #[test]
    fn lost_leads_reopen_through_a_new_quote() {
        let engine = FlowEngine::default();
        let outcome = engine.apply(LeadStatus::Lost, LeadEvent::QuoteCreated).expect("reopen");
        assert_eq!(outcome.to, LeadStatus::MeetingHeld);
        assert!(outcome.requires(LeadAction::ClearRejectionReason));
    }

    #[test]
    fn a_later_win_overrides_an_earlier_loss() {
        let engine = FlowEngine::default();
        let outcome = engine.apply(LeadStatus::Lost, LeadEvent::DealWon).expect("win after loss");
        assert_eq!(outcome.to, LeadStatus::Won);
        assert!(outcome.requires(LeadAction::RecordActualValue));
        assert!(outcome.requires(LeadAction::ClearRejectionReason));
    }

    #[test]
    fn only_waiting_leads_can_be_assigned_from_the_queue() {
        let engine = FlowEngine::default();
        assert!(engine.apply(LeadStatus::WaitingForAssignment, LeadEvent::WorkerAssigned).is_ok());
        assert!(engine.apply(LeadStatus::New, LeadEvent::WorkerAssigned).is_err());
        assert_eq!(LeadFlow.initial_state(), LeadStatus::New);
    }

    #[test]
    fn transitions_emit_audit_events() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(None, "req-42", "user:u-1");

        engine
            .apply_with_audit(LeadStatus::New, LeadEvent::CallLogged, "lead-1", &sink, &audit)
            .expect("transition");
        let _ = engine.apply_with_audit(LeadStatus::Won, LeadEvent::Reopened, "lead-1", &sink, &audit);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "lead.transition_applied");
        assert_eq!(events[0].subject_id.as_deref(), Some("lead-1"));
        assert_eq!(events[1].event_type, "lead.transition_rejected");
    }
}

use super::step::StepOutcome;
use super::timer::TimerPayload;

/// Inbound events of a workflow instance.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent<C> {
    /// External command.
    Command(C),
    /// Result of a dispatched step attempt.
    StepCompleted(StepCompletion),
    /// A scheduled timer fired.
    TimerFired(TimerFired),
}

/// Completion of one step attempt, tagged with its fencing token.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCompletion {
    pub step: String,
    pub attempt: u64,
    pub outcome: StepOutcome,
}

impl StepCompletion {
    pub fn new(step: impl Into<String>, attempt: u64, outcome: StepOutcome) -> Self {
        Self {
            step: step.into(),
            attempt,
            outcome,
        }
    }
}

/// A fired timer.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerFired {
    pub name: String,
    pub payload: TimerPayload,
}

use kawait_condition::ConditionError;
use kawait_core::{ContextError, ResourceSnapshot};

/// Errors that carry the last-known state of the awaited object, so callers
/// can checkpoint partial progress on failure.
pub trait PartialObject {
    fn object(&self) -> Option<&ResourceSnapshot>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AwaitError {
    #[error("missing condition")]
    MissingCondition,
    #[error("{source}")]
    Condition {
        #[source]
        source: ConditionError,
        object: ResourceSnapshot,
    },
    /// The wait ended before the condition held. `cause` is `None` for a
    /// timeout.
    #[error("{}", interrupted_message(.cause))]
    Interrupted { cause: Option<ContextError>, object: ResourceSnapshot },
}

fn interrupted_message(cause: &Option<ContextError>) -> String {
    match cause {
        Some(err) => err.to_string(),
        None => "timed out waiting for the condition".to_string(),
    }
}

impl AwaitError {
    pub fn object(&self) -> Option<&ResourceSnapshot> {
        match self {
            AwaitError::MissingCondition => None,
            AwaitError::Condition { object, .. } | AwaitError::Interrupted { object, .. } => Some(object),
        }
    }

    pub fn is_interrupted(&self) -> bool { matches!(self, AwaitError::Interrupted { .. }) }

    pub(crate) fn outcome(&self) -> &'static str {
        match self {
            AwaitError::MissingCondition => "misconfigured",
            AwaitError::Condition { .. } => "failed",
            AwaitError::Interrupted { cause: None, .. } => "timeout",
            AwaitError::Interrupted { cause: Some(_), .. } => "cancelled",
        }
    }
}

impl PartialObject for AwaitError {
    fn object(&self) -> Option<&ResourceSnapshot> { AwaitError::object(self) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_messages() {
        let timeout = AwaitError::Interrupted { cause: None, object: ResourceSnapshot::default() };
        assert_eq!(timeout.to_string(), "timed out waiting for the condition");
        let cancelled = AwaitError::Interrupted { cause: Some(ContextError::Canceled), object: ResourceSnapshot::default() };
        assert_eq!(cancelled.to_string(), "context canceled");
        assert!(AwaitError::MissingCondition.object().is_none());
    }
}

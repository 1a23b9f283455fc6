//! Per-step error policy: fail, skip, retry or fallback.
//!
//! Stateless, like the rest of the decision helpers: the executor tracks
//! attempts and asks the handler what to do next.

use stepflow_types::workflow::{OnError, StepSpec};

use super::step_runner::StepError;

/// What the executor does with a step whose attempts are exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Abort the run.
    Fail,
    /// Record the failure and continue with the next step.
    Skip,
    /// Run the named step in place of the failed one.
    Fallback(String),
}

pub struct ErrorPolicyHandler;

impl ErrorPolicyHandler {
    /// Total attempts for a step, first execution included.
    ///
    /// `retry` always allows at least one re-execution, even with
    /// `retry_count: 0` or no count at all.
    pub fn max_attempts(step: &StepSpec) -> u32 {
        match step.error_handling.as_ref() {
            Some(handling) if handling.on_error == OnError::Retry => {
                1 + handling.retry_count.unwrap_or(1).max(1)
            }
            _ => 1,
        }
    }

    /// Whether another attempt should follow failed attempt number `attempt`
    /// (1-based).
    pub fn should_retry(step: &StepSpec, attempt: u32, error: &StepError) -> bool {
        !error.is_cancelled() && attempt < Self::max_attempts(step)
    }

    /// The decision once no further attempts will be made.
    pub fn decide(step: &StepSpec) -> PolicyDecision {
        let Some(handling) = step.error_handling.as_ref() else {
            return PolicyDecision::Fail;
        };
        match handling.on_error {
            OnError::Fail | OnError::Retry => PolicyDecision::Fail,
            OnError::Skip => PolicyDecision::Skip,
            OnError::Fallback => match &handling.fallback_step {
                Some(target) if target != &step.id => PolicyDecision::Fallback(target.clone()),
                _ => PolicyDecision::Fail,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use stepflow_types::workflow::{ErrorHandling, StepConfig, StepType};

    fn make_step(handling: Option<ErrorHandling>) -> StepSpec {
        StepSpec {
            id: "work".to_string(),
            step_type: StepType::End,
            name: None,
            description: None,
            depends_on: vec![],
            config: StepConfig::End,
            outputs: IndexMap::new(),
            error_handling: handling,
        }
    }

    fn policy(on_error: OnError, retry_count: Option<u32>, fallback: Option<&str>) -> Option<ErrorHandling> {
        Some(ErrorHandling {
            on_error,
            retry_count,
            fallback_step: fallback.map(str::to_string),
        })
    }

    #[test]
    fn test_default_is_fail_with_single_attempt() {
        let step = make_step(None);
        assert_eq!(ErrorPolicyHandler::max_attempts(&step), 1);
        assert_eq!(ErrorPolicyHandler::decide(&step), PolicyDecision::Fail);
    }

    #[test]
    fn test_retry_attempts() {
        assert_eq!(ErrorPolicyHandler::max_attempts(&make_step(policy(OnError::Retry, Some(3), None))), 4);
        assert_eq!(ErrorPolicyHandler::max_attempts(&make_step(policy(OnError::Retry, Some(0), None))), 2);
        assert_eq!(ErrorPolicyHandler::max_attempts(&make_step(policy(OnError::Retry, None, None))), 2);
        // retry_count only matters for the retry policy
        assert_eq!(ErrorPolicyHandler::max_attempts(&make_step(policy(OnError::Skip, Some(3), None))), 1);
    }

    #[test]
    fn test_should_retry() {
        let step = make_step(policy(OnError::Retry, Some(2), None));
        let err = StepError::ExecutionFailed("boom".to_string());
        assert!(ErrorPolicyHandler::should_retry(&step, 1, &err));
        assert!(ErrorPolicyHandler::should_retry(&step, 2, &err));
        assert!(!ErrorPolicyHandler::should_retry(&step, 3, &err));
        assert!(!ErrorPolicyHandler::should_retry(&step, 1, &StepError::Cancelled));
    }

    #[test]
    fn test_decisions() {
        assert_eq!(
            ErrorPolicyHandler::decide(&make_step(policy(OnError::Retry, Some(1), None))),
            PolicyDecision::Fail
        );
        assert_eq!(
            ErrorPolicyHandler::decide(&make_step(policy(OnError::Skip, None, None))),
            PolicyDecision::Skip
        );
        assert_eq!(
            ErrorPolicyHandler::decide(&make_step(policy(OnError::Fallback, None, Some("backup")))),
            PolicyDecision::Fallback("backup".to_string())
        );
        assert_eq!(
            ErrorPolicyHandler::decide(&make_step(policy(OnError::Fallback, None, None))),
            PolicyDecision::Fail
        );
        assert_eq!(
            ErrorPolicyHandler::decide(&make_step(policy(OnError::Fallback, None, Some("work")))),
            PolicyDecision::Fail
        );
    }
}

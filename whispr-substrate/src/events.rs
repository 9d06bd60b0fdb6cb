use serde::{Deserialize, Serialize};
use whispr_utils::encryption::CiphertextBlock;

use crate::types::{CorrelationId, Nonce, SubmitterIdentity};

/// Suffix of the notification name a computation kind emits on completion
pub const EXECUTED_EVENT_SUFFIX: &str = "_executed";

/// Name of the completion notification for the computation kind `name`
#[must_use]
pub fn executed_event_name(name: &str) -> String {
    format!("{name}{EXECUTED_EVENT_SUFFIX}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalizationStatus {
    Pending,
    Finalized,
    Failed,
}

/// Cluster-side outcome of one computation request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalizationRecord {
    pub correlation_id: CorrelationId,
    pub status: FinalizationStatus,
    /// Nonce the cluster encrypted the outputs under, set once finalized
    pub result_nonce: Option<Nonce>,
    pub ciphertext_outputs: Vec<CiphertextBlock>,
    pub failure_reason: Option<String>,
}

impl FinalizationRecord {
    #[must_use]
    pub const fn pending(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            status: FinalizationStatus::Pending,
            result_nonce: None,
            ciphertext_outputs: Vec::new(),
            failure_reason: None,
        }
    }

    #[must_use]
    pub fn finalized(
        correlation_id: CorrelationId,
        result_nonce: Nonce,
        ciphertext_outputs: Vec<CiphertextBlock>,
    ) -> Self {
        Self {
            correlation_id,
            status: FinalizationStatus::Finalized,
            result_nonce: Some(result_nonce),
            ciphertext_outputs,
            failure_reason: None,
        }
    }

    #[must_use]
    pub fn failed(correlation_id: CorrelationId, reason: String) -> Self {
        Self {
            correlation_id,
            status: FinalizationStatus::Failed,
            result_nonce: None,
            ciphertext_outputs: Vec::new(),
            failure_reason: Some(reason),
        }
    }

    /// `Finalized` and `Failed` are both terminal
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self.status, FinalizationStatus::Pending)
    }
}

/// Completion notification broadcast by the cluster.
///
/// `correlation_id` is `None` when the cluster does not echo it back, in which case the only
/// handle on the originating request is the `sequence` it was assigned at submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputationNotification {
    pub event_name: String,
    pub correlation_id: Option<CorrelationId>,
    pub sequence: u64,
    pub submitter: SubmitterIdentity,
    pub ciphertext_outputs: Vec<CiphertextBlock>,
    pub result_nonce: Nonce,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_pending_is_not_terminal() {
        let id = CorrelationId::random();
        assert!(!FinalizationRecord::pending(id).is_terminal());
        assert!(FinalizationRecord::finalized(id, Nonce::random(), vec![]).is_terminal());
        assert!(FinalizationRecord::failed(id, "aborted".to_string()).is_terminal());
    }

    #[test]
    fn test_executed_event_name() {
        assert_eq!(executed_event_name("compute_swap"), "compute_swap_executed");
    }
}

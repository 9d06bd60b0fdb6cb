use std::{sync::Arc, time::Duration};

use tracing::{debug, instrument};
use whispr_confidential::{ConfidentialError, KeyExchangeSession};
use whispr_substrate::{
    types::{ComputationDefinition, CorrelationId, Nonce},
    ComputationNotification, ExecutionSubstrate, ListenerId,
};
use whispr_utils::{encryption::CiphertextBlock, FieldElement};

use crate::error::{Result, WhisprClientError};

/// Identifies the request a completion notification belongs to.
///
/// The correlation id is authoritative. The sequence is only consulted when a notification
/// does not carry an id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchKey {
    pub correlation_id: CorrelationId,
    pub sequence: u64,
}

impl MatchKey {
    #[must_use]
    pub fn matches(&self, notification: &ComputationNotification) -> bool {
        notification.correlation_id.map_or(
            notification.sequence == self.sequence,
            |correlation_id| correlation_id == self.correlation_id,
        )
    }
}

/// A registered notification listener, removed from the substrate when dropped
pub struct EventSubscription {
    substrate: Arc<dyn ExecutionSubstrate>,
    listener_id: ListenerId,
    event_name: String,
    receiver: flume::Receiver<ComputationNotification>,
    released: bool,
}

impl EventSubscription {
    #[must_use]
    pub const fn listener_id(&self) -> ListenerId {
        self.listener_id
    }

    #[must_use]
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Deregisters the listener. Idempotent.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.substrate.remove_event_listener(self.listener_id);
            debug!(
                target = "whispr-client",
                event = "subscription_released",
                listener_id = self.listener_id.0,
                event_name = %self.event_name,
                "Released event subscription"
            );
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Matches completion notifications to pending requests and decrypts their payloads
pub struct ResultCorrelator {
    substrate: Arc<dyn ExecutionSubstrate>,
}

impl ResultCorrelator {
    #[must_use]
    pub fn new(substrate: Arc<dyn ExecutionSubstrate>) -> Self {
        Self { substrate }
    }

    /// Starts listening for completions of `definition`.
    ///
    /// Subscribe before submitting, so a completion that lands right after the submission is
    /// not missed.
    #[must_use]
    pub fn subscribe(&self, definition: &ComputationDefinition) -> EventSubscription {
        let event_name = definition.executed_event_name();
        let (listener_id, receiver) = self.substrate.add_event_listener(&event_name);
        debug!(
            target = "whispr-client",
            event = "subscription_added",
            listener_id = listener_id.0,
            event_name = %event_name,
            "Subscribed to completion notifications"
        );
        EventSubscription {
            substrate: self.substrate.clone(),
            listener_id,
            event_name,
            receiver,
            released: false,
        }
    }

    /// Waits for the first notification matching `key`, consuming the subscription.
    ///
    /// The listener is released on every exit path: match, timeout, closed channel, or the
    /// returned future being dropped.
    ///
    /// # Errors
    /// - `WhisprClientError::FinalizationTimeout` if nothing matches within `timeout`; `attempts`
    ///   counts the notifications seen
    /// - `WhisprClientError::ListenerClosed` if the substrate drops the listener
    #[instrument(level = "debug", skip_all, fields(correlation_id = %key.correlation_id))]
    pub async fn await_notification(
        &self,
        mut subscription: EventSubscription,
        key: MatchKey,
        timeout: Duration,
    ) -> Result<ComputationNotification> {
        let mut seen = 0u32;
        let outcome =
            tokio::time::timeout(timeout, next_match(&subscription.receiver, key, &mut seen))
                .await;
        subscription.release();
        match outcome {
            Ok(result) => result,
            Err(_) => Err(WhisprClientError::FinalizationTimeout {
                correlation_id: key.correlation_id,
                timeout,
                attempts: seen,
            }),
        }
    }

    /// Decrypts a finalized computation's outputs with the session secret and the result nonce
    ///
    /// # Errors
    /// Returns `WhisprClientError::DecryptionMismatch` if any block fails to authenticate
    pub fn decrypt_outputs(
        &self,
        session: &KeyExchangeSession,
        correlation_id: CorrelationId,
        result_nonce: &Nonce,
        ciphertext_outputs: &[CiphertextBlock],
    ) -> Result<Vec<FieldElement>> {
        session
            .codec()
            .decrypt_fields(result_nonce, ciphertext_outputs)
            .map_err(|e| match e {
                ConfidentialError::DecryptionMismatch { index, .. } => {
                    WhisprClientError::DecryptionMismatch {
                        correlation_id: Some(correlation_id),
                        index,
                    }
                }
                e => e.into(),
            })
    }
}

async fn next_match(
    receiver: &flume::Receiver<ComputationNotification>,
    key: MatchKey,
    seen: &mut u32,
) -> Result<ComputationNotification> {
    loop {
        let notification = receiver.recv_async().await.map_err(|_| {
            WhisprClientError::ListenerClosed {
                correlation_id: key.correlation_id,
            }
        })?;
        *seen += 1;
        if key.matches(&notification) {
            return Ok(notification);
        }
        debug!(
            target = "whispr-client",
            event = "notification_skipped",
            correlation_id = %key.correlation_id,
            sequence = notification.sequence,
            "Notification belongs to another request"
        );
    }
}

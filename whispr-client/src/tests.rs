use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::time::Instant;
use whispr_confidential::EphemeralKeyPair;
use whispr_substrate::{
    client::Result as SubstrateResult,
    config::Builder,
    types::{
        ClusterPublicKey, ComputationDefinition, ComputationRequest, CorrelationId,
        DefinitionReceipt, DefinitionState, ProgramContext, SubmissionReceipt, SubmitterIdentity,
    },
    ComputationNotification, ExecutionSubstrate, FinalizationRecord, ListenerId, LocalCluster,
    LocalClusterConfig, SubstrateError,
};
use whispr_utils::FieldElement;

use crate::{ResultSource, WhisprClient, WhisprClientConfig, WhisprClientError};

fn test_config() -> WhisprClientConfig {
    WhisprClientConfig {
        poll_interval: Duration::from_millis(10),
        finalization_timeout: Duration::from_secs(5),
        ..WhisprClientConfig::default()
    }
}

fn swap() -> ComputationDefinition {
    ComputationDefinition::new("compute_swap")
}

fn swap_inputs(amount: u64, min_amount: u64) -> Vec<FieldElement> {
    vec![FieldElement::from(amount), FieldElement::from(min_amount)]
}

fn alice() -> SubmitterIdentity {
    SubmitterIdentity::new("alice")
}

async fn connect(cluster: &LocalCluster, config: WhisprClientConfig) -> WhisprClient {
    WhisprClient::connect(Arc::new(cluster.clone()), config)
        .await
        .unwrap()
}

async fn wait_for_pending(cluster: &LocalCluster, count: usize) -> Vec<CorrelationId> {
    loop {
        let pending = cluster.pending_computations();
        if pending.len() >= count {
            return pending;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Submits a swap through a throwaway client and returns its correlation id
pub(crate) async fn submit_pending(cluster: &LocalCluster) -> CorrelationId {
    let client = connect(cluster, test_config()).await;
    client
        .registry()
        .ensure_active(&swap(), false)
        .await
        .unwrap();
    client
        .submitter()
        .submit(&swap(), &swap_inputs(10_000_000, 8_000_000), &alice())
        .await
        .unwrap()
        .correlation_id()
}

#[tokio::test]
async fn test_swap_scenario_end_to_end() {
    let cluster = LocalCluster::default();
    let client = connect(&cluster, test_config()).await;

    let outputs = client
        .run_confidential_computation(&swap(), &swap_inputs(10_000_000, 8_000_000), &alice())
        .await
        .unwrap();

    assert_eq!(
        outputs,
        vec![FieldElement::ZERO, FieldElement::from(8_000_000u64)]
    );
    assert_eq!(outputs[0].to_u64(), Some(0));
    assert_eq!(outputs[1].to_u64(), Some(8_000_000));
    assert_eq!(cluster.listener_count(), 0);
    assert_eq!(
        client.submitter().available_slots(),
        client.config().max_in_flight_requests
    );
}

#[tokio::test]
async fn test_every_request_uses_a_fresh_nonce() {
    let cluster = LocalCluster::default();
    let client = connect(&cluster, test_config()).await;

    for min_amount in [1u64, 2, 3] {
        let outputs = client
            .run_confidential_computation(&swap(), &swap_inputs(10, min_amount), &alice())
            .await
            .unwrap();
        assert_eq!(outputs[1], FieldElement::from(min_amount));
    }
    assert_eq!(client.session().nonces().issued(), 3);
}

#[tokio::test]
async fn test_concurrent_activation_registers_once() {
    let cluster = LocalCluster::default();
    let client = connect(&cluster, test_config()).await;
    let definition = swap();

    let results = join_all(
        (0..8).map(|_| client.registry().ensure_active(&definition, false)),
    )
    .await;

    assert!(results
        .into_iter()
        .all(|state| matches!(state, Ok(DefinitionState::Active))));
    assert_eq!(cluster.init_calls(), 1);
    assert_eq!(cluster.activation_calls(), 1);
}

/// Reports every kind as unregistered, as a lagging read replica would
struct StaleStateSubstrate {
    inner: LocalCluster,
}

#[async_trait]
impl ExecutionSubstrate for StaleStateSubstrate {
    async fn fetch_cluster_public_key(
        &self,
        context: &ProgramContext,
    ) -> SubstrateResult<Option<ClusterPublicKey>> {
        self.inner.fetch_cluster_public_key(context).await
    }

    async fn computation_definition_state(&self, _offset: u32) -> SubstrateResult<DefinitionState> {
        Ok(DefinitionState::Uninitialized)
    }

    async fn init_computation_definition(
        &self,
        definition: &ComputationDefinition,
    ) -> SubstrateResult<DefinitionReceipt> {
        self.inner.init_computation_definition(definition).await
    }

    async fn upload_circuit(
        &self,
        offset: u32,
        raw_circuit: &[u8],
    ) -> SubstrateResult<DefinitionReceipt> {
        self.inner.upload_circuit(offset, raw_circuit).await
    }

    async fn finalize_computation_definition(
        &self,
        offset: u32,
    ) -> SubstrateResult<DefinitionReceipt> {
        self.inner.finalize_computation_definition(offset).await
    }

    async fn submit_computation(
        &self,
        request: &ComputationRequest,
    ) -> SubstrateResult<SubmissionReceipt> {
        self.inner.submit_computation(request).await
    }

    async fn finalization_status(
        &self,
        correlation_id: CorrelationId,
    ) -> SubstrateResult<FinalizationRecord> {
        self.inner.finalization_status(correlation_id).await
    }

    fn add_event_listener(
        &self,
        event_name: &str,
    ) -> (ListenerId, flume::Receiver<ComputationNotification>) {
        self.inner.add_event_listener(event_name)
    }

    fn remove_event_listener(&self, listener_id: ListenerId) -> bool {
        self.inner.remove_event_listener(listener_id)
    }

    fn listener_count(&self) -> usize {
        self.inner.listener_count()
    }
}

#[tokio::test]
async fn test_activation_lost_to_another_client_counts_as_done() {
    let cluster = LocalCluster::default();
    connect(&cluster, test_config())
        .await
        .registry()
        .ensure_active(&swap(), false)
        .await
        .unwrap();

    let stale = Arc::new(StaleStateSubstrate {
        inner: cluster.clone(),
    });
    let client = WhisprClient::connect(stale, test_config()).await.unwrap();
    assert_eq!(
        client.registry().ensure_active(&swap(), false).await.unwrap(),
        DefinitionState::Active
    );
    // Both calls reached the substrate and were refused as duplicates
    assert_eq!(cluster.init_calls(), 2);
    assert_eq!(cluster.activation_calls(), 2);

    let outputs = client
        .run_confidential_computation(&swap(), &swap_inputs(5, 4), &alice())
        .await
        .unwrap();
    assert_eq!(outputs, vec![FieldElement::ZERO, FieldElement::from(4u64)]);
}

#[tokio::test]
async fn test_raw_circuit_upload_path() {
    let cluster = LocalCluster::default();
    let config = WhisprClientConfig {
        upload_raw_circuit: true,
        ..test_config()
    };
    let client = connect(&cluster, config).await;

    let err = client
        .run_confidential_computation(&swap(), &swap_inputs(5, 4), &alice())
        .await
        .unwrap_err();
    assert!(matches!(err, WhisprClientError::MissingRawCircuit(_)));

    let definition = swap().with_raw_circuit(b"compute_swap.circuit".to_vec());
    client
        .run_confidential_computation(&definition, &swap_inputs(5, 4), &alice())
        .await
        .unwrap();
    assert_eq!(
        cluster.uploaded_circuit(definition.offset()),
        Some(b"compute_swap.circuit".to_vec())
    );
}

#[tokio::test(start_paused = true)]
async fn test_key_published_on_fourth_attempt() {
    let cluster = LocalCluster::new(Builder::new().key_published_after_attempts(3).build());
    let start = Instant::now();

    let client = connect(&cluster, test_config()).await;

    assert_eq!(start.elapsed(), Duration::from_millis(1_500));
    assert_eq!(cluster.key_fetch_attempts(), 4);
    assert_eq!(
        client.session().cluster_public_key(),
        &cluster.cluster_public_key()
    );
}

#[tokio::test(start_paused = true)]
async fn test_key_never_published() {
    let cluster = LocalCluster::new(
        Builder::new()
            .key_published_after_attempts(u32::MAX)
            .build(),
    );
    let result = WhisprClient::connect(Arc::new(cluster.clone()), test_config()).await;
    assert!(matches!(
        result,
        Err(WhisprClientError::KeyUnavailable {
            attempts: 10,
            last_error: None,
        })
    ));
}

#[tokio::test]
async fn test_low_order_cluster_key_is_rejected() {
    let cluster = LocalCluster::default();
    cluster.override_published_key(ClusterPublicKey::from_bytes([0u8; 32]));
    let result = WhisprClient::connect(Arc::new(cluster.clone()), test_config()).await;
    assert!(matches!(result, Err(WhisprClientError::InvalidPeerKey(_))));
}

#[tokio::test]
async fn test_reverse_order_finalization() {
    let cluster = LocalCluster::new(Builder::new().auto_finalize(false).build());
    let client = Arc::new(connect(&cluster, test_config()).await);
    client
        .registry()
        .ensure_active(&swap(), false)
        .await
        .unwrap();

    let handles = [3u64, 7]
        .into_iter()
        .map(|min_amount| {
            let client = client.clone();
            tokio::spawn(async move {
                let outputs = client
                    .run_confidential_computation(&swap(), &swap_inputs(10, min_amount), &alice())
                    .await;
                (min_amount, outputs)
            })
        })
        .collect::<Vec<_>>();

    let pending = wait_for_pending(&cluster, 2).await;
    cluster.finalize(pending[1]).unwrap();
    cluster.finalize(pending[0]).unwrap();

    for handle in handles {
        let (min_amount, outputs) = handle.await.unwrap();
        assert_eq!(
            outputs.unwrap(),
            vec![FieldElement::ZERO, FieldElement::from(min_amount)]
        );
    }
    assert_eq!(cluster.listener_count(), 0);
}

#[tokio::test]
async fn test_notifications_without_correlation_ids_match_by_sequence() {
    let cluster = LocalCluster::new(Builder::new().include_correlation_ids(false).build());
    let client = connect(&cluster, test_config()).await;

    let results = join_all([11u64, 22, 33].map(|min_amount| {
        let client = &client;
        async move {
            let outputs = client
                .run_confidential_computation(&swap(), &swap_inputs(100, min_amount), &alice())
                .await
                .unwrap();
            (min_amount, outputs)
        }
    }))
    .await;

    for (min_amount, outputs) in results {
        assert_eq!(outputs[1], FieldElement::from(min_amount));
    }
}

#[tokio::test]
async fn test_correlation_collision_is_regenerated() {
    let cluster = LocalCluster::default();
    let client = connect(&cluster, test_config()).await;

    cluster.collide_next_submissions(2);
    let outputs = client
        .run_confidential_computation(&swap(), &swap_inputs(9, 6), &alice())
        .await
        .unwrap();
    assert_eq!(outputs[1], FieldElement::from(6u64));

    cluster.collide_next_submissions(5);
    let err = client
        .run_confidential_computation(&swap(), &swap_inputs(9, 6), &alice())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WhisprClientError::DuplicateCorrelation { attempts: 3, .. }
    ));
    assert_eq!(cluster.listener_count(), 0);
}

#[tokio::test]
async fn test_failed_computation_is_reported_and_releases_listener() {
    let cluster = LocalCluster::new(Builder::new().auto_finalize(false).build());
    let client = Arc::new(connect(&cluster, test_config()).await);

    let handle = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .run_confidential_computation(&swap(), &swap_inputs(10, 8), &alice())
                .await
        })
    };
    let pending = wait_for_pending(&cluster, 1).await;
    cluster.abort(pending[0], "callback aborted").unwrap();

    let err = handle.await.unwrap().unwrap_err();
    match err {
        WhisprClientError::ComputationFailed {
            correlation_id,
            reason,
        } => {
            assert_eq!(correlation_id, pending[0]);
            assert_eq!(reason, "callback aborted");
        }
        e => panic!("unexpected error: {e}"),
    }
    assert_eq!(cluster.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_notification_times_out_and_releases_listener() {
    let cluster = LocalCluster::new(Builder::new().emit_notifications(false).build());
    let config = WhisprClientConfig {
        finalization_timeout: Duration::from_secs(2),
        ..test_config()
    };
    let client = connect(&cluster, config).await;

    let err = client
        .run_confidential_computation(&swap(), &swap_inputs(10, 8), &alice())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WhisprClientError::FinalizationTimeout { timeout, .. } if timeout == Duration::from_secs(2)
    ));
    assert_eq!(cluster.listener_count(), 0);
}

#[tokio::test]
async fn test_outputs_can_be_read_from_the_finalization_record() {
    let cluster = LocalCluster::new(Builder::new().emit_notifications(false).build());
    let config = WhisprClientConfig {
        result_source: ResultSource::FinalizationRecord,
        ..test_config()
    };
    let client = connect(&cluster, config).await;

    let outputs = client
        .run_confidential_computation(&swap(), &swap_inputs(10_000_000, 8_000_000), &alice())
        .await
        .unwrap();
    assert_eq!(
        outputs,
        vec![FieldElement::ZERO, FieldElement::from(8_000_000u64)]
    );
    assert_eq!(cluster.listener_count(), 0);
}

#[tokio::test]
async fn test_cancellation_releases_listener_and_slot() {
    let cluster = LocalCluster::new(Builder::new().auto_finalize(false).build());
    let client = Arc::new(connect(&cluster, test_config()).await);

    let handle = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .run_confidential_computation(&swap(), &swap_inputs(10, 8), &alice())
                .await
        })
    };
    wait_for_pending(&cluster, 1).await;
    assert_eq!(cluster.listener_count(), 1);

    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
    assert_eq!(cluster.listener_count(), 0);
    assert_eq!(
        client.submitter().available_slots(),
        client.config().max_in_flight_requests
    );
}

#[tokio::test]
async fn test_wrong_cluster_key_fails_the_computation() {
    let cluster = LocalCluster::default();
    cluster.override_published_key(ClusterPublicKey::from_bytes(
        EphemeralKeyPair::new().public_key_bytes(),
    ));
    let client = connect(&cluster, test_config()).await;

    let err = client
        .run_confidential_computation(&swap(), &swap_inputs(10, 8), &alice())
        .await
        .unwrap_err();
    assert!(matches!(err, WhisprClientError::ComputationFailed { .. }));
}

#[tokio::test]
async fn test_outputs_do_not_decrypt_under_another_session() {
    let cluster = LocalCluster::default();
    let client = connect(&cluster, test_config()).await;
    let eavesdropper = connect(&cluster, test_config()).await;

    client
        .registry()
        .ensure_active(&swap(), false)
        .await
        .unwrap();
    let pending = client
        .submitter()
        .submit(&swap(), &swap_inputs(10, 8), &alice())
        .await
        .unwrap();
    let record = client
        .waiter()
        .await_finalization(pending.correlation_id(), Duration::from_secs(1))
        .await
        .unwrap();
    let result_nonce = record.result_nonce.unwrap();

    assert!(client
        .correlator()
        .decrypt_outputs(
            client.session(),
            pending.correlation_id(),
            &result_nonce,
            &record.ciphertext_outputs,
        )
        .is_ok());
    let err = eavesdropper
        .correlator()
        .decrypt_outputs(
            eavesdropper.session(),
            pending.correlation_id(),
            &result_nonce,
            &record.ciphertext_outputs,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        WhisprClientError::DecryptionMismatch {
            correlation_id: Some(id),
            index: Some(0),
        } if id == pending.correlation_id()
    ));
}

#[test]
fn test_cluster_config_defaults_suit_the_client_defaults() {
    assert_eq!(
        LocalClusterConfig::default().program_id(),
        WhisprClientConfig::default().program_id
    );
}

#[tokio::test(start_paused = true)]
async fn test_late_finalization_stays_within_one_timeout_window() {
    let cluster = LocalCluster::new(
        Builder::new()
            .auto_finalize(false)
            .emit_notifications(false)
            .build(),
    );
    let client = Arc::new(connect(&cluster, test_config()).await);
    client
        .registry()
        .ensure_active(&swap(), false)
        .await
        .unwrap();

    let start = Instant::now();
    let handle = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .run_confidential_computation(&swap(), &swap_inputs(10, 8), &alice())
                .await
        })
    };
    let pending = wait_for_pending(&cluster, 1).await;
    tokio::time::sleep(Duration::from_secs(4)).await;
    cluster.finalize(pending[0]).unwrap();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        WhisprClientError::FinalizationTimeout { timeout, .. } if timeout == Duration::from_secs(5)
    ));
    assert!(start.elapsed() <= Duration::from_millis(5_100));
    assert_eq!(cluster.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_key_fetch_failure_keeps_the_last_substrate_error() {
    let cluster = LocalCluster::default();
    cluster.fail_next_key_fetches(10);
    let result = WhisprClient::connect(Arc::new(cluster.clone()), test_config()).await;
    assert!(matches!(
        result,
        Err(WhisprClientError::KeyUnavailable {
            attempts: 10,
            last_error: Some(SubstrateError::Unavailable(_)),
        })
    ));
}

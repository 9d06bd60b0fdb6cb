use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc, PoisonError, RwLock,
};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use tracing::{debug, info, instrument, warn};
use whispr_utils::{
    encryption::{decrypt_fields, encrypt_fields, CiphertextBlock},
    hashing::computation_definition_offset,
    FieldElement,
};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{
    circuits::{self, Circuit, CircuitError},
    client::{ExecutionSubstrate, Result, SubstrateError},
    config::LocalClusterConfig,
    events::{executed_event_name, ComputationNotification, FinalizationRecord},
    listeners::{EventListenerRegistry, ListenerId},
    types::{
        ClusterPublicKey, ComputationDefinition, ComputationRequest, CorrelationId,
        DefinitionReceipt, DefinitionState, Nonce, ProgramContext, SubmissionReceipt,
    },
};

/// Registered computation kind, as the cluster tracks it
struct DefinitionEntry {
    name: String,
    state: DefinitionState,
    raw_circuit: Option<Vec<u8>>,
}

/// A queued computation and its current outcome
struct ComputationEntry {
    request: ComputationRequest,
    sequence: u64,
    record: FinalizationRecord,
}

struct Inner {
    config: LocalClusterConfig,
    cluster_secret: StaticSecret,
    /// Key handed out on fetch; differs from the cluster's own only when a test overrides it
    published_key: RwLock<ClusterPublicKey>,
    key_fetches: AtomicU32,
    definitions: DashMap<u32, DefinitionEntry>,
    circuits: DashMap<String, Circuit>,
    computations: DashMap<CorrelationId, ComputationEntry>,
    next_sequence: AtomicU64,
    listeners: EventListenerRegistry,
    init_calls: AtomicU32,
    activation_calls: AtomicU32,
    failing_key_fetches: AtomicU32,
    failing_status_queries: AtomicU32,
    forced_collisions: AtomicU32,
}

/// In-process execution cluster.
///
/// Holds a static x25519 key, decrypts submitted inputs, runs registered circuits and
/// re-encrypts their outputs under a fresh result nonce, the way a remote cluster does.
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct LocalCluster {
    inner: Arc<Inner>,
}

impl LocalCluster {
    /// Constructor, with the swap circuit registered
    #[must_use]
    pub fn new(config: LocalClusterConfig) -> Self {
        let cluster_secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let published_key =
            ClusterPublicKey::from_bytes(PublicKey::from(&cluster_secret).to_bytes());
        let cluster = Self {
            inner: Arc::new(Inner {
                config,
                cluster_secret,
                published_key: RwLock::new(published_key),
                key_fetches: AtomicU32::new(0),
                definitions: DashMap::new(),
                circuits: DashMap::new(),
                computations: DashMap::new(),
                next_sequence: AtomicU64::new(0),
                listeners: EventListenerRegistry::new(),
                init_calls: AtomicU32::new(0),
                activation_calls: AtomicU32::new(0),
                failing_key_fetches: AtomicU32::new(0),
                failing_status_queries: AtomicU32::new(0),
                forced_collisions: AtomicU32::new(0),
            }),
        };
        cluster.register_circuit(circuits::COMPUTE_SWAP, Arc::new(circuits::compute_swap));
        cluster
    }

    /// Makes `circuit` the body executed for computations named `name`
    pub fn register_circuit(&self, name: &str, circuit: Circuit) {
        self.inner.circuits.insert(name.to_string(), circuit);
    }

    #[must_use]
    pub fn config(&self) -> &LocalClusterConfig {
        &self.inner.config
    }

    /// The key the cluster actually decrypts with
    #[must_use]
    pub fn cluster_public_key(&self) -> ClusterPublicKey {
        ClusterPublicKey::from_bytes(PublicKey::from(&self.inner.cluster_secret).to_bytes())
    }

    /// Publishes `key` in place of the cluster's own
    pub fn override_published_key(&self, key: ClusterPublicKey) {
        *self
            .inner
            .published_key
            .write()
            .unwrap_or_else(PoisonError::into_inner) = key;
    }

    /// Number of key fetches answered so far, including those answered with "not yet"
    #[must_use]
    pub fn key_fetch_attempts(&self) -> u32 {
        self.inner.key_fetches.load(Ordering::SeqCst)
    }

    /// Number of registration calls received, duplicates included
    #[must_use]
    pub fn init_calls(&self) -> u32 {
        self.inner.init_calls.load(Ordering::SeqCst)
    }

    /// Number of finalize and upload calls received, duplicates included
    #[must_use]
    pub fn activation_calls(&self) -> u32 {
        self.inner.activation_calls.load(Ordering::SeqCst)
    }

    /// Raw circuit uploaded for `offset`, if any
    #[must_use]
    pub fn uploaded_circuit(&self, offset: u32) -> Option<Vec<u8>> {
        self.inner
            .definitions
            .get(&offset)
            .and_then(|entry| entry.raw_circuit.clone())
    }

    /// The next `count` key fetches fail with a transient error
    pub fn fail_next_key_fetches(&self, count: u32) {
        self.inner.failing_key_fetches.store(count, Ordering::SeqCst);
    }

    /// The next `count` status queries fail with a transient error
    pub fn fail_next_status_queries(&self, count: u32) {
        self.inner
            .failing_status_queries
            .store(count, Ordering::SeqCst);
    }

    /// The next `count` submissions are rejected as correlation id collisions
    pub fn collide_next_submissions(&self, count: u32) {
        self.inner.forced_collisions.store(count, Ordering::SeqCst);
    }

    /// Correlation ids still pending, in submission order
    #[must_use]
    pub fn pending_computations(&self) -> Vec<CorrelationId> {
        let mut pending = self
            .inner
            .computations
            .iter()
            .filter(|entry| !entry.record.is_terminal())
            .map(|entry| (entry.sequence, *entry.key()))
            .collect::<Vec<_>>();
        pending.sort_unstable_by_key(|(sequence, _)| *sequence);
        pending.into_iter().map(|(_, id)| id).collect()
    }

    /// Executes a pending computation now.
    ///
    /// A computation that is already terminal is left alone and its record returned.
    ///
    /// # Errors
    /// `SubstrateError::UnknownComputation` if nothing was submitted under `correlation_id`
    pub fn finalize(&self, correlation_id: CorrelationId) -> Result<FinalizationRecord> {
        let (request, sequence) = {
            let entry = self
                .inner
                .computations
                .get(&correlation_id)
                .ok_or(SubstrateError::UnknownComputation(correlation_id))?;
            if entry.record.is_terminal() {
                return Ok(entry.record.clone());
            }
            (entry.request.clone(), entry.sequence)
        };

        let record = match self.run_circuit(&request) {
            Ok((result_nonce, ciphertext_outputs)) => {
                FinalizationRecord::finalized(correlation_id, result_nonce, ciphertext_outputs)
            }
            Err(reason) => {
                warn!(
                    target = "whispr-substrate",
                    event = "computation_failed",
                    correlation_id = %correlation_id,
                    reason = %reason,
                    "Computation failed"
                );
                FinalizationRecord::failed(correlation_id, reason)
            }
        };
        self.record_outcome(&request, sequence, record)
    }

    /// Aborts a pending computation. Aborted computations emit no notification.
    ///
    /// # Errors
    /// `SubstrateError::UnknownComputation` if nothing was submitted under `correlation_id`
    pub fn abort(&self, correlation_id: CorrelationId, reason: &str) -> Result<FinalizationRecord> {
        let (request, sequence) = {
            let entry = self
                .inner
                .computations
                .get(&correlation_id)
                .ok_or(SubstrateError::UnknownComputation(correlation_id))?;
            (entry.request.clone(), entry.sequence)
        };
        self.record_outcome(
            &request,
            sequence,
            FinalizationRecord::failed(correlation_id, reason.to_string()),
        )
    }

    /// Stores `record` unless the computation already reached a terminal state, then notifies
    /// listeners of successful completions
    fn record_outcome(
        &self,
        request: &ComputationRequest,
        sequence: u64,
        record: FinalizationRecord,
    ) -> Result<FinalizationRecord> {
        let correlation_id = request.correlation_id;
        {
            let mut entry = self
                .inner
                .computations
                .get_mut(&correlation_id)
                .ok_or(SubstrateError::UnknownComputation(correlation_id))?;
            if entry.record.is_terminal() {
                return Ok(entry.record.clone());
            }
            entry.record = record.clone();
        }

        if let (Some(result_nonce), true) = (
            record.result_nonce,
            self.inner.config.emit_notifications(),
        ) {
            let notification = ComputationNotification {
                event_name: executed_event_name(&request.computation_name),
                correlation_id: self
                    .inner
                    .config
                    .include_correlation_ids()
                    .then_some(correlation_id),
                sequence,
                submitter: request.submitter.clone(),
                ciphertext_outputs: record.ciphertext_outputs.clone(),
                result_nonce,
            };
            let delivered = self.inner.listeners.emit(&notification);
            debug!(
                target = "whispr-substrate",
                event = "notification_emitted",
                correlation_id = %correlation_id,
                event_name = %notification.event_name,
                delivered,
                "Emitted completion notification"
            );
        }
        Ok(record)
    }

    /// Decrypts the inputs, runs the circuit and encrypts the outputs under a fresh nonce
    fn run_circuit(
        &self,
        request: &ComputationRequest,
    ) -> std::result::Result<(Nonce, Vec<CiphertextBlock>), String> {
        let shared_secret = self
            .inner
            .cluster_secret
            .diffie_hellman(&PublicKey::from(request.ephemeral_public_key));
        let inputs: Vec<FieldElement> =
            decrypt_fields(&shared_secret, request.nonce.as_bytes(), &request.ciphertexts)
                .map_err(|e| e.to_string())?;
        let circuit = self
            .inner
            .circuits
            .get(&request.computation_name)
            .map(|circuit| circuit.value().clone())
            .ok_or_else(|| {
                CircuitError::Aborted(format!(
                    "no circuit registered for `{}`",
                    request.computation_name
                ))
                .to_string()
            })?;
        let outputs = circuit(&inputs).map_err(|e| e.to_string())?;
        let result_nonce = Nonce::random();
        let ciphertexts = encrypt_fields(&shared_secret, result_nonce.as_bytes(), &outputs)
            .map_err(|e| e.to_string())?;
        Ok((result_nonce, ciphertexts))
    }

    fn activate(&self, offset: u32, raw_circuit: Option<&[u8]>) -> Result<DefinitionReceipt> {
        self.inner.activation_calls.fetch_add(1, Ordering::SeqCst);
        let mut entry = self
            .inner
            .definitions
            .get_mut(&offset)
            .ok_or_else(|| SubstrateError::DefinitionNotFound(offset.to_string()))?;
        if entry.state == DefinitionState::Active {
            return Err(SubstrateError::DefinitionAlreadyActive(entry.name.clone()));
        }
        entry.state = DefinitionState::Active;
        if let Some(raw_circuit) = raw_circuit {
            entry.raw_circuit = Some(raw_circuit.to_vec());
        }
        info!(
            target = "whispr-substrate",
            event = "definition_activated",
            name = %entry.name,
            offset,
            uploaded = raw_circuit.is_some(),
            "Computation definition is active"
        );
        Ok(DefinitionReceipt {
            offset,
            state: DefinitionState::Active,
            digest: digest(),
        })
    }

    fn validate(&self, request: &ComputationRequest) -> Result<()> {
        let state = self
            .inner
            .definitions
            .get(&request.computation_offset)
            .map(|entry| entry.state)
            .unwrap_or_default();
        if state != DefinitionState::Active {
            return Err(SubstrateError::DefinitionNotActive(
                request.computation_name.clone(),
            ));
        }
        if computation_definition_offset(&request.computation_name) != request.computation_offset {
            return Err(SubstrateError::Rejected(format!(
                "offset {} does not address `{}`",
                request.computation_offset, request.computation_name
            )));
        }
        if request.ciphertexts.is_empty() {
            return Err(SubstrateError::Rejected("empty payload".to_string()));
        }
        let shared_secret = self
            .inner
            .cluster_secret
            .diffie_hellman(&PublicKey::from(request.ephemeral_public_key));
        if !shared_secret.was_contributory() {
            return Err(SubstrateError::Rejected(
                "ephemeral public key is a low order point".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for LocalCluster {
    fn default() -> Self {
        Self::new(LocalClusterConfig::default())
    }
}

/// Stand-in for a transaction digest
fn digest() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

/// Consumes one unit of an injected failure budget, returning `false` once it is spent
fn take_one(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ExecutionSubstrate for LocalCluster {
    #[instrument(level = "debug", skip_all, fields(program_id = %context.program_id))]
    async fn fetch_cluster_public_key(
        &self,
        context: &ProgramContext,
    ) -> Result<Option<ClusterPublicKey>> {
        tokio::task::yield_now().await;
        if take_one(&self.inner.failing_key_fetches) {
            return Err(SubstrateError::Unavailable(
                "cluster key account unreachable".to_string(),
            ));
        }
        let attempt = self.inner.key_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if context.program_id != self.inner.config.program_id()
            || attempt <= self.inner.config.key_published_after_attempts()
        {
            return Ok(None);
        }
        Ok(Some(
            *self
                .inner
                .published_key
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        ))
    }

    async fn computation_definition_state(&self, offset: u32) -> Result<DefinitionState> {
        tokio::task::yield_now().await;
        Ok(self
            .inner
            .definitions
            .get(&offset)
            .map(|entry| entry.state)
            .unwrap_or_default())
    }

    #[instrument(level = "debug", skip_all, fields(name = %definition.name()))]
    async fn init_computation_definition(
        &self,
        definition: &ComputationDefinition,
    ) -> Result<DefinitionReceipt> {
        tokio::task::yield_now().await;
        self.inner.init_calls.fetch_add(1, Ordering::SeqCst);
        match self.inner.definitions.entry(definition.offset()) {
            Entry::Occupied(entry) => Err(SubstrateError::DefinitionAlreadyExists(
                entry.get().name.clone(),
            )),
            Entry::Vacant(entry) => {
                entry.insert(DefinitionEntry {
                    name: definition.name().to_string(),
                    state: DefinitionState::Initializing,
                    raw_circuit: None,
                });
                info!(
                    target = "whispr-substrate",
                    event = "definition_initialized",
                    name = %definition.name(),
                    offset = definition.offset(),
                    "Computation definition registered"
                );
                Ok(DefinitionReceipt {
                    offset: definition.offset(),
                    state: DefinitionState::Initializing,
                    digest: digest(),
                })
            }
        }
    }

    async fn upload_circuit(&self, offset: u32, raw_circuit: &[u8]) -> Result<DefinitionReceipt> {
        tokio::task::yield_now().await;
        self.activate(offset, Some(raw_circuit))
    }

    async fn finalize_computation_definition(&self, offset: u32) -> Result<DefinitionReceipt> {
        tokio::task::yield_now().await;
        self.activate(offset, None)
    }

    #[instrument(
        level = "debug",
        skip_all,
        fields(correlation_id = %request.correlation_id, name = %request.computation_name)
    )]
    async fn submit_computation(&self, request: &ComputationRequest) -> Result<SubmissionReceipt> {
        tokio::task::yield_now().await;
        self.validate(request)?;
        if take_one(&self.inner.forced_collisions) {
            return Err(SubstrateError::DuplicateCorrelation(request.correlation_id));
        }

        let sequence = match self.inner.computations.entry(request.correlation_id) {
            Entry::Occupied(_) => {
                return Err(SubstrateError::DuplicateCorrelation(request.correlation_id))
            }
            Entry::Vacant(entry) => {
                let sequence = self.inner.next_sequence.fetch_add(1, Ordering::SeqCst);
                entry.insert(ComputationEntry {
                    request: request.clone(),
                    sequence,
                    record: FinalizationRecord::pending(request.correlation_id),
                });
                sequence
            }
        };
        info!(
            target = "whispr-substrate",
            event = "computation_queued",
            correlation_id = %request.correlation_id,
            sequence,
            inputs = request.ciphertexts.len(),
            "Computation queued"
        );

        if self.inner.config.auto_finalize() {
            let latency = self.inner.config.execution_latency();
            if latency.is_zero() {
                self.finalize(request.correlation_id)?;
            } else {
                let cluster = self.clone();
                let correlation_id = request.correlation_id;
                tokio::spawn(async move {
                    tokio::time::sleep(latency).await;
                    if let Err(e) = cluster.finalize(correlation_id) {
                        warn!(
                            target = "whispr-substrate",
                            event = "delayed_execution_failed",
                            correlation_id = %correlation_id,
                            error = %e,
                            "Delayed execution failed"
                        );
                    }
                });
            }
        }

        Ok(SubmissionReceipt {
            correlation_id: request.correlation_id,
            sequence,
            digest: digest(),
        })
    }

    async fn finalization_status(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<FinalizationRecord> {
        tokio::task::yield_now().await;
        if take_one(&self.inner.failing_status_queries) {
            return Err(SubstrateError::Unavailable(
                "computation account unreachable".to_string(),
            ));
        }
        self.inner
            .computations
            .get(&correlation_id)
            .map(|entry| entry.record.clone())
            .ok_or(SubstrateError::UnknownComputation(correlation_id))
    }

    fn add_event_listener(
        &self,
        event_name: &str,
    ) -> (ListenerId, flume::Receiver<ComputationNotification>) {
        self.inner.listeners.add(event_name)
    }

    fn remove_event_listener(&self, listener_id: ListenerId) -> bool {
        self.inner.listeners.remove(listener_id)
    }

    fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, instrument};
use whispr_substrate::{
    types::{ComputationDefinition, DefinitionState},
    ExecutionSubstrate, SubstrateError,
};
use whispr_utils::{RetryError, RetryPolicy};

use crate::error::{Result, WhisprClientError};

/// Tracks which computation kinds this client has seen active, and activates the others.
///
/// Activation is once per kind: registration moves a kind to `Initializing`, then either the
/// raw circuit upload or the finalize call makes it `Active`. Concurrent callers for the same
/// kind are serialized on a per-kind lock, so each step is attempted at most once per client.
pub struct ComputationDefinitionRegistry {
    substrate: Arc<dyn ExecutionSubstrate>,
    policy: RetryPolicy,
    states: DashMap<u32, DefinitionState>,
    locks: DashMap<u32, Arc<Mutex<()>>>,
}

impl ComputationDefinitionRegistry {
    #[must_use]
    pub fn new(substrate: Arc<dyn ExecutionSubstrate>, policy: RetryPolicy) -> Self {
        Self {
            substrate,
            policy,
            states: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Last state observed for the kind at `offset`
    #[must_use]
    pub fn state(&self, offset: u32) -> DefinitionState {
        self.states
            .get(&offset)
            .map(|state| *state)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_active(&self, offset: u32) -> bool {
        self.state(offset) == DefinitionState::Active
    }

    /// Makes sure `definition` is active on the substrate.
    ///
    /// A no-op for kinds already seen active. Otherwise registers the kind if the substrate
    /// does not know it, then activates it through a raw circuit upload when
    /// `upload_raw_circuit` is set, or a finalize call when it is not. A registration or
    /// activation that lost a race against another client counts as done.
    ///
    /// # Errors
    /// - `WhisprClientError::MissingRawCircuit` if the kind still needs activating and an upload
    ///   is requested without circuit bytes
    /// - `WhisprClientError::RegistrationFailed` if a substrate call fails for good
    #[instrument(
        level = "info",
        skip_all,
        fields(name = %definition.name(), upload_raw_circuit = upload_raw_circuit)
    )]
    pub async fn ensure_active(
        &self,
        definition: &ComputationDefinition,
        upload_raw_circuit: bool,
    ) -> Result<DefinitionState> {
        let offset = definition.offset();
        if self.is_active(offset) {
            return Ok(DefinitionState::Active);
        }

        let lock = self.locks.entry(offset).or_default().clone();
        let _guard = lock.lock().await;
        if self.is_active(offset) {
            return Ok(DefinitionState::Active);
        }

        let registration_failed = |source| WhisprClientError::RegistrationFailed {
            name: definition.name().to_string(),
            source,
        };
        let substrate = &self.substrate;

        let state = self
            .retrying("computation_definition_state", || async move {
                substrate.computation_definition_state(offset).await
            })
            .await
            .map_err(registration_failed)?;
        if state == DefinitionState::Active {
            self.states.insert(offset, state);
            return Ok(state);
        }

        // Only an activation still to be done needs the circuit bytes
        let raw_circuit = match (upload_raw_circuit, definition.raw_circuit()) {
            (true, None) => {
                return Err(WhisprClientError::MissingRawCircuit(
                    definition.name().to_string(),
                ))
            }
            (true, Some(raw_circuit)) => Some(raw_circuit),
            (false, _) => None,
        };

        if state == DefinitionState::Uninitialized {
            self.retrying("init_computation_definition", || async move {
                match substrate.init_computation_definition(definition).await {
                    Ok(_) | Err(SubstrateError::DefinitionAlreadyExists(_)) => Ok(()),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(registration_failed)?;
            self.states.insert(offset, DefinitionState::Initializing);
        }

        self.retrying("activate_computation_definition", || async move {
            let receipt = match raw_circuit {
                Some(raw_circuit) => substrate.upload_circuit(offset, raw_circuit).await,
                None => substrate.finalize_computation_definition(offset).await,
            };
            match receipt {
                Ok(_) | Err(SubstrateError::DefinitionAlreadyActive(_)) => Ok(()),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(registration_failed)?;

        self.states.insert(offset, DefinitionState::Active);
        info!(
            target = "whispr-client",
            event = "definition_active",
            name = %definition.name(),
            offset,
            "Computation definition is active"
        );
        Ok(DefinitionState::Active)
    }

    /// Runs one substrate call under the registry's policy, retrying transient failures
    async fn retrying<T, F, Fut>(
        &self,
        operation_name: &'static str,
        mut call: F,
    ) -> std::result::Result<T, SubstrateError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, SubstrateError>>,
    {
        self.policy
            .run(operation_name, |_| {
                let pending = call();
                async move { pending.await.map(Some) }
            })
            .await
            .map_err(|e| match e {
                RetryError::Exhausted {
                    last_error: Some(error),
                    ..
                }
                | RetryError::Permanent { error, .. } => error,
                RetryError::Exhausted { attempts, .. } => SubstrateError::Unavailable(format!(
                    "`{operation_name}` gave up after {attempts} attempts"
                )),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use whispr_substrate::LocalCluster;

    use super::*;

    fn registry(cluster: &LocalCluster) -> ComputationDefinitionRegistry {
        ComputationDefinitionRegistry::new(
            Arc::new(cluster.clone()),
            RetryPolicy::fixed(3, Duration::from_millis(10)),
        )
    }

    #[tokio::test]
    async fn test_finalize_path() {
        let cluster = LocalCluster::default();
        let registry = registry(&cluster);
        let definition = ComputationDefinition::new("compute_swap");

        assert!(!registry.is_active(definition.offset()));
        assert_eq!(
            registry.ensure_active(&definition, false).await.unwrap(),
            DefinitionState::Active
        );
        assert!(registry.is_active(definition.offset()));
        assert_eq!(cluster.init_calls(), 1);
        assert_eq!(cluster.activation_calls(), 1);
        assert_eq!(cluster.uploaded_circuit(definition.offset()), None);

        // Known active, nothing reaches the substrate
        registry.ensure_active(&definition, false).await.unwrap();
        assert_eq!(cluster.init_calls(), 1);
    }

    #[tokio::test]
    async fn test_upload_path() {
        let cluster = LocalCluster::default();
        let registry = registry(&cluster);
        let definition = ComputationDefinition::new("compute_swap").with_raw_circuit(vec![1, 2, 3]);

        registry.ensure_active(&definition, true).await.unwrap();
        assert_eq!(
            cluster.uploaded_circuit(definition.offset()),
            Some(vec![1, 2, 3])
        );
    }

    #[tokio::test]
    async fn test_upload_without_circuit_bytes() {
        let cluster = LocalCluster::default();
        let registry = registry(&cluster);
        let definition = ComputationDefinition::new("compute_swap");

        assert!(matches!(
            registry.ensure_active(&definition, true).await,
            Err(WhisprClientError::MissingRawCircuit(name)) if name == "compute_swap"
        ));
        assert_eq!(cluster.init_calls(), 0);
    }

    #[tokio::test]
    async fn test_active_kind_needs_no_circuit_bytes() {
        let cluster = LocalCluster::default();
        let definition = ComputationDefinition::new("compute_swap");
        registry(&cluster)
            .ensure_active(&definition, false)
            .await
            .unwrap();

        // Activated through the finalize path by another client
        let uploader = registry(&cluster);
        assert_eq!(
            uploader.ensure_active(&definition, true).await.unwrap(),
            DefinitionState::Active
        );
        // And from this client's own cache
        assert_eq!(
            uploader.ensure_active(&definition, true).await.unwrap(),
            DefinitionState::Active
        );
        assert_eq!(cluster.init_calls(), 1);
        assert_eq!(cluster.activation_calls(), 1);
    }

    #[tokio::test]
    async fn test_kind_activated_elsewhere_is_adopted() {
        let cluster = LocalCluster::default();
        let definition = ComputationDefinition::new("compute_swap");
        registry(&cluster)
            .ensure_active(&definition, false)
            .await
            .unwrap();

        let other_client = registry(&cluster);
        other_client.ensure_active(&definition, false).await.unwrap();
        assert!(other_client.is_active(definition.offset()));
        assert_eq!(cluster.init_calls(), 1);
        assert_eq!(cluster.activation_calls(), 1);
    }

    #[tokio::test]
    async fn test_half_registered_kind_is_only_activated() {
        let cluster = LocalCluster::default();
        let definition = ComputationDefinition::new("compute_swap");
        cluster
            .init_computation_definition(&definition)
            .await
            .unwrap();

        let registry = registry(&cluster);
        registry.ensure_active(&definition, false).await.unwrap();
        assert_eq!(cluster.init_calls(), 1);
        assert_eq!(cluster.activation_calls(), 1);
    }
}

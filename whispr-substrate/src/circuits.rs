use std::sync::Arc;

use thiserror::Error;
use whispr_utils::FieldElement;

/// A computation the cluster runs on decrypted inputs
pub type Circuit =
    Arc<dyn Fn(&[FieldElement]) -> Result<Vec<FieldElement>, CircuitError> + Send + Sync>;

pub const COMPUTE_SWAP: &str = "compute_swap";

/// Swap quote circuit.
///
/// Inputs are `[amount, min_amount]`; outputs are `[execute, withdraw_amount]`. This circuit
/// never executes the swap, so `execute` is always zero and the full minimum is withdrawn.
///
/// # Errors
/// Returns `CircuitError::Arity` unless exactly two inputs are given
pub fn compute_swap(inputs: &[FieldElement]) -> Result<Vec<FieldElement>, CircuitError> {
    let [_amount, min_amount] = inputs else {
        return Err(CircuitError::Arity {
            expected: 2,
            got: inputs.len(),
        });
    };
    Ok(vec![FieldElement::ZERO, *min_amount])
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CircuitError {
    #[error("Expected {expected} inputs, got {got}")]
    Arity { expected: usize, got: usize },
    #[error("Circuit aborted: `{0}`")]
    Aborted(String),
}

use sha2::{Digest, Sha256};

/// Computes the addressing offset of a computation definition from its name
///
/// # Arguments
/// * `name` - The stable name of the computation kind (e.g. `compute_swap`)
/// # Returns
/// The first four bytes of `SHA-256(name)`, read as a little-endian `u32`
#[must_use]
pub fn computation_definition_offset(name: &str) -> u32 {
    let digest = Sha256::digest(name.as_bytes());
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_is_stable_and_name_scoped() {
        assert_eq!(
            computation_definition_offset("compute_swap"),
            computation_definition_offset("compute_swap")
        );
        assert_ne!(
            computation_definition_offset("compute_swap"),
            computation_definition_offset("compute_limit")
        );
    }
}

//! Content hashing for formulas and their parameters

use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Hash function used for formula content hashes and transactional id hashes.
///
/// Hashes are stable for a given seed: cache keys computed by one process can
/// be compared with keys computed by another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormulaHasher {
    seed: u64,
}

impl FormulaHasher {
    pub const fn new() -> Self {
        Self { seed: 0 }
    }

    pub const fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    pub fn hash_bytes(&self, bytes: &[u8]) -> u64 {
        xxh3_64_with_seed(bytes, self.seed)
    }

    pub fn hash_str(&self, value: &str) -> u64 {
        self.hash_bytes(value.as_bytes())
    }

    /// Hash of a sequence of longs, order sensitive.
    pub fn hash_longs(&self, values: &[u64]) -> u64 {
        let mut bytes = Vec::with_capacity(values.len() * 8);
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        self.hash_bytes(&bytes)
    }

    /// Hash of a sequence of ints, order sensitive.
    pub fn hash_ints<I>(&self, values: I) -> u64
    where
        I: IntoIterator<Item = u32>,
    {
        let mut bytes = Vec::new();
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        self.hash_bytes(&bytes)
    }

    /// Content hash of a formula node: variant id, node parameters, then children.
    pub fn hash_formula(&self, class_id: u64, additional_hash: u64, children: &[u64]) -> u64 {
        let mut values = Vec::with_capacity(children.len() + 2);
        values.push(class_id);
        values.push(additional_hash);
        values.extend_from_slice(children);
        self.hash_longs(&values)
    }

    /// Hash of a sorted, distinct set of transactional ids.
    pub fn hash_transactional_ids<'a, I>(&self, ids: I) -> u64
    where
        I: IntoIterator<Item = &'a u64>,
    {
        let values: Vec<u64> = ids.into_iter().copied().collect();
        self.hash_longs(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let hasher = FormulaHasher::new();
        assert_eq!(hasher.hash_longs(&[1, 2, 3]), hasher.hash_longs(&[1, 2, 3]));
    }

    #[test]
    fn test_hash_is_order_sensitive() {
        let hasher = FormulaHasher::new();
        assert_ne!(hasher.hash_longs(&[1, 2]), hasher.hash_longs(&[2, 1]));
    }

    #[test]
    fn test_seed_changes_hash() {
        let value = [42u64];
        assert_ne!(
            FormulaHasher::new().hash_longs(&value),
            FormulaHasher::with_seed(7).hash_longs(&value)
        );
    }

    #[test]
    fn test_formula_hash_depends_on_children() {
        let hasher = FormulaHasher::new();
        let left = hasher.hash_formula(10, 0, &[1, 2]);
        let right = hasher.hash_formula(10, 0, &[1, 3]);
        assert_ne!(left, right);
    }
}

//! Identity-format tag -> algorithm lookup.

use super::{
    AlgorithmError, AlgorithmResult, Attestation, IdentityAlgorithm, PairDigestAlgorithm,
    SecretKey, DEFAULT_ID_FORMAT,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Algorithms available to a node, keyed by identity format.
#[derive(Clone, Default)]
pub struct AlgorithmRegistry {
    algorithms: HashMap<String, Arc<dyn IdentityAlgorithm>>,
}

impl AlgorithmRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the reference algorithm under [`DEFAULT_ID_FORMAT`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PairDigestAlgorithm::new(DEFAULT_ID_FORMAT)));
        registry
    }

    /// Register an algorithm under its own format tag, replacing any previous one.
    pub fn register(&mut self, algorithm: Arc<dyn IdentityAlgorithm>) {
        self.algorithms
            .insert(algorithm.id_format().to_string(), algorithm);
    }

    pub fn get(&self, id_format: &str) -> AlgorithmResult<Arc<dyn IdentityAlgorithm>> {
        self.algorithms
            .get(id_format)
            .cloned()
            .ok_or_else(|| AlgorithmError::UnknownFormat(id_format.to_string()))
    }

    pub fn contains(&self, id_format: &str) -> bool {
        self.algorithms.contains_key(id_format)
    }

    /// Registered format tags, sorted.
    pub fn formats(&self) -> Vec<String> {
        let mut formats: Vec<String> = self.algorithms.keys().cloned().collect();
        formats.sort();
        formats
    }

    /// Load a stored key and blob through the algorithm for `id_format`.
    pub fn deserialize_private(
        &self,
        id_format: &str,
        key_bytes: &[u8],
        blob: &[u8],
    ) -> AlgorithmResult<(SecretKey, Attestation)> {
        let algorithm = self.get(id_format)?;
        let secret_key = algorithm.load_secret_key(key_bytes)?;
        let attestation = algorithm.deserialize_private(&secret_key, blob)?;
        Ok((secret_key, attestation))
    }
}

impl std::fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmRegistry")
            .field("formats", &self.formats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_register_reference_algorithm() {
        let registry = AlgorithmRegistry::with_defaults();
        assert!(registry.contains(DEFAULT_ID_FORMAT));
        assert_eq!(
            registry.get(DEFAULT_ID_FORMAT).unwrap().id_format(),
            DEFAULT_ID_FORMAT
        );
    }

    #[test]
    fn test_unknown_format() {
        let registry = AlgorithmRegistry::new();
        assert!(matches!(
            registry.get("id_irma"),
            Err(AlgorithmError::UnknownFormat(f)) if f == "id_irma"
        ));
    }

    #[test]
    fn test_register_additional_format() {
        let mut registry = AlgorithmRegistry::with_defaults();
        registry.register(Arc::new(PairDigestAlgorithm::new("id_custom")));
        assert_eq!(registry.formats(), vec!["id_custom", "id_metadata"]);
    }

    #[test]
    fn test_deserialize_private_through_registry() {
        let registry = AlgorithmRegistry::with_defaults();
        let algorithm = registry.get(DEFAULT_ID_FORMAT).unwrap();

        let secret = algorithm.generate_secret_key().unwrap();
        let public = algorithm.public_key(&secret).unwrap();
        let blob = algorithm.attest(&public, b"A").unwrap();

        let (loaded, attestation) = registry
            .deserialize_private(DEFAULT_ID_FORMAT, secret.as_bytes(), &blob)
            .unwrap();
        assert_eq!(loaded, secret);
        assert_eq!(attestation.public_key, public);
    }
}

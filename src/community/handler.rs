//! Host callbacks.
//!
//! The engine asks the host application three things: what value to certify
//! for a requested attribute, whether a peer may verify one of our
//! attestations, and (as a notification) that an issuance finished.

use crate::hash::HashKey;
use crate::transport::Peer;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Application hooks driven by the attestation flows.
///
/// Calls are awaited with no engine lock held.
#[async_trait]
pub trait AttestationHandler: Send + Sync {
    /// Value to certify for `attribute`, or `None` to refuse.
    async fn attribute_value(&self, peer: &Peer, attribute: &str, metadata: &str)
        -> Option<Vec<u8>>;

    /// Issuance finished. `from_peer` is the attestor when we are the subject,
    /// `None` when we are the attestor.
    async fn attestation_complete(
        &self,
        for_peer: &Peer,
        attribute: &str,
        hash: &HashKey,
        id_format: &str,
        from_peer: Option<&Peer>,
    );

    /// Whether `peer` may run a verification against the attestation `hash`.
    async fn authorize_verification(&self, peer: &Peer, hash: &HashKey) -> bool;
}

/// Record of a finished issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedAttestation {
    pub for_peer: Peer,
    pub attribute: String,
    pub hash: HashKey,
    pub id_format: String,
    pub from_peer: Option<Peer>,
}

/// Handler serving a fixed attribute table and a blanket verification policy.
#[derive(Debug, Clone, Default)]
pub struct StaticAttributeHandler {
    attributes: HashMap<String, Vec<u8>>,
    allow_verification: bool,
    completions: Arc<Mutex<Vec<CompletedAttestation>>>,
}

impl StaticAttributeHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: &str, value: &[u8]) -> Self {
        self.attributes.insert(name.to_string(), value.to_vec());
        self
    }

    pub fn allow_verification(mut self, allow: bool) -> Self {
        self.allow_verification = allow;
        self
    }

    /// Issuances completed so far.
    pub fn completions(&self) -> Vec<CompletedAttestation> {
        self.completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AttestationHandler for StaticAttributeHandler {
    async fn attribute_value(
        &self,
        peer: &Peer,
        attribute: &str,
        _metadata: &str,
    ) -> Option<Vec<u8>> {
        let value = self.attributes.get(attribute).cloned();
        if value.is_none() {
            info!(peer = %peer, attribute, "No value configured for requested attribute");
        }
        value
    }

    async fn attestation_complete(
        &self,
        for_peer: &Peer,
        attribute: &str,
        hash: &HashKey,
        id_format: &str,
        from_peer: Option<&Peer>,
    ) {
        info!(
            for_peer = %for_peer,
            attribute,
            hash = %hash.short(),
            id_format,
            "Attestation complete"
        );
        self.completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CompletedAttestation {
                for_peer: for_peer.clone(),
                attribute: attribute.to_string(),
                hash: hash.clone(),
                id_format: id_format.to_string(),
                from_peer: from_peer.cloned(),
            });
    }

    async fn authorize_verification(&self, _peer: &Peer, _hash: &HashKey) -> bool {
        self.allow_verification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::digest;

    fn peer() -> Peer {
        Peer::from_address("127.0.0.1:9000".parse().unwrap())
    }

    #[tokio::test]
    async fn test_static_attribute_lookup() {
        let handler = StaticAttributeHandler::new().with_attribute("age", &[0x2A]);
        assert_eq!(
            handler.attribute_value(&peer(), "age", "{}").await,
            Some(vec![0x2A])
        );
        assert_eq!(handler.attribute_value(&peer(), "name", "{}").await, None);
    }

    #[tokio::test]
    async fn test_verification_policy() {
        let deny = StaticAttributeHandler::new();
        assert!(!deny.authorize_verification(&peer(), &digest(b"h")).await);

        let allow = StaticAttributeHandler::new().allow_verification(true);
        assert!(allow.authorize_verification(&peer(), &digest(b"h")).await);
    }

    #[tokio::test]
    async fn test_completions_recorded() {
        let handler = StaticAttributeHandler::new();
        handler
            .attestation_complete(&peer(), "age", &digest(b"h"), "id_metadata", None)
            .await;

        let completions = handler.completions();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].attribute, "age");
        assert!(completions[0].from_peer.is_none());
    }
}

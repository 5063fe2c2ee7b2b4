//! Attestation issuance.
//!
//! ```text
//! Subject                                  Attestor
//!    | ATTESTATION_REQUEST (metadata, t) ->  |
//!    |                                       |  attribute_value()
//!    |                                       |  attest(), attestation_complete()
//!    |  <- ATTESTATION chunks (stamped t)    |
//!    |  reassemble, persist,                 |
//!    |  attestation_complete()               |
//! ```
//!
//! The subject accepts chunks from an attestor only under a global time it
//! stamped one of its own requests with.

use super::{AttestationCommunity, CommunityError};
use crate::algorithm::{SecretKey, DEFAULT_ID_FORMAT};
use crate::cache::{PendingAttestationRequest, Session};
use crate::hash::{digest, HashKey};
use crate::transport::Peer;
use crate::wire::{MessageId, RequestAttestationPayload};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

/// Fields an attestor reads from request metadata.
struct RequestMetadata {
    attribute: String,
    public_key: Vec<u8>,
    id_format: String,
}

impl RequestMetadata {
    fn parse(raw: &str) -> Result<Self, CommunityError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| CommunityError::Metadata(e.to_string()))?;
        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| CommunityError::Metadata(format!("missing string field '{}'", name)))
        };

        let public_key = BASE64
            .decode(field("public_key")?)
            .map_err(|e| CommunityError::Metadata(format!("public_key: {}", e)))?;

        Ok(Self {
            attribute: field("attribute")?,
            public_key,
            id_format: field("id_format")?,
        })
    }
}

impl AttestationCommunity {
    /// Ask `peer` to certify `attribute_name` for the holder of `secret_key`.
    ///
    /// `metadata` is an optional JSON object of extra fields; its `id_format`
    /// selects the algorithm (default `"id_metadata"`). Extra fields are sent
    /// along and take precedence over the generated ones.
    pub fn request_attestation(
        &self,
        peer: &Peer,
        attribute_name: &str,
        secret_key: &SecretKey,
        metadata: Option<&str>,
    ) -> Result<(), CommunityError> {
        let extra: Map<String, Value> = match metadata {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| CommunityError::Metadata(e.to_string()))?,
            None => Map::new(),
        };
        let id_format = extra
            .get("id_format")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_ID_FORMAT)
            .to_string();

        let algorithm = self.algorithms.get(&id_format)?;
        let public_key = algorithm.public_key(secret_key)?;

        let mut fields = Map::new();
        fields.insert("attribute".into(), Value::from(attribute_name));
        fields.insert(
            "public_key".into(),
            Value::from(BASE64.encode(public_key.as_bytes())),
        );
        fields.insert("id_format".into(), Value::from(id_format.as_str()));
        fields.extend(extra);
        let metadata_json = Value::Object(fields).to_string();

        let nonce = self.claim_global_time();
        self.cache
            .add(Session::AttestationRequest(PendingAttestationRequest::new(
                peer.id.clone(),
                nonce,
                secret_key.clone(),
                attribute_name,
                &id_format,
            )))?;
        self.allow_nonce(&peer.id, nonce);

        info!(
            peer = %peer,
            attribute = attribute_name,
            id_format = %id_format,
            nonce,
            "Sending attestation request"
        );
        self.send_message(
            peer.address,
            MessageId::AttestationRequest,
            nonce,
            &RequestAttestationPayload {
                metadata: metadata_json,
            },
        )
    }

    /// Attestor side: certify the requested attribute and stream it back.
    pub(super) async fn on_request_attestation(
        &self,
        peer: &Peer,
        global_time: u64,
        payload: RequestAttestationPayload,
    ) {
        info!(peer = %peer, "Received attestation request");

        let metadata = match RequestMetadata::parse(&payload.metadata) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Dropping attestation request");
                return;
            }
        };
        let algorithm = match self.algorithms.get(&metadata.id_format) {
            Ok(algorithm) => algorithm,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Dropping attestation request");
                return;
            }
        };

        let value = match self
            .handler
            .attribute_value(peer, &metadata.attribute, &payload.metadata)
            .await
        {
            Some(value) => value,
            None => {
                info!(
                    peer = %peer,
                    attribute = %metadata.attribute,
                    "Attribute value refused, dropping request"
                );
                return;
            }
        };

        let blob = match algorithm
            .load_public_key(&metadata.public_key)
            .and_then(|public_key| algorithm.attest(&public_key, &value))
        {
            Ok(blob) => blob,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Failed to attest attribute");
                return;
            }
        };
        if let Err(e) = algorithm.deserialize(&blob) {
            warn!(peer = %peer, error = %e, "Produced attestation does not parse");
            return;
        }
        let hash = digest(&blob);

        self.handler
            .attestation_complete(peer, &metadata.attribute, &hash, &metadata.id_format, None)
            .await;

        if let Err(e) = self.send_attestation(peer.address, &blob, global_time) {
            warn!(peer = %peer, error = %e, "Failed to send attestation");
        }
    }

    /// Subject side: feed a chunk into the request stamped `global_time`.
    ///
    /// Returns `false` when no such request is pending.
    pub(super) async fn on_issuance_chunk(
        &self,
        peer: &Peer,
        global_time: u64,
        hash: &HashKey,
        sequence_number: u32,
        data: Vec<u8>,
    ) -> bool {
        if !self.is_nonce_allowed(&peer.id, global_time) {
            return false;
        }
        let id = PendingAttestationRequest::id_for(&peer.id, global_time);

        let completed = {
            let mut guard = self.cache.lock();
            let Some(request) = guard
                .get_mut(&id)
                .and_then(Session::as_attestation_request_mut)
            else {
                return false;
            };

            self.accept_chunk(&mut request.chunks, peer, hash, sequence_number, data);
            debug!(
                peer = %peer,
                attribute = %request.attribute_name,
                sequence_number,
                "Received attestation chunk for my attribute"
            );

            match request.chunks.try_reassemble(hash) {
                Some(blob) => match guard.take(&id) {
                    Session::AttestationRequest(request) => Some((request, blob)),
                    _ => None,
                },
                None => None,
            }
        };

        if let Some((request, blob)) = completed {
            self.forget_nonce(&peer.id, global_time);
            self.complete_issuance(peer, request, hash, &blob).await;
        }
        true
    }

    async fn complete_issuance(
        &self,
        attestor: &Peer,
        request: PendingAttestationRequest,
        hash: &HashKey,
        blob: &[u8],
    ) {
        let algorithm = match self.algorithms.get(&request.id_format) {
            Ok(algorithm) => algorithm,
            Err(e) => {
                warn!(peer = %attestor, error = %e, "Dropping received attestation");
                return;
            }
        };
        if let Err(e) = algorithm.deserialize_private(&request.secret_key, blob) {
            warn!(peer = %attestor, hash = %hash.short(), error = %e, "Received attestation does not match our key");
            return;
        }

        self.remember_key(hash.clone(), request.secret_key.clone(), &request.id_format);
        if let Err(e) = self
            .store
            .insert_attestation(blob, hash, request.secret_key.as_bytes(), &request.id_format)
            .await
        {
            error!(hash = %hash.short(), error = %e, "Failed to persist attestation");
        }

        info!(
            peer = %attestor,
            attribute = %request.attribute_name,
            hash = %hash.short(),
            "Attestation received"
        );
        self.handler
            .attestation_complete(
                &self.me,
                &request.attribute_name,
                hash,
                &request.id_format,
                Some(attestor),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_parse() {
        let raw = format!(
            r#"{{"attribute":"age","public_key":"{}","id_format":"id_metadata","extra":1}}"#,
            BASE64.encode([1u8, 2, 3])
        );
        let metadata = RequestMetadata::parse(&raw).unwrap();
        assert_eq!(metadata.attribute, "age");
        assert_eq!(metadata.public_key, vec![1, 2, 3]);
        assert_eq!(metadata.id_format, "id_metadata");
    }

    #[test]
    fn test_metadata_missing_fields() {
        assert!(RequestMetadata::parse(r#"{"attribute":"age"}"#).is_err());
        assert!(RequestMetadata::parse("not json").is_err());
        assert!(RequestMetadata::parse(
            r#"{"attribute":"age","public_key":"@@@","id_format":"id_metadata"}"#
        )
        .is_err());
    }
}

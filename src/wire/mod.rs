//! Wire messages of the attestation service.
//!
//! Every datagram is a [`Packet`] envelope carrying the service id, the
//! message id, the sender's global time and a CBOR-encoded payload.
//!
//! | id | message                    | payload                                  |
//! |----|----------------------------|------------------------------------------|
//! | 1  | VERIFY_ATTESTATION_REQUEST | [`VerifyAttestationRequestPayload`]      |
//! | 2  | ATTESTATION                | [`AttestationChunkPayload`]              |
//! | 3  | CHALLENGE                  | [`ChallengePayload`]                     |
//! | 4  | CHALLENGE_RESPONSE         | [`ChallengeResponsePayload`]             |
//! | 5  | ATTESTATION_REQUEST        | [`RequestAttestationPayload`]            |

use crate::hash::HashKey;
use crate::serialization::{from_cbor, to_cbor, SerializationError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Identifier of the attestation service on the overlay.
pub const SERVICE_ID: &str = "b42c93d167a0fc4a0843f917d4bf1e9ebb340ec4";

/// Wire-level errors
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Packet for foreign service: {0}")]
    ServiceMismatch(String),

    #[error("Unknown message id: {0}")]
    UnknownMessage(u8),
}

/// Message ids of the attestation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageId {
    VerifyAttestationRequest = 1,
    Attestation = 2,
    Challenge = 3,
    ChallengeResponse = 4,
    AttestationRequest = 5,
}

impl TryFrom<u8> for MessageId {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageId::VerifyAttestationRequest),
            2 => Ok(MessageId::Attestation),
            3 => Ok(MessageId::Challenge),
            4 => Ok(MessageId::ChallengeResponse),
            5 => Ok(MessageId::AttestationRequest),
            other => Err(WireError::UnknownMessage(other)),
        }
    }
}

/// Ask a prover to disclose the attestation with `hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyAttestationRequestPayload {
    pub hash: HashKey,
}

/// One chunk of an attestation blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationChunkPayload {
    /// Digest of the whole blob
    pub hash: HashKey,
    pub sequence_number: u32,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengePayload {
    pub attestation_hash: HashKey,
    #[serde(with = "serde_bytes")]
    pub challenge: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponsePayload {
    /// Digest of the challenge bytes being answered
    pub challenge_hash: HashKey,
    #[serde(with = "serde_bytes")]
    pub response: Vec<u8>,
}

/// Ask an attestor to certify an attribute; `metadata` is a JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAttestationPayload {
    pub metadata: String,
}

/// Datagram envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub service_id: String,
    pub message_id: u8,
    pub global_time: u64,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl Packet {
    /// Encode a payload into envelope bytes for this service.
    pub fn encode<P: Serialize>(
        message_id: MessageId,
        global_time: u64,
        payload: &P,
    ) -> Result<Vec<u8>, WireError> {
        let packet = Packet {
            service_id: SERVICE_ID.to_string(),
            message_id: message_id as u8,
            global_time,
            payload: to_cbor(payload)?,
        };
        Ok(to_cbor(&packet)?)
    }

    /// Decode an envelope, rejecting packets addressed to another service.
    pub fn decode(bytes: &[u8]) -> Result<Packet, WireError> {
        let packet: Packet = from_cbor(bytes)?;
        if packet.service_id != SERVICE_ID {
            return Err(WireError::ServiceMismatch(packet.service_id));
        }
        Ok(packet)
    }

    pub fn message(&self) -> Result<MessageId, WireError> {
        MessageId::try_from(self.message_id)
    }

    pub fn payload<P: DeserializeOwned>(&self) -> Result<P, WireError> {
        Ok(from_cbor(&self.payload)?)
    }
}

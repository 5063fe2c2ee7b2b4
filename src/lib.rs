//! zkattest - Peer-to-peer attribute attestation with zero-knowledge verification
//!
//! One peer (the attestor) certifies an attribute of another peer (the
//! subject). A third peer (the verifier) later runs an interactive
//! challenge/response proof against the subject to learn how likely it is
//! that the certified value equals a claimed one, without learning the value.
//!
//! Key principles:
//! - Blobs travel in bounded chunks over an unreliable datagram transport
//! - Every waiting flow is a record in a time-bounded correlation store
//! - Commitment math is pluggable behind [`algorithm::IdentityAlgorithm`]
//! - Randomly interleaved honesty probes catch a cheating prover

pub mod algorithm;
pub mod cache;
pub mod community;
pub mod hash;
pub mod serialization;
pub mod store;
pub mod transfer;
pub mod transport;
pub mod wire;

pub use community::{AttestationCommunity, CommunityConfig, CommunityError};

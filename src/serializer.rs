//! Tags every payload with a stable *type fingerprint* so a mailbox matcher can decide whether a
//! message is worth decoding before it attempts to decode it (spec §4.1, §6).
//!
//! Fingerprints are derived from [`std::any::type_name`], which is stable within one compiled
//! binary (the unit of deployment for this crate — see SPEC_FULL.md §6) but is explicitly *not*
//! guaranteed across compiler versions or crates; that matches the spec's requirement that
//! fingerprints be "collision-resistant across versions", not portable across them.

use std::any::type_name;
use std::hash::{Hash, Hasher};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::CoreError;

/// A stable digest of a payload's static type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Computes the fingerprint of `T`.
    pub fn of<T>() -> Self
    where
        T: ?Sized,
    {
        // FxHash-style fixed-seed hasher: deterministic across runs of the same binary, which is
        // all the spec requires (fingerprints are never persisted or compared across builds).
        let mut hasher = FingerprintHasher(0xcbf29ce484222325);
        type_name::<T>().hash(&mut hasher);
        Fingerprint(hasher.0)
    }
}

struct FingerprintHasher(u64);

impl Hasher for FingerprintHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        // FNV-1a, chosen for being branch-free and not pulling in an extra crate just for this.
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(0x100000001b3);
        }
    }
}

/// Encodes `value` into the bytes a [`crate::message::Message`] carries. `bincode` by default (the
/// spec leaves the concrete format to the implementation, §6); `json_serializer` or
/// `msgpack_serializer` swap the whole crate onto a different wire format, same as the teacher
/// library's feature-gated `Serializer` implementations. Exactly one of these formats is compiled
/// in; the fingerprint in `Message` is what crosses formats unambiguously, not the bytes.
#[cfg(not(any(feature = "json_serializer", feature = "msgpack_serializer")))]
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    bincode::serialize(value).map_err(CoreError::from)
}

#[cfg(not(any(feature = "json_serializer", feature = "msgpack_serializer")))]
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CoreError> {
    bincode::deserialize(bytes).map_err(CoreError::from)
}

#[cfg(all(feature = "json_serializer", not(feature = "msgpack_serializer")))]
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    serde_json::to_vec(value).map_err(|err| CoreError::Decode(bincode::Error::new(bincode::ErrorKind::Custom(err.to_string()))))
}

#[cfg(all(feature = "json_serializer", not(feature = "msgpack_serializer")))]
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CoreError> {
    serde_json::from_slice(bytes).map_err(|err| CoreError::Decode(bincode::Error::new(bincode::ErrorKind::Custom(err.to_string()))))
}

#[cfg(feature = "msgpack_serializer")]
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    rmp_serde::to_vec(value).map_err(|err| CoreError::Decode(bincode::Error::new(bincode::ErrorKind::Custom(err.to_string()))))
}

#[cfg(feature = "msgpack_serializer")]
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CoreError> {
    rmp_serde::from_slice(bytes).map_err(|err| CoreError::Decode(bincode::Error::new(bincode::ErrorKind::Custom(err.to_string()))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_same_type() {
        assert_eq!(Fingerprint::of::<i32>(), Fingerprint::of::<i32>());
    }

    #[test]
    fn fingerprint_differs_across_types() {
        assert_ne!(Fingerprint::of::<i32>(), Fingerprint::of::<String>());
    }

    #[test]
    fn round_trips_through_bincode() {
        let bytes = encode(&42i32).unwrap();
        let back: i32 = decode(&bytes).unwrap();
        assert_eq!(back, 42);
    }
}

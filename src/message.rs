//! The wire-level message shape: a type fingerprint paired with its encoded bytes (spec §3).
//!
//! A [`Message`] is deliberately opaque — decoding is only ever attempted by a
//! [`crate::mailbox::Matcher`] whose expected fingerprint equals the message's own, per spec §4.1.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::CoreError;
use crate::serializer::{self, Fingerprint};

/// A fingerprinted, encoded payload sitting in a mailbox or in flight on the wire.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct Message {
    fingerprint: Fingerprint,
    bytes: Vec<u8>,
}

impl Message {
    /// Encodes `value` into a `Message` tagged with its fingerprint.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, CoreError>
    where
        T: 'static,
    {
        Ok(Message {
            fingerprint: Fingerprint::of::<T>(),
            bytes: serializer::encode(value)?,
        })
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Decodes the message as `T`, without checking the fingerprint first. Callers that already
    /// know `fingerprint() == Fingerprint::of::<T>()` (i.e. every [`crate::mailbox::Matcher`]) use
    /// this; anyone else should check first, since a mismatched fingerprint simply means this
    /// message cannot possibly be a `T` and decoding would only produce garbage or an error.
    pub fn decode<T: DeserializeOwned + 'static>(&self) -> Result<T, CoreError> {
        serializer::decode(&self.bytes)
    }

    /// True if `self` was encoded from a value of static type `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.fingerprint == Fingerprint::of::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_back_its_own_type() {
        let msg = Message::encode(&7i32).unwrap();
        assert!(msg.is::<i32>());
        assert!(!msg.is::<String>());
        assert_eq!(msg.decode::<i32>().unwrap(), 7);
    }
}

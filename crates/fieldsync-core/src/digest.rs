//! Payload integrity digests.
//!
//! Queue payloads are immutable once written. A Blake3 digest is recorded at
//! enqueue time and re-checked before transmission so a corrupted payload is
//! never sent.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte Blake3 digest of a queue item payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadDigest(pub [u8; 32]);

impl PayloadDigest {
    /// Compute the digest of the given payload.
    pub fn compute(payload: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"fieldsync-payload-v0:");
        hasher.update(payload);
        Self(*hasher.finalize().as_bytes())
    }

    /// Check that `payload` still matches this digest.
    pub fn verify(&self, payload: &[u8]) -> bool {
        Self::compute(payload) == *self
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for PayloadDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayloadDigest({})", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for PayloadDigest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for PayloadDigest {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = slice.try_into()?;
        Ok(Self(arr))
    }
}

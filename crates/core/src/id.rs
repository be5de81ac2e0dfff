// SPDX-License-Identifier: Apache-2.0

//! Hashed identifiers for configured paths.

use std::fmt;

use serde::{Deserialize, Serialize};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Opaque fingerprint of a textual identifier (process path, process-group
/// path, state path). Every cross-component reference uses this type; the
/// underlying strings are only held by the configuration loader.
///
/// The hash is FNV-1a over the UTF-8 bytes, so the same path hashes to the
/// same value in every process on the machine.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct IdentifierHash(u64);

impl IdentifierHash {
    /// Hash an identifier path.
    pub const fn of(id: &str) -> Self {
        let bytes = id.as_bytes();
        let mut hash = FNV_OFFSET;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
            i += 1;
        }
        Self(hash)
    }

    /// Reconstruct an identifier from a raw value taken off a wire record.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw fingerprint, for embedding in wire records.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Hash of the implicit `"Off"` state name.
pub const OFF_STATE: IdentifierHash = IdentifierHash::of("Off");

/// Hash of the implicit `"Recovery"` state name.
pub const RECOVERY_STATE: IdentifierHash = IdentifierHash::of("Recovery");

impl fmt::Display for IdentifierHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<&str> for IdentifierHash {
    fn from(s: &str) -> Self {
        Self::of(s)
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;

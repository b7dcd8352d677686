// Shared ring math and wire types for Chord peers
pub mod address;
pub mod dht_messages;
pub mod error;
pub mod snapshot;

pub use address::Address;
pub use error::ProtocolError;

use num_bigint::BigUint;
use num_traits::One;
use sha1::{Digest, Sha1};

/// Position of a node or a key on the ring.
pub type ChordId = BigUint;

/// SHA-1 yields 160 bits, so wider rings would never be fully populated.
pub const MAX_RING_BITS: u32 = 160;

/// The modular identifier space `[0, 2^m)` shared by every node of a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingSpace {
    bits: u32,
}

impl RingSpace {
    pub fn new(bits: u32) -> Result<Self, ProtocolError> {
        if bits == 0 || bits > MAX_RING_BITS {
            return Err(ProtocolError::RingWidth(bits));
        }
        Ok(Self { bits })
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of identifiers on the ring, `2^m`.
    pub fn size(&self) -> BigUint {
        BigUint::one() << self.bits
    }

    /// Hashes `key` with SHA-1 and reduces the digest into the ring.
    pub fn identifier_of(&self, key: &[u8]) -> ChordId {
        let digest = Sha1::digest(key);
        BigUint::from_bytes_be(digest.as_slice()) % self.size()
    }

    pub fn node_identifier(&self, host: &str, port: u16) -> ChordId {
        self.identifier_of(format!("{}:{}", host, port).as_bytes())
    }

    /// First identifier covered by finger `index`: `(id + 2^index) mod 2^m`.
    pub fn finger_start(&self, id: &ChordId, index: u32) -> ChordId {
        (id + (BigUint::one() << index)) % self.size()
    }

    pub fn contains(&self, id: &ChordId) -> bool {
        *id < self.size()
    }
}

/// Checks whether `value` lies on the clockwise arc that starts right after
/// `left` and ends at `right`.
///
/// `left` itself is never on the arc; `right` is on it only when `inclusive`
/// is set. When `left == right` the arc spans the whole ring, which is what a
/// single-node ring needs.
pub fn is_between(left: &ChordId, value: &ChordId, right: &ChordId, inclusive: bool) -> bool {
    if left == right {
        return true;
    }
    let before_right = value < right || (inclusive && value == right);
    if left < right {
        left < value && before_right
    } else {
        // Wraps around zero
        left < value || before_right
    }
}

/// Parses the decimal text form of an identifier. Only ASCII digits are
/// accepted: no sign, no separators.
pub fn parse_identifier(text: &str) -> Result<ChordId, ProtocolError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::MalformedIdentifier(text.to_string()));
    }
    BigUint::parse_bytes(text.as_bytes(), 10)
        .ok_or_else(|| ProtocolError::MalformedIdentifier(text.to_string()))
}

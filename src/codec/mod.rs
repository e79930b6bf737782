//! Walk codec: packs `(source, offset, hop)` into a single fixed-width
//! 64-bit word, and back.
//!
//! Field widths are a deployment parameter (not a compile-time constant)
//! because the right split depends on `N` (how many bits `source` needs)
//! and `L` (how many bits `hop` needs). Encode/decode are total and
//! branch-free for in-range inputs; out-of-range inputs are rejected by
//! `CodecFields::validate` at startup rather than silently truncated.

use crate::error::EngineError;

/// Bit-width split of the packed walk word. `source_bits + offset_bits +
/// hop_bits` must not exceed 64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecFields {
    pub source_bits: u32,
    pub offset_bits: u32,
    pub hop_bits: u32,
}

impl Default for CodecFields {
    fn default() -> Self {
        Self {
            source_bits: 28,
            offset_bits: 28,
            hop_bits: 8,
        }
    }
}

impl CodecFields {
    fn total_bits(&self) -> u32 {
        self.source_bits + self.offset_bits + self.hop_bits
    }

    fn source_max(&self) -> u64 {
        (1u64 << self.source_bits) - 1
    }

    fn offset_max(&self) -> u64 {
        (1u64 << self.offset_bits) - 1
    }

    fn hop_max(&self) -> u64 {
        (1u64 << self.hop_bits) - 1
    }

    /// Validates the split against the configured vertex count `n` and
    /// maximum walk length `l`. This is what turns a misconfigured field
    /// split into a `ConfigInvalid` at startup instead of a `CodecOverflow`
    /// mid-run.
    pub fn validate(&self, n: u64, max_shard_width: u64, l: u64) -> Result<(), EngineError> {
        if self.total_bits() > 64 {
            return Err(EngineError::ConfigInvalid(format!(
                "codec field widths {:?} exceed 64 bits",
                self
            )));
        }
        if n > 0 && self.source_max() < n - 1 {
            return Err(EngineError::ConfigInvalid(format!(
                "source field width {} bits cannot address {} vertices",
                self.source_bits, n
            )));
        }
        if max_shard_width > 0 && self.offset_max() < max_shard_width - 1 {
            return Err(EngineError::ConfigInvalid(format!(
                "offset field width {} bits cannot address a shard of width {}",
                self.offset_bits, max_shard_width
            )));
        }
        if self.hop_max() < l {
            return Err(EngineError::ConfigInvalid(format!(
                "hop field width {} bits cannot reach max walk length {}",
                self.hop_bits, l
            )));
        }
        Ok(())
    }

    /// Encodes `(source, offset, hop)` into a packed word.
    pub fn encode(&self, source: u64, offset: u64, hop: u64) -> Result<u64, EngineError> {
        if source > self.source_max() || offset > self.offset_max() || hop > self.hop_max() {
            return Err(EngineError::CodecOverflow {
                source,
                offset,
                hop,
                fields: *self,
            });
        }
        let word = (source << (self.offset_bits + self.hop_bits))
            | (offset << self.hop_bits)
            | hop;
        Ok(word)
    }

    /// Decodes a packed word into `(source, offset, hop)`.
    pub fn decode(&self, word: u64) -> (u64, u64, u64) {
        let hop = word & self.hop_max();
        let offset = (word >> self.hop_bits) & self.offset_max();
        let source = word >> (self.offset_bits + self.hop_bits);
        (source, offset, hop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_default_fields() {
        let fields = CodecFields::default();
        for &(s, o, h) in &[(0u64, 0u64, 0u64), (12345, 999, 20), (0xFFF_FFFF, 0xFFF_FFFF, 0xFF)]
        {
            let word = fields.encode(s, o, h).unwrap();
            assert_eq!(fields.decode(word), (s, o, h));
        }
    }

    #[test]
    fn overflow_is_rejected_not_truncated() {
        let fields = CodecFields::default();
        assert!(fields.encode(1 << 28, 0, 0).is_err());
        assert!(fields.encode(0, 1 << 28, 0).is_err());
        assert!(fields.encode(0, 0, 1 << 8).is_err());
    }

    #[test]
    fn validate_catches_undersized_hop_field() {
        let fields = CodecFields {
            source_bits: 28,
            offset_bits: 28,
            hop_bits: 4,
        };
        assert!(fields.validate(1000, 1000, 20).is_err());
    }

    #[test]
    fn validate_accepts_sane_split() {
        let fields = CodecFields::default();
        assert!(fields.validate(1_000_000, 100_000, 100).is_ok());
    }
}

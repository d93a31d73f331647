//! Copy Scheme
//!
//! The redundancy family applied per checkpoint. `Xor` carries its set
//! size; `Single` and `Partner` take no parameters.

use std::fmt;

use crate::erasure::SchemeEncoding;
use crate::error::{Error, Result};

/// Redundancy scheme family for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyScheme {
    /// Files live on their own rank only; no cross-rank redundancy
    Single,
    /// Each rank's files are mirrored by a ring partner
    Partner,
    /// Parity groups of `set_size` ranks tolerate one loss per group
    Xor { set_size: u32 },
}

impl CopyScheme {
    /// Parse a configuration token, case-insensitively. `set_size` is
    /// attached when the token selects XOR.
    pub fn parse(value: &str, set_size: u32) -> Result<Self> {
        if value.eq_ignore_ascii_case("SINGLE") {
            Ok(CopyScheme::Single)
        } else if value.eq_ignore_ascii_case("PARTNER") {
            Ok(CopyScheme::Partner)
        } else if value.eq_ignore_ascii_case("XOR") {
            Ok(CopyScheme::Xor { set_size })
        } else {
            Err(Error::UnknownCopyType(value.to_string()))
        }
    }

    /// Canonical configuration token.
    pub fn token(&self) -> &'static str {
        match self {
            CopyScheme::Single => "SINGLE",
            CopyScheme::Partner => "PARTNER",
            CopyScheme::Xor { .. } => "XOR",
        }
    }

    /// Replace the set size when the scheme carries one.
    pub fn with_set_size(self, set_size: u32) -> Self {
        match self {
            CopyScheme::Xor { .. } => CopyScheme::Xor { set_size },
            other => other,
        }
    }

    /// The erasure-layer encoding this scheme maps to.
    pub fn encoding(&self) -> SchemeEncoding {
        match *self {
            CopyScheme::Single => SchemeEncoding::None,
            CopyScheme::Partner => SchemeEncoding::Mirror,
            CopyScheme::Xor { set_size } => SchemeEncoding::Parity { set_size },
        }
    }
}

impl fmt::Display for CopyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_tokens() {
        assert_eq!(CopyScheme::parse("SINGLE", 4).unwrap(), CopyScheme::Single);
        assert_eq!(CopyScheme::parse("PARTNER", 4).unwrap(), CopyScheme::Partner);
        assert_eq!(
            CopyScheme::parse("XOR", 4).unwrap(),
            CopyScheme::Xor { set_size: 4 }
        );
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(CopyScheme::parse("single", 4).unwrap(), CopyScheme::Single);
        assert_eq!(CopyScheme::parse("Partner", 4).unwrap(), CopyScheme::Partner);
        assert_eq!(
            CopyScheme::parse("xOr", 2).unwrap(),
            CopyScheme::Xor { set_size: 2 }
        );
    }

    #[test]
    fn test_parse_unknown_token() {
        assert!(matches!(
            CopyScheme::parse("RAID6", 4),
            Err(Error::UnknownCopyType(_))
        ));
    }

    #[test]
    fn test_display_emits_canonical_uppercase() {
        assert_eq!(CopyScheme::Single.to_string(), "SINGLE");
        assert_eq!(CopyScheme::Partner.to_string(), "PARTNER");
        assert_eq!(CopyScheme::Xor { set_size: 8 }.to_string(), "XOR");
    }

    #[test]
    fn test_with_set_size_only_affects_xor() {
        assert_eq!(
            CopyScheme::Xor { set_size: 8 }.with_set_size(2),
            CopyScheme::Xor { set_size: 2 }
        );
        assert_eq!(CopyScheme::Partner.with_set_size(2), CopyScheme::Partner);
    }
}

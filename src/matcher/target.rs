//! Target address representation.

use std::fmt;

use crate::crypto::decode_p2pkh;

/// Byte-exact address comparison.
#[inline]
pub fn matches(address: &str, target: &str) -> bool {
    address.as_bytes() == target.as_bytes()
}

/// The address a run is searching for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    address: String,
}

impl Target {
    /// Creates a target from the verbatim address string.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Returns true when the target has no characters.
    pub fn is_empty(&self) -> bool {
        self.address.is_empty()
    }

    /// Matches a derived address against this target.
    #[inline]
    pub fn matches(&self, address: &str) -> bool {
        matches(address, &self.address)
    }

    /// Decodes the target as a P2PKH address, if it is one.
    pub fn hash160(&self) -> Option<[u8; 20]> {
        decode_p2pkh(&self.address)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_ONE: &str = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH";

    #[test]
    fn test_exact_match() {
        let target = Target::new(KEY_ONE);
        assert!(target.matches(KEY_ONE));
    }

    #[test]
    fn test_no_normalization() {
        let target = Target::new(KEY_ONE);
        assert!(!target.matches(&KEY_ONE.to_lowercase()));
        assert!(!target.matches(&format!("{} ", KEY_ONE)));
        assert!(!Target::new(format!(" {}", KEY_ONE)).matches(KEY_ONE));
    }

    #[test]
    fn test_prefix_is_not_a_match() {
        let target = Target::new(KEY_ONE);
        assert!(!target.matches(&KEY_ONE[..10]));
    }

    #[test]
    fn test_hash160() {
        let target = Target::new(KEY_ONE);
        assert_eq!(
            hex::encode(target.hash160().unwrap()),
            "751e76e8199196d454941c45d1b3a323f1433bd6"
        );
        assert!(Target::new("unreachable").hash160().is_none());
    }
}

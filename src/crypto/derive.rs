//! Scalar to address derivation.

use std::fmt;

use secp256k1::{PublicKey, Secp256k1, SecretKey, SignOnly};

use super::address::{encode_p2pkh_into, hash160, AddressFormat};

/// Errors raised by address derivation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeriveError {
    /// The scalar is not a valid secp256k1 secret key (zero).
    #[error("Invalid scalar {0}: must be in [1, n-1]")]
    InvalidScalar(u64),
    #[error("Base58 encoding failed: {0}")]
    Encode(#[from] bs58::encode::Error),
}

/// Maps a private-key scalar to its canonical address string.
///
/// Implementations must be pure: the same scalar always produces the same
/// address, and nothing observable changes between calls.
pub trait AddressDerivation: Send + Sync {
    /// Writes the address for `scalar` into `out`, replacing its contents.
    fn derive_into(&self, scalar: u64, out: &mut String) -> Result<(), DeriveError>;

    /// Returns the address for `scalar`.
    fn derive(&self, scalar: u64) -> Result<String, DeriveError> {
        let mut out = String::new();
        self.derive_into(scalar, &mut out)?;
        Ok(out)
    }
}

/// Big-endian 32-byte secret key for a 64-bit scalar.
#[inline]
pub fn secret_bytes(scalar: u64) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&scalar.to_be_bytes());
    bytes
}

/// Mainnet P2PKH derivation over secp256k1.
///
/// Holds one precomputed signing context; share it between workers behind an
/// `Arc` instead of building one per thread. With
/// [`AddressFormat::SecretHash`] the context goes unused.
pub struct P2pkhDerivation {
    secp: Secp256k1<SignOnly>,
    format: AddressFormat,
}

impl P2pkhDerivation {
    /// Creates a derivation for the given public key serialization.
    pub fn new(format: AddressFormat) -> Self {
        Self {
            secp: Secp256k1::signing_only(),
            format,
        }
    }

    /// Returns the public key serialization in use.
    pub fn format(&self) -> AddressFormat {
        self.format
    }

    /// Derives the secp256k1 public key for `scalar`.
    #[inline]
    pub fn public_key(&self, scalar: u64) -> Result<PublicKey, DeriveError> {
        if scalar == 0 {
            return Err(DeriveError::InvalidScalar(scalar));
        }
        // Every non-zero u64 is below the group order.
        let secret = SecretKey::from_slice(&secret_bytes(scalar))
            .map_err(|_| DeriveError::InvalidScalar(scalar))?;
        Ok(PublicKey::from_secret_key(&self.secp, &secret))
    }

    /// Returns the HASH160 that goes into the address for `scalar`.
    #[inline]
    pub fn address_hash(&self, scalar: u64) -> Result<[u8; 20], DeriveError> {
        let hash = match self.format {
            AddressFormat::Compressed => hash160(&self.public_key(scalar)?.serialize()),
            AddressFormat::Uncompressed => {
                hash160(&self.public_key(scalar)?.serialize_uncompressed())
            }
            AddressFormat::SecretHash => {
                if scalar == 0 {
                    return Err(DeriveError::InvalidScalar(scalar));
                }
                hash160(&secret_bytes(scalar))
            }
        };
        Ok(hash)
    }
}

impl AddressDerivation for P2pkhDerivation {
    #[inline]
    fn derive_into(&self, scalar: u64, out: &mut String) -> Result<(), DeriveError> {
        let hash = self.address_hash(scalar)?;
        encode_p2pkh_into(&hash, out)?;
        Ok(())
    }
}

impl fmt::Debug for P2pkhDerivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("P2pkhDerivation")
            .field("format", &self.format)
            .finish()
    }
}

/// One-off derivation of the address for `scalar`.
///
/// Builds a fresh context on every call; hot loops should hold a
/// [`P2pkhDerivation`] instead.
pub fn derive_address(scalar: u64, format: AddressFormat) -> Result<String, DeriveError> {
    P2pkhDerivation::new(format).derive(scalar)
}

//! Bitcoin P2PKH address and WIF encoding.

use std::fmt;
use std::str::FromStr;

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Version byte of a mainnet P2PKH address.
pub const P2PKH_VERSION: u8 = 0x00;

/// Version byte of a mainnet WIF private key.
pub const WIF_VERSION: u8 = 0x80;

/// Longest Base58Check payload we encode: WIF version + key + compression flag.
const MAX_PAYLOAD_LEN: usize = 1 + 32 + 1;

/// Capacity that lets [`encode_p2pkh_into`] reuse a buffer without growing it.
/// Base58 reserves `len + (len + 1) / 2` bytes for the 25-byte payload.
pub const ADDRESS_BUF_CAPACITY: usize = 38;

/// What gets hashed into the P2PKH address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFormat {
    /// 33-byte SEC1 compressed point
    #[default]
    Compressed,
    /// 65-byte SEC1 uncompressed point
    Uncompressed,
    /// The padded 32-byte secret itself, no curve multiplication. Matches
    /// addresses produced by tools that hash the private key directly; such
    /// addresses cannot be spent with the key.
    SecretHash,
}

impl AddressFormat {
    /// Returns true unless the uncompressed public key is used.
    ///
    /// Decides the WIF compression flag on export.
    #[inline]
    pub fn is_compressed(self) -> bool {
        !matches!(self, AddressFormat::Uncompressed)
    }
}

impl FromStr for AddressFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compressed" | "c" => Ok(AddressFormat::Compressed),
            "uncompressed" | "u" | "legacy" => Ok(AddressFormat::Uncompressed),
            "secret-hash" | "secret" | "s" => Ok(AddressFormat::SecretHash),
            _ => Err(format!("Unknown address format: {}", s)),
        }
    }
}

impl fmt::Display for AddressFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFormat::Compressed => write!(f, "compressed"),
            AddressFormat::Uncompressed => write!(f, "uncompressed"),
            AddressFormat::SecretHash => write!(f, "secret-hash"),
        }
    }
}

/// RIPEMD160(SHA256(data)).
#[inline]
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

/// First four bytes of SHA256(SHA256(payload)).
#[inline]
fn checksum(payload: &[u8]) -> [u8; 4] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut out = [0u8; 4];
    out.copy_from_slice(&second[..4]);
    out
}

/// Copies `payload` followed by its checksum into `buf`, returning the length.
fn with_checksum(payload: &[u8], buf: &mut [u8; MAX_PAYLOAD_LEN + 4]) -> usize {
    debug_assert!(payload.len() <= MAX_PAYLOAD_LEN);
    let len = payload.len() + 4;
    buf[..payload.len()].copy_from_slice(payload);
    buf[payload.len()..len].copy_from_slice(&checksum(payload));
    len
}

/// Base58Check-encodes `payload` (at most 34 bytes).
fn base58check(payload: &[u8]) -> String {
    let mut buf = [0u8; MAX_PAYLOAD_LEN + 4];
    let len = with_checksum(payload, &mut buf);
    bs58::encode(&buf[..len]).into_string()
}

fn p2pkh_payload(hash: &[u8; 20]) -> [u8; 21] {
    let mut payload = [0u8; 21];
    payload[0] = P2PKH_VERSION;
    payload[1..].copy_from_slice(hash);
    payload
}

/// Encodes a public key hash as a mainnet P2PKH address into `out`,
/// replacing its contents and reusing its allocation.
#[inline]
pub fn encode_p2pkh_into(hash: &[u8; 20], out: &mut String) -> Result<(), bs58::encode::Error> {
    let mut buf = [0u8; MAX_PAYLOAD_LEN + 4];
    let len = with_checksum(&p2pkh_payload(hash), &mut buf);
    out.clear();
    bs58::encode(&buf[..len]).onto(out)?;
    Ok(())
}

/// Decodes a mainnet P2PKH address back to its public key hash.
///
/// Returns `None` for anything that is not valid Base58Check with the
/// P2PKH version byte.
pub fn decode_p2pkh(address: &str) -> Option<[u8; 20]> {
    let bytes = bs58::decode(address).into_vec().ok()?;
    if bytes.len() != 25 || bytes[0] != P2PKH_VERSION {
        return None;
    }
    if checksum(&bytes[..21]) != bytes[21..] {
        return None;
    }

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&bytes[1..21]);
    Some(hash)
}

/// Encodes a 32-byte secret key in Wallet Import Format.
pub fn encode_wif(secret: &[u8; 32], compressed: bool) -> String {
    let mut payload = [0u8; MAX_PAYLOAD_LEN];
    payload[0] = WIF_VERSION;
    payload[1..33].copy_from_slice(secret);

    if compressed {
        payload[33] = 0x01;
        base58check(&payload)
    } else {
        base58check(&payload[..33])
    }
}

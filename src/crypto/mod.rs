//! Private-key scalar to Bitcoin address derivation.
//!
//! This module provides:
//! - secp256k1 public key derivation from 64-bit scalars
//! - a secret-hash scheme that skips the curve
//! - P2PKH address encoding (Base58Check over HASH160)
//! - WIF export for found keys

mod address;
mod derive;

pub use address::{
    decode_p2pkh, encode_p2pkh_into, encode_wif, hash160, AddressFormat,
    ADDRESS_BUF_CAPACITY,
};
pub use derive::{derive_address, secret_bytes, AddressDerivation, DeriveError, P2pkhDerivation};

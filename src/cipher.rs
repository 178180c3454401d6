//! Blowfish framing for directory blocks
//!
//! Directory blocks always pass through this adapter on their way to and
//! from disk; header and raw file content never do. The working key is the
//! caller's passphrase XOR-combined with a fixed, format-defined base key.
//!
//! The key check is weak by contract: only the first 3 bytes of the encoded
//! check plaintext participate. That is the format, not a defect to repair.

use blowfish::cipher::{Block, BlockDecrypt, BlockEncrypt, KeyInit};
use blowfish::BlowfishLE;

use crate::error::{PackError, Result};

/// Base key every working key is derived against.
pub const BASE_KEY: [u8; 10] = [0x03, 0xF8, 0xE4, 0x44, 0x88, 0x99, 0x3F, 0x64, 0xFE, 0x35];

/// Plaintext encoded with the working key to produce the header checksum.
pub const CHECKSUM_PLAINTEXT: &[u8] = b"Joymax Pack File";

/// Number of checksum bytes that are actually compared.
pub const CHECKSUM_CHECKED_BYTES: usize = 3;

/// Cipher block width; directory records are multiples of this.
pub const CIPHER_BLOCK_SIZE: usize = 8;

const MAX_KEY_BYTES: usize = 56;

/// Blowfish adapter holding a derived working key.
///
/// The format uses the little-endian word variant of Blowfish, hence
/// [`BlowfishLE`].
pub struct PackCipher {
    cipher: BlowfishLE,
}

impl PackCipher {
    /// Derive a working key from `passphrase` and the format base key.
    pub fn new(passphrase: &str) -> Result<Self> {
        Self::with_base_key(passphrase.as_bytes(), &BASE_KEY)
    }

    /// Derive a working key against a caller-supplied base key.
    ///
    /// The passphrase is truncated to 56 bytes; each byte is XORed with the
    /// corresponding byte of the zero-extended base key. Blowfish itself
    /// requires 4 to 56 key bytes.
    pub fn with_base_key(passphrase: &[u8], base_key: &[u8]) -> Result<Self> {
        let len = passphrase.len().min(MAX_KEY_BYTES);

        let mut expanded = [0u8; MAX_KEY_BYTES];
        let base_len = base_key.len().min(MAX_KEY_BYTES);
        expanded[..base_len].copy_from_slice(&base_key[..base_len]);

        let working: Vec<u8> = passphrase[..len]
            .iter()
            .zip(expanded.iter())
            .map(|(p, b)| p ^ b)
            .collect();

        let cipher = BlowfishLE::new_from_slice(&working)
            .map_err(|_| PackError::InvalidArgument("cipher passphrase must be 4 to 56 bytes"))?;

        Ok(PackCipher { cipher })
    }

    /// Encode whole 8-byte blocks; a trailing partial block is copied
    /// through unmodified.
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        for chunk in out.chunks_exact_mut(CIPHER_BLOCK_SIZE) {
            let block = Block::<BlowfishLE>::from_mut_slice(chunk);
            self.cipher.encrypt_block(block);
        }
        out
    }

    /// Inverse of [`PackCipher::encode`].
    pub fn decode(&self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        for chunk in out.chunks_exact_mut(CIPHER_BLOCK_SIZE) {
            let block = Block::<BlowfishLE>::from_mut_slice(chunk);
            self.cipher.decrypt_block(block);
        }
        out
    }

    /// Checksum field content for a fresh header: the first 3 bytes of the
    /// encoded check plaintext, the rest zero.
    pub fn checksum_tag(&self) -> [u8; 16] {
        let encoded = self.encode(CHECKSUM_PLAINTEXT);
        let mut tag = [0u8; 16];
        tag[..CHECKSUM_CHECKED_BYTES].copy_from_slice(&encoded[..CHECKSUM_CHECKED_BYTES]);
        tag
    }

    /// Validate a stored header checksum against this key.
    pub fn verify_checksum(&self, stored: &[u8; 16]) -> bool {
        let encoded = self.encode(CHECKSUM_PLAINTEXT);
        encoded[..CHECKSUM_CHECKED_BYTES] == stored[..CHECKSUM_CHECKED_BYTES]
    }
}

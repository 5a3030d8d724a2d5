//! Channel encryption (AES-CTR with a per-packet nonce)
//!
//! Every node on a channel shares one pre-shared key. The keystream for a
//! packet is bound to two header fields of that same packet:
//!
//! ```text
//! Bytes 0-3:   packet_id (wire order)
//! Bytes 4-7:   0x00000000
//! Bytes 8-11:  sender address (wire order)
//! Bytes 12-15: 0x00000000
//! ```
//!
//! The nonce is the initial 128-bit big-endian counter block. Encryption
//! and decryption are the same operation and neither can fail: CTR mode
//! produces output for any input length, including zero.
//!
//! A 16-byte key selects AES-128, a 32-byte key AES-256. A single-byte
//! PSK `n` is shorthand for the well-known default key with its last byte
//! bumped by `n - 1`.

use super::packet::{NodeId, PacketId};
use crate::error::KeyError;
use aes::{Aes128, Aes256};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

/// The well-known key of the default public channel
pub const DEFAULT_PSK: [u8; 16] = [
    0xd4, 0xf1, 0xbb, 0x3a, 0x20, 0x29, 0x07, 0x59,
    0xf0, 0xbc, 0xff, 0xab, 0xcf, 0x4e, 0x69, 0x01,
];

/// Base64 form of [`DEFAULT_PSK`]
pub const DEFAULT_PSK_BASE64: &str = "1PG7OiApB1nwvP+rz05pAQ==";

/// Name of the default public channel
pub const DEFAULT_CHANNEL_NAME: &str = "LongFast";

/// Symmetric channel key
#[derive(Clone, PartialEq, Eq)]
pub enum ChannelKey {
    Aes128([u8; 16]),
    Aes256([u8; 32]),
}

impl ChannelKey {
    /// Decode a base64 PSK as carried in configuration
    pub fn from_base64(psk: &str) -> Result<Self, KeyError> {
        let raw = STANDARD
            .decode(psk.trim())
            .map_err(|e| KeyError::Base64(e.to_string()))?;
        Self::from_psk(&raw)
    }

    /// Build a key from raw PSK bytes
    pub fn from_psk(psk: &[u8]) -> Result<Self, KeyError> {
        match psk.len() {
            1 => {
                let index = psk[0];
                if index == 0 {
                    return Err(KeyError::Unencrypted);
                }
                let mut key = DEFAULT_PSK;
                key[15] = key[15].wrapping_add(index - 1);
                Ok(ChannelKey::Aes128(key))
            }
            16 => {
                let mut key = [0u8; 16];
                key.copy_from_slice(psk);
                Ok(ChannelKey::Aes128(key))
            }
            32 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(psk);
                Ok(ChannelKey::Aes256(key))
            }
            n => Err(KeyError::Length(n)),
        }
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ChannelKey::Aes128(k) => k,
            ChannelKey::Aes256(k) => k,
        }
    }

    /// Key size in bits
    pub fn bits(&self) -> usize {
        self.as_bytes().len() * 8
    }

    /// Encode the key back to base64
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.as_bytes())
    }

    /// Construct the 16-byte nonce/IV for AES-CTR
    pub fn make_nonce(packet_id: PacketId, sender: NodeId) -> [u8; 16] {
        let mut nonce = [0u8; 16];
        nonce[0..4].copy_from_slice(packet_id.as_bytes());
        nonce[8..12].copy_from_slice(sender.as_bytes());
        nonce
    }

    /// XOR the packet keystream into `buf` in place
    pub fn apply_keystream(&self, packet_id: PacketId, sender: NodeId, buf: &mut [u8]) {
        let nonce = Self::make_nonce(packet_id, sender);
        match self {
            ChannelKey::Aes128(key) => {
                let mut cipher = Ctr128BE::<Aes128>::new(key.into(), &nonce.into());
                cipher.apply_keystream(buf);
            }
            ChannelKey::Aes256(key) => {
                let mut cipher = Ctr128BE::<Aes256>::new(key.into(), &nonce.into());
                cipher.apply_keystream(buf);
            }
        }
    }

    /// Encrypt or decrypt a payload, returning a new buffer
    pub fn transform(&self, packet_id: PacketId, sender: NodeId, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.apply_keystream(packet_id, sender, &mut out);
        out
    }

    /// One-byte channel hash carried in every frame header
    ///
    /// XOR of the channel name bytes folded with the XOR of the key bytes.
    pub fn channel_hash(&self, channel_name: &str) -> u8 {
        let name = channel_name.bytes().fold(0u8, |acc, b| acc ^ b);
        let key = self.as_bytes().iter().fold(0u8, |acc, b| acc ^ b);
        name ^ key
    }
}

impl Default for ChannelKey {
    fn default() -> Self {
        ChannelKey::Aes128(DEFAULT_PSK)
    }
}

impl std::fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelKey")
            .field("bits", &self.bits())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_key_from_base64() {
        let key = ChannelKey::from_base64(DEFAULT_PSK_BASE64).unwrap();
        assert_eq!(key, ChannelKey::Aes128(DEFAULT_PSK));
        assert_eq!(key.bits(), 128);
        assert_eq!(key.to_base64(), DEFAULT_PSK_BASE64);
    }

    #[test]
    fn test_psk_shorthand() {
        assert_eq!(ChannelKey::from_psk(&[1]).unwrap(), ChannelKey::default());

        let bumped = ChannelKey::from_psk(&[3]).unwrap();
        assert_eq!(bumped.as_bytes()[15], DEFAULT_PSK[15] + 2);
        assert_eq!(bumped.as_bytes()[..15], DEFAULT_PSK[..15]);

        assert_eq!(ChannelKey::from_psk(&[0]), Err(KeyError::Unencrypted));
    }

    #[test]
    fn test_key_length_selects_variant() {
        assert!(matches!(ChannelKey::from_psk(&[7u8; 32]), Ok(ChannelKey::Aes256(_))));
        assert_eq!(ChannelKey::from_psk(&[7u8; 24]), Err(KeyError::Length(24)));
        assert!(matches!(ChannelKey::from_base64("not base64!"), Err(KeyError::Base64(_))));
    }

    #[test]
    fn test_nonce_layout() {
        let nonce = ChannelKey::make_nonce(
            PacketId::from_bytes([0xe0, 0xa5, 0x2f, 0x5e]),
            NodeId::from_bytes([0x70, 0x87, 0xa8, 0xbb]),
        );
        assert_eq!(
            nonce,
            [0xe0, 0xa5, 0x2f, 0x5e, 0, 0, 0, 0, 0x70, 0x87, 0xa8, 0xbb, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_keystream_is_symmetric() {
        let key = ChannelKey::from_psk(&[0x42; 32]).unwrap();
        let id = PacketId::from_bytes([1, 2, 3, 4]);
        let sender = NodeId::from_bytes([5, 6, 7, 8]);

        let plaintext = b"a message longer than one sixteen byte block";
        let ciphertext = key.transform(id, sender, plaintext);
        assert_ne!(ciphertext.as_slice(), plaintext.as_slice());
        assert_eq!(key.transform(id, sender, &ciphertext), plaintext);
    }

    #[test]
    fn test_keystream_depends_on_header_fields() {
        let key = ChannelKey::default();
        let sender = NodeId::from_bytes([5, 6, 7, 8]);
        let a = key.transform(PacketId::from_bytes([0, 0, 0, 1]), sender, b"same");
        let b = key.transform(PacketId::from_bytes([0, 0, 0, 2]), sender, b"same");
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_payload() {
        let key = ChannelKey::default();
        let out = key.transform(PacketId::from_bytes([0; 4]), NodeId::BROADCAST, &[]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_channel_hash_default_channel() {
        // Captured LongFast traffic carries 0x08 in the channel hash byte
        assert_eq!(ChannelKey::default().channel_hash(DEFAULT_CHANNEL_NAME), 0x08);
    }

    #[test]
    fn test_debug_redacts_key() {
        let s = format!("{:?}", ChannelKey::default());
        assert!(s.contains("REDACTED"));
        assert!(!s.contains("212"));
    }
}

use compact_str::{CompactString, format_compact};
use ring::hmac;

use crate::base32;

/// Hash function driving the HMAC, fixed when the engine is built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[allow(missing_docs)]
pub enum Algorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    /// Uppercase name as it appears in `otpauth://` URIs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }

    // Authenticator apps still default to SHA-1, hence the legacy ring constant.
    fn hmac_algorithm(self) -> hmac::Algorithm {
        match self {
            Self::Sha1 => hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => hmac::HMAC_SHA256,
            Self::Sha512 => hmac::HMAC_SHA512,
        }
    }
}

/// Decoded HOTP key
pub struct HotpKey(Box<[u8]>);

impl AsRef<[u8]> for HotpKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl HotpKey {
    /// Create a new HOTP key from raw bytes
    pub fn new(key: &[u8]) -> Self {
        Self(key.into())
    }

    /// Create a new HOTP key from a base32 encoded secret
    pub fn from_base32(secret: impl AsRef<str>) -> Result<Self, base32::InvalidEncoding> {
        let key = base32::decode(secret)?.into_boxed_slice();
        Ok(Self(key))
    }

    /// Derive the code for a counter value (RFC 4226 dynamic truncation).
    ///
    /// The counter is signed as an 8-byte big-endian message, the digest is
    /// truncated to 31 bits at the offset named by its last nibble, and the
    /// result is reduced modulo `10^digits` and zero-padded to `digits`
    /// characters. An empty key is a valid HMAC key.
    pub fn code(&self, algorithm: Algorithm, counter: u64, digits: u32) -> CompactString {
        let key = hmac::Key::new(algorithm.hmac_algorithm(), &self.0);
        let tag = hmac::sign(&key, &counter.to_be_bytes());
        let digest = tag.as_ref();

        let offset = (digest[digest.len() - 1] & 0x0F) as usize;
        let truncated = u32::from_be_bytes([
            digest[offset],
            digest[offset + 1],
            digest[offset + 2],
            digest[offset + 3],
        ]) & 0x7FFF_FFFF;

        // More than 10 digits cannot be filled from 31 bits; saturate so the
        // reduction degrades to the identity instead of overflowing.
        let code = u64::from(truncated) % 10u64.saturating_pow(digits);
        format_compact!("{code:0width$}", width = digits as usize)
    }
}

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![doc = include_str!("../README.md")]

/// Base32 encoding and decoding of shared secrets
pub mod base32;

/// HOTP (HMAC-based One-Time Password) code derivation
pub mod hotp;

/// TOTP (Time-based One-Time Password) engine: secrets, codes, verification
/// and provisioning
pub mod totp;

/// Pluggable capability providers: randomness, wall-clock time, QR rendering
pub mod providers;

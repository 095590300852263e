/// Cryptographically secure random byte sources
pub mod rng;

/// Wall-clock time sources
pub mod time;

/// QR code rendering backends
pub mod qr;

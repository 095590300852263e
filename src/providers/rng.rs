use std::convert::Infallible;

use rand::RngCore;
use ring::rand::{SecureRandom, SystemRandom};

/// Source of cryptographically secure random bytes.
///
/// Secret strength is only as good as this provider; implementations must
/// never substitute a weaker source when the preferred one is unavailable.
pub trait RandomProvider {
    /// Error type for a source that failed to produce entropy
    type Error;

    /// Produce exactly `count` random bytes
    fn random_bytes(&self, count: usize) -> Result<Vec<u8>, Self::Error>;
}

/// The requested entropy could not be produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("random source failed to produce {requested} bytes")]
pub struct RandomSourceError {
    /// Number of bytes that were requested
    pub requested: usize,
}

/// Random bytes from the operating system via [`ring::rand::SystemRandom`]
#[derive(Debug)]
pub struct SystemRng(SystemRandom);

impl SystemRng {
    /// Create a new system random source
    pub fn new() -> Self {
        Self(SystemRandom::new())
    }
}

impl Default for SystemRng {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomProvider for SystemRng {
    type Error = RandomSourceError;

    fn random_bytes(&self, count: usize) -> Result<Vec<u8>, Self::Error> {
        let mut bytes = vec![0u8; count];
        self.0
            .fill(&mut bytes)
            .map_err(|_| RandomSourceError { requested: count })?;
        Ok(bytes)
    }
}

/// Random bytes from the thread-local CSPRNG of the `rand` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadLocalRng;

impl RandomProvider for ThreadLocalRng {
    type Error = Infallible;

    fn random_bytes(&self, count: usize) -> Result<Vec<u8>, Self::Error> {
        let mut bytes = vec![0u8; count];
        rand::rng().fill_bytes(&mut bytes);
        Ok(bytes)
    }
}

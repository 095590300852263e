use compact_str::CompactString;
use ring::constant_time;

use crate::base32;
use crate::hotp::{Algorithm, HotpKey};
use crate::providers::qr::QrCodeProvider;
use crate::providers::rng::{RandomProvider, SystemRng};
use crate::providers::time::{SystemClock, TimeDriftError, TimeProvider};

/// The default number of code digits
pub const DEFAULT_DIGITS: u32 = 6;

/// The default period of a TOTP code in seconds, per RFC 6238
pub const DEFAULT_PERIOD: u64 = 30;

/// The default shared-secret strength in bits (160, per RFC 4226)
pub const DEFAULT_SECRET_BITS: usize = 160;

/// The default verification window, one period each side of now
pub const DEFAULT_DISCREPANCY: u32 = 1;

/// Codes are truncated to 31 bits, which never fill more than 10 digits
pub const MAX_DIGITS: u32 = 10;

/// Rejected engine settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Digits outside `1..=`[`MAX_DIGITS`]
    #[error("digits must be between 1 and {MAX_DIGITS}, got {0}")]
    InvalidDigits(u32),
    /// Period of zero seconds
    #[error("period must be greater than zero")]
    InvalidPeriod,
    /// QR image size of zero pixels
    #[error("qr size must be greater than zero")]
    InvalidSize,
}

/// A QR data URI could not be assembled
#[derive(Debug, thiserror::Error)]
pub enum DataUriError<E> {
    /// The requested image size was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The renderer failed; its error is passed through unchanged
    #[error("qr renderer failed: {0}")]
    Render(E),
}

/// Outcome of a windowed verification.
///
/// `time_slice` is the slice that matched, or zero when nothing matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Verification {
    /// Whether the presented code matched a slice in the window
    pub matched: bool,
    /// The matching time slice, zero if none
    pub time_slice: u64,
}

/// TOTP engine: shared-secret lifecycle, code generation and verification,
/// and provisioning for authenticator apps.
///
/// Configuration is fixed at construction; every method takes `&self`, so an
/// engine can be shared freely across threads.
#[derive(Debug)]
pub struct TwoFactorAuth<R = SystemRng, C = SystemClock> {
    issuer: Option<CompactString>,
    digits: u32,
    period: u64,
    algorithm: Algorithm,
    rng: R,
    clock: C,
}

impl TwoFactorAuth {
    /// Create an engine with RFC defaults: 6 digits, 30 second period, SHA-1,
    /// system randomness and the local machine clock.
    pub fn new(issuer: Option<&str>) -> Self {
        Self {
            issuer: issuer.map(CompactString::from),
            digits: DEFAULT_DIGITS,
            period: DEFAULT_PERIOD,
            algorithm: Algorithm::Sha1,
            rng: SystemRng::new(),
            clock: SystemClock,
        }
    }

    /// Create an engine with custom settings and the default providers
    pub fn with_options(
        issuer: Option<&str>,
        digits: u32,
        period: u64,
        algorithm: Algorithm,
    ) -> Result<Self, ConfigError> {
        Self::with_providers(issuer, digits, period, algorithm, SystemRng::new(), SystemClock)
    }
}

impl<R, C> TwoFactorAuth<R, C>
where
    R: RandomProvider,
    C: TimeProvider,
{
    /// Create an engine with custom settings and injected capability providers
    pub fn with_providers(
        issuer: Option<&str>,
        digits: u32,
        period: u64,
        algorithm: Algorithm,
        rng: R,
        clock: C,
    ) -> Result<Self, ConfigError> {
        if digits == 0 || digits > MAX_DIGITS {
            return Err(ConfigError::InvalidDigits(digits));
        }
        if period == 0 {
            return Err(ConfigError::InvalidPeriod);
        }
        Ok(Self {
            issuer: issuer.map(CompactString::from),
            digits,
            period,
            algorithm,
            rng,
            clock,
        })
    }

    /// Create a new shared secret of `bits` strength, base32 encoded.
    ///
    /// Each output character carries 5 bits, so the secret is
    /// `ceil(bits / 5)` characters long. The provider's error is propagated
    /// unchanged; there is no weaker fallback source.
    pub fn create_secret(&self, bits: usize) -> Result<CompactString, R::Error> {
        let count = bits.div_ceil(5);
        let random = self.rng.random_bytes(count)?;
        tracing::debug!(bits, characters = count, "created new shared secret");
        Ok(random
            .iter()
            .map(|byte| base32::ALPHABET[(byte & 0x1F) as usize] as char)
            .collect())
    }

    /// Calculate the code for a secret at the current time
    pub fn code(&self, secret: impl AsRef<str>) -> Result<CompactString, base32::InvalidEncoding> {
        self.code_at(secret, self.clock.now())
    }

    /// Calculate the code for a secret at a given Unix timestamp
    pub fn code_at(
        &self,
        secret: impl AsRef<str>,
        timestamp: u64,
    ) -> Result<CompactString, base32::InvalidEncoding> {
        let key = HotpKey::from_base32(secret)?;
        Ok(key.code(self.algorithm, self.time_slice(timestamp), self.digits))
    }

    /// Verify a presented code at the current time with the default window
    /// of [`DEFAULT_DISCREPANCY`]
    pub fn verify(
        &self,
        secret: impl AsRef<str>,
        code: &str,
    ) -> Result<Verification, base32::InvalidEncoding> {
        self.verify_with_window(secret, code, DEFAULT_DISCREPANCY)
    }

    /// Verify a presented code at the current time, accepting codes from
    /// `discrepancy` periods each side of now
    pub fn verify_with_window(
        &self,
        secret: impl AsRef<str>,
        code: &str,
        discrepancy: u32,
    ) -> Result<Verification, base32::InvalidEncoding> {
        self.verify_at(secret, code, discrepancy, self.clock.now())
    }

    /// Verify a presented code against every slice in
    /// `[timestamp - discrepancy * period, timestamp + discrepancy * period]`.
    ///
    /// The entire window is always visited and every candidate is compared in
    /// constant time, with the result slot reassigned on each iteration, so
    /// execution time does not depend on whether or where a match occurs.
    ///
    /// A match is reported only for a non-zero matching slice. Slice zero is
    /// the no-match sentinel, so a genuine match in the first period after
    /// the Unix epoch is reported as a non-match.
    pub fn verify_at(
        &self,
        secret: impl AsRef<str>,
        code: &str,
        discrepancy: u32,
        timestamp: u64,
    ) -> Result<Verification, base32::InvalidEncoding> {
        let key = HotpKey::from_base32(secret)?;

        let mut time_slice: u64 = 0;
        let window = i64::from(discrepancy);
        for i in -window..=window {
            let at = timestamp.saturating_add_signed(i.saturating_mul(self.period as i64));
            let slice = self.time_slice(at);
            let candidate = key.code(self.algorithm, slice, self.digits);
            time_slice = if codes_equal(candidate.as_bytes(), code.as_bytes()) {
                slice
            } else {
                time_slice
            };
        }

        Ok(Verification { matched: time_slice > 0, time_slice })
    }

    /// Build the `otpauth://totp/` provisioning URI for a label and secret.
    ///
    /// A label of the form `issuer:account` is split on the first `:` and
    /// both parts are percent-encoded independently; an empty account part
    /// collapses to a bare label.
    pub fn provisioning_uri(&self, label: &str, secret: &str) -> String {
        let (label, account) = match label.split_once(':') {
            Some((head, tail)) if !tail.is_empty() => (head, Some(tail)),
            Some((head, _)) => (head, None),
            None => (label, None),
        };
        let label = match account {
            Some(account) => format!(
                "{}:{}",
                urlencoding::encode(label),
                urlencoding::encode(account)
            ),
            None => urlencoding::encode(label).into_owned(),
        };
        format!(
            "otpauth://totp/{label}?secret={}&issuer={}&period={}&algorithm={}&digits={}",
            urlencoding::encode(secret),
            urlencoding::encode(self.issuer.as_deref().unwrap_or("")),
            self.period,
            self.algorithm.as_str(),
            self.digits,
        )
    }

    /// Render the provisioning URI through `qr` and wrap the image bytes in
    /// a `data:` URI, ready for an `<img>` tag
    pub fn qr_code_data_uri<Q>(
        &self,
        qr: &Q,
        label: &str,
        secret: &str,
        size: u32,
    ) -> Result<String, DataUriError<Q::Error>>
    where
        Q: QrCodeProvider,
    {
        if size == 0 {
            return Err(ConfigError::InvalidSize.into());
        }
        let image = qr
            .qr_code_image(&self.provisioning_uri(label, secret), size)
            .map_err(DataUriError::Render)?;
        Ok(format!(
            "data:{};base64,{}",
            qr.mime_type(),
            fast32::base64::RFC4648.encode(&image)
        ))
    }

    /// Compare the engine's own clock against each reference source and fail
    /// on the first one that is off by more than `leniency` seconds.
    ///
    /// References are explicit collaborators; this crate constructs no
    /// network time source of its own. An empty slice trivially succeeds.
    pub fn ensure_correct_time(
        &self,
        references: &[&dyn TimeProvider],
        leniency: u64,
    ) -> Result<(), TimeDriftError> {
        let local = self.clock.now();
        for (reference, source) in references.iter().enumerate() {
            let offset = local.abs_diff(source.now());
            tracing::debug!(reference, offset, leniency, "compared time sources");
            if offset > leniency {
                return Err(TimeDriftError { reference, offset, leniency });
            }
        }
        Ok(())
    }

    fn time_slice(&self, timestamp: u64) -> u64 {
        timestamp / self.period
    }
}

/// Constant-time code comparison; a mismatch in the first byte costs the
/// same as a mismatch in the last.
fn codes_equal(candidate: &[u8], presented: &[u8]) -> bool {
    #[cfg(test)]
    tests::COMPARISONS.with(|count| count.set(count.get() + 1));
    constant_time::verify_slices_are_equal(candidate, presented).is_ok()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::cell::Cell;
    use std::convert::Infallible;

    use super::*;
    use crate::providers::time::FixedClock;

    thread_local! {
        pub(super) static COMPARISONS: Cell<usize> = const { Cell::new(0) };
    }

    fn comparisons_during(run: impl FnOnce()) -> usize {
        COMPARISONS.with(|count| count.set(0));
        run();
        COMPARISONS.with(|count| count.get())
    }

    /// Replays a fixed byte pattern; `random_bytes` cannot fail.
    struct ScriptedRng(Vec<u8>);

    impl RandomProvider for ScriptedRng {
        type Error = Infallible;

        fn random_bytes(&self, count: usize) -> Result<Vec<u8>, Self::Error> {
            Ok(self.0.iter().copied().cycle().take(count).collect())
        }
    }

    /// Always refuses to produce entropy.
    struct BrokenRng;

    impl RandomProvider for BrokenRng {
        type Error = crate::providers::rng::RandomSourceError;

        fn random_bytes(&self, count: usize) -> Result<Vec<u8>, Self::Error> {
            Err(crate::providers::rng::RandomSourceError { requested: count })
        }
    }

    const SECRET: &str = "VMR466AB62ZBOKHE";

    fn engine_at(timestamp: u64) -> TwoFactorAuth<ScriptedRng, FixedClock> {
        TwoFactorAuth::with_providers(
            None,
            DEFAULT_DIGITS,
            DEFAULT_PERIOD,
            Algorithm::Sha1,
            ScriptedRng(vec![0x00]),
            FixedClock(timestamp),
        )
        .unwrap()
    }

    #[test]
    fn rejects_invalid_configuration() {
        assert_eq!(
            TwoFactorAuth::with_options(None, 0, 30, Algorithm::Sha1).unwrap_err(),
            ConfigError::InvalidDigits(0)
        );
        assert_eq!(
            TwoFactorAuth::with_options(None, 11, 30, Algorithm::Sha1).unwrap_err(),
            ConfigError::InvalidDigits(11)
        );
        assert_eq!(
            TwoFactorAuth::with_options(None, 6, 0, Algorithm::Sha1).unwrap_err(),
            ConfigError::InvalidPeriod
        );
        assert!(TwoFactorAuth::with_options(None, 8, 60, Algorithm::Sha512).is_ok());
    }

    #[test]
    fn code_is_deterministic_within_a_slice() {
        let tfa = engine_at(1_426_847_216);
        let first = tfa.code_at(SECRET, 1_426_847_190).unwrap();
        let second = tfa.code_at(SECRET, 1_426_847_216).unwrap();
        // 1426847190 and 1426847216 share slice 47561573.
        assert_eq!(first, second);
        assert_ne!(first, tfa.code_at(SECRET, 1_426_847_220).unwrap());
    }

    #[test]
    fn malformed_secret_is_reported() {
        let tfa = engine_at(0);
        assert!(tfa.code_at("NOT!VALID", 0).is_err());
        assert!(tfa.verify_at("NOT!VALID", "000000", 1, 0).is_err());
    }

    #[test]
    fn whole_window_is_compared_regardless_of_match_position() {
        let tfa = engine_at(1_426_847_216);
        let now = 1_426_847_216;
        let discrepancy = 2;
        let span = u64::from(discrepancy) * DEFAULT_PERIOD;

        for at in [now - span, now, now + span] {
            let code = tfa.code_at(SECRET, at).unwrap();
            let compared = comparisons_during(|| {
                let outcome = tfa.verify_at(SECRET, &code, discrepancy, now).unwrap();
                assert!(outcome.matched);
                assert_eq!(outcome.time_slice, at / DEFAULT_PERIOD);
            });
            assert_eq!(compared, 2 * discrepancy as usize + 1);
        }

        let compared = comparisons_during(|| {
            assert!(!tfa.verify_at(SECRET, "000000", discrepancy, now).unwrap().matched);
        });
        assert_eq!(compared, 2 * discrepancy as usize + 1);
    }

    #[test]
    fn epoch_slice_never_counts_as_a_match() {
        let tfa = engine_at(10);
        let code = tfa.code_at(SECRET, 10).unwrap();
        // Slice 0 is also the no-match sentinel, so even the correct code is
        // reported as a non-match during the first period after the epoch.
        let outcome = tfa.verify_at(SECRET, &code, 0, 10).unwrap();
        assert!(!outcome.matched);
        assert_eq!(outcome.time_slice, 0);

        // One period later the same loop reports matches normally.
        let code = tfa.code_at(SECRET, DEFAULT_PERIOD).unwrap();
        assert!(tfa.verify_at(SECRET, &code, 0, DEFAULT_PERIOD).unwrap().matched);
    }

    #[test]
    fn wide_window_near_epoch_does_not_underflow() {
        let tfa = engine_at(0);
        let code = tfa.code_at(SECRET, 0).unwrap();
        assert!(!tfa.verify_at(SECRET, &code, 10, 0).unwrap().matched);
    }

    #[test]
    fn created_secret_maps_low_five_bits_into_the_alphabet() {
        let tfa = TwoFactorAuth::with_providers(
            None,
            DEFAULT_DIGITS,
            DEFAULT_PERIOD,
            Algorithm::Sha1,
            ScriptedRng(vec![0x00, 0x01, 0x1A, 0xFF, 0x25]),
            FixedClock(0),
        )
        .unwrap();
        // 0x00 -> A, 0x01 -> B, 0x1A -> 2, 0xFF & 0x1F = 0x1F -> 7, 0x25 & 0x1F = 0x05 -> F.
        assert_eq!(tfa.create_secret(25).unwrap(), "AB27F");
        // 160 bits need ceil(160 / 5) = 32 characters.
        assert_eq!(tfa.create_secret(160).unwrap().len(), 32);
        assert_eq!(tfa.create_secret(1).unwrap().len(), 1);
    }

    #[test]
    fn random_source_failure_is_propagated_unchanged() {
        let tfa = TwoFactorAuth::with_providers(
            None,
            DEFAULT_DIGITS,
            DEFAULT_PERIOD,
            Algorithm::Sha1,
            BrokenRng,
            FixedClock(0),
        )
        .unwrap();
        let err = tfa.create_secret(160).unwrap_err();
        assert_eq!(err.requested, 32);
    }

    #[test]
    fn drift_within_leniency_is_accepted() {
        let tfa = engine_at(1_000_000);
        let ahead = FixedClock(1_000_004);
        let behind = FixedClock(999_996);
        assert!(tfa.ensure_correct_time(&[&ahead, &behind], 5).is_ok());
        assert!(tfa.ensure_correct_time(&[], 0).is_ok());
    }

    #[test]
    fn drift_beyond_leniency_names_the_reference() {
        let tfa = engine_at(1_000_000);
        let fine = FixedClock(1_000_001);
        let wrong = FixedClock(1_000_010);
        let err = tfa.ensure_correct_time(&[&fine, &wrong], 5).unwrap_err();
        assert_eq!(err, TimeDriftError { reference: 1, offset: 10, leniency: 5 });
    }
}

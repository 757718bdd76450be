//! Call references: the short public tokens that identify entries.
//!
//! A call reference is exactly [`CALL_REFERENCE_LENGTH`] characters drawn
//! uniformly from the 62-character alphanumeric alphabet. Tokens are
//! case-sensitive. The generator only produces candidates; uniqueness is
//! enforced by the storage engine at insert time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::{OsRng, SmallRng};
use rand::{RngCore, SeedableRng};
use tracing::warn;

use crate::error::{StorageError, StorageResult};

/// Number of characters in every call reference.
pub const CALL_REFERENCE_LENGTH: usize = 6;

/// Alphabet call references are drawn from.
pub const CALL_REFERENCE_ALPHABET: &[u8; 62] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Random bytes at or above this value are rejected so that `byte % 62` is
/// uniform (248 = 4 * 62).
const ACCEPT_BELOW: u8 = 248;

/// A validated call reference.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallReference(String);

impl CallReference {
    /// Parse and validate a call reference.
    pub fn parse(s: &str) -> StorageResult<Self> {
        if s.len() != CALL_REFERENCE_LENGTH {
            return Err(StorageError::Decode(format!(
                "call reference must be {CALL_REFERENCE_LENGTH} characters, got {}",
                s.len()
            )));
        }
        if let Some(bad) = s.bytes().find(|b| !b.is_ascii_alphanumeric()) {
            return Err(StorageError::Decode(format!(
                "call reference contains invalid character {:?}",
                bad as char
            )));
        }
        Ok(Self(s.to_owned()))
    }

    /// Sample a token from a source that may fail.
    pub fn try_sample<R: RngCore + ?Sized>(rng: &mut R) -> Result<Self, rand::Error> {
        Self::sample_with(|buf| rng.try_fill_bytes(buf))
    }

    /// Sample a token from an infallible source.
    pub fn sample<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let sampled = Self::sample_with(|buf| {
            rng.fill_bytes(buf);
            Ok::<(), std::convert::Infallible>(())
        });
        match sampled {
            Ok(token) => token,
            Err(never) => match never {},
        }
    }

    fn sample_with<F, E>(mut fill: F) -> Result<Self, E>
    where
        F: FnMut(&mut [u8]) -> Result<(), E>,
    {
        let mut token = String::with_capacity(CALL_REFERENCE_LENGTH);
        let mut buf = [0u8; 16];
        while token.len() < CALL_REFERENCE_LENGTH {
            fill(&mut buf)?;
            for &byte in buf.iter().filter(|&&b| b < ACCEPT_BELOW) {
                if token.len() == CALL_REFERENCE_LENGTH {
                    break;
                }
                let index = (byte % CALL_REFERENCE_ALPHABET.len() as u8) as usize;
                token.push(CALL_REFERENCE_ALPHABET[index] as char);
            }
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for CallReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallReference({})", self.0)
    }
}

impl fmt::Display for CallReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CallReference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Produces candidate call references.
///
/// The OS CSPRNG is preferred. If it fails, the generator logs the
/// degradation and falls back to a clock-seeded [`SmallRng`] so uploads stay
/// available at the cost of guessable tokens.
pub struct TokenGenerator {
    fallback: Mutex<SmallRng>,
    degraded: AtomicU64,
}

impl TokenGenerator {
    pub fn new() -> Self {
        Self {
            fallback: Mutex::new(SmallRng::seed_from_u64(clock_seed())),
            degraded: AtomicU64::new(0),
        }
    }

    /// Generate a candidate from the OS random source.
    pub fn generate(&self) -> CallReference {
        self.generate_with(&mut OsRng)
    }

    /// Generate a candidate using `primary` as the preferred source.
    pub fn generate_with<R: RngCore + ?Sized>(&self, primary: &mut R) -> CallReference {
        match CallReference::try_sample(primary) {
            Ok(token) => token,
            Err(err) => {
                self.degraded.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "secure random source failed, using pseudo-random call reference");
                let mut rng = self.fallback.lock().unwrap_or_else(PoisonError::into_inner);
                CallReference::sample(&mut *rng)
            }
        }
    }

    /// How many tokens were produced by the fallback source.
    pub fn degraded_count(&self) -> u64 {
        self.degraded.load(Ordering::Relaxed)
    }
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokenGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGenerator")
            .field("degraded", &self.degraded_count())
            .finish()
    }
}

fn clock_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    nanos ^ u64::from(std::process::id()).rotate_left(32)
}

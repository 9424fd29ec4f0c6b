use rand::{RngCore, rngs::OsRng};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{AppError, Result};

/// The number of PBKDF2 iterations.
const PBKDF2_ITERATIONS: u32 = 100_000;
/// The derived key length in bytes (256 bits).
const KEY_LENGTH: usize = 32;
/// The salt length in bytes.
const SALT_LENGTH: usize = 16;
/// The 70-character alphabet generated passwords are drawn from.
const PASSWORD_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*";
/// The characters counted as symbols by the strength check.
const STRENGTH_SYMBOLS: &str = "!@#$%^&*(),.?\":{}|<>";
/// The conventional length for generated passwords.
pub const DEFAULT_GENERATED_PASSWORD_LENGTH: usize = 12;

/// The key-derivation primitive behind `CredentialHasher`.
///
/// Injected so tests can simulate a platform without working crypto and
/// exercise the degraded fallback path.
pub trait DigestEngine: Send + Sync {
    /// Derives `KEY_LENGTH` bytes from `password` under `salt`.
    fn derive(&self, password: &[u8], salt: &[u8]) -> Result<[u8; KEY_LENGTH]>;
}

/// PBKDF2-HMAC-SHA-256 derivation at 100,000 iterations.
#[derive(Clone, Copy, Debug, Default)]
pub struct Pbkdf2Engine;

impl DigestEngine for Pbkdf2Engine {
    fn derive(&self, password: &[u8], salt: &[u8]) -> Result<[u8; KEY_LENGTH]> {
        let mut derived = [0u8; KEY_LENGTH];
        pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, PBKDF2_ITERATIONS, &mut derived);
        Ok(derived)
    }
}

/// A freshly derived credential: hex digest, hex salt, and whether the
/// degraded fallback produced it.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    /// The hex-encoded password digest.
    pub digest: String,
    /// The hex-encoded salt the digest was derived under.
    pub salt: String,
    /// True when the digest came from the non-cryptographic fallback.
    pub degraded: bool,
}

/// The outcome of a password strength check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordStrength {
    /// At least 8 characters.
    pub length: bool,
    pub has_uppercase: bool,
    pub has_lowercase: bool,
    pub has_digit: bool,
    pub has_symbol: bool,
    /// Weighted score in 0..=8.
    pub score: u8,
    pub level: StrengthLevel,
}

/// Password strength bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrengthLevel {
    Weak,
    Medium,
    Strong,
}

/// Derives salted password digests and verifies them.
///
/// Stateless apart from the injected derivation engine; performs no storage
/// access. Digests and salts leave this module only as opaque hex strings.
#[derive(Clone)]
pub struct CredentialHasher {
    engine: Arc<dyn DigestEngine>,
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self::new(Arc::new(Pbkdf2Engine))
    }
}

impl CredentialHasher {
    /// Creates a hasher over the given derivation engine.
    pub fn new(engine: Arc<dyn DigestEngine>) -> Self {
        Self { engine }
    }

    /// Generates a random 16-byte salt from the OS CSPRNG.
    pub fn generate_salt() -> Result<[u8; SALT_LENGTH]> {
        let mut salt = [0u8; SALT_LENGTH];
        OsRng
            .try_fill_bytes(&mut salt)
            .map_err(|e| AppError::Crypto(format!("Failed to generate salt: {}", e)))?;
        Ok(salt)
    }

    /// Derives the hex-encoded digest for `password` under `salt`.
    ///
    /// When the derivation engine reports its primitives unavailable, this
    /// falls back to a legacy non-cryptographic hash of
    /// `password + hex(salt)`. The fallback is SECURITY DEGRADED and exists
    /// only so older records stay verifiable; it is logged at error level
    /// and flagged in `CredentialRecord::degraded`. Hashing never
    /// propagates an error past this boundary.
    pub fn hash_password(&self, password: &str, salt: &[u8]) -> String {
        self.derive_digest(password, salt).0
    }

    fn derive_digest(&self, password: &str, salt: &[u8]) -> (String, bool) {
        let mut password_bytes = password.as_bytes().to_vec();
        let derived = self.engine.derive(&password_bytes, salt);
        password_bytes.zeroize();
        match derived {
            Ok(key) => (hex::encode(key), false),
            Err(e) => {
                tracing::error!("Password derivation failed, using degraded fallback: {}", e);
                let mut input = format!("{}{}", password, hex::encode(salt));
                let digest = legacy_hash(&input);
                input.zeroize();
                (digest, true)
            }
        }
    }

    /// Generates a salt and derives the digest in one step.
    pub fn create_password_hash(&self, password: &str) -> Result<CredentialRecord> {
        let salt = Self::generate_salt()?;
        let (digest, degraded) = self.derive_digest(password, &salt);
        Ok(CredentialRecord {
            digest,
            salt: hex::encode(salt),
            degraded,
        })
    }

    /// Verifies `password` against a stored digest and hex salt.
    ///
    /// Never fails: an undecodable salt and a mismatch both come back
    /// `false`. Digests shorter than the PBKDF2 output are assumed to have
    /// been written by the degraded fallback and are checked against it.
    /// Comparison is constant-time.
    pub fn verify_password(&self, password: &str, stored_digest: &str, stored_salt: &str) -> bool {
        let Ok(salt) = hex::decode(stored_salt) else {
            tracing::warn!("Password verification failed: stored salt is not valid hex");
            return false;
        };
        let candidate = if Self::is_legacy_digest(stored_digest) {
            legacy_hash(&format!("{}{}", password, hex::encode(&salt)))
        } else {
            self.derive_digest(password, &salt).0
        };
        candidate.as_bytes().ct_eq(stored_digest.as_bytes()).into()
    }

    /// Whether `digest` was written by the degraded fallback rather than
    /// PBKDF2 (which always emits 64 hex characters).
    pub fn is_legacy_digest(digest: &str) -> bool {
        digest.len() != KEY_LENGTH * 2
    }

    /// Scores `password` against the length/character-class rules.
    pub fn check_password_strength(password: &str) -> PasswordStrength {
        let length = password.chars().count() >= 8;
        let has_uppercase = password.chars().any(|c| c.is_ascii_uppercase());
        let has_lowercase = password.chars().any(|c| c.is_ascii_lowercase());
        let has_digit = password.chars().any(|c| c.is_ascii_digit());
        let has_symbol = password.chars().any(|c| STRENGTH_SYMBOLS.contains(c));

        let mut score = 0u8;
        if length {
            score += 2;
        }
        if has_uppercase {
            score += 1;
        }
        if has_lowercase {
            score += 1;
        }
        if has_digit {
            score += 1;
        }
        if has_symbol {
            score += 2;
        }
        if password.chars().count() >= 12 {
            score += 1;
        }

        let level = if score >= 6 {
            StrengthLevel::Strong
        } else if score >= 4 {
            StrengthLevel::Medium
        } else {
            StrengthLevel::Weak
        };

        PasswordStrength {
            length,
            has_uppercase,
            has_lowercase,
            has_digit,
            has_symbol,
            score,
            level,
        }
    }

    /// Generates a random password of `length` characters from the
    /// 70-character alphabet, mapping CSPRNG bytes by modulo.
    pub fn generate_secure_password(length: usize) -> Result<String> {
        let mut bytes = vec![0u8; length];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| AppError::Crypto(format!("Failed to generate password: {}", e)))?;
        Ok(bytes
            .iter()
            .map(|b| PASSWORD_CHARSET[*b as usize % PASSWORD_CHARSET.len()] as char)
            .collect())
    }
}

/// The legacy 32-bit rolling hash, kept only so records written by the
/// degraded fallback stay verifiable. Operates on UTF-16 code units with
/// wrapping i32 arithmetic; output is the absolute value in lowercase hex.
fn legacy_hash(input: &str) -> String {
    let mut hash: i32 = 0;
    for unit in input.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    format!("{:x}", hash.unsigned_abs())
}

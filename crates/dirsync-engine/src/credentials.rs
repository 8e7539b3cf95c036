//! Credential generation and encoding.
//!
//! Generated plaintext is write-only: it exists inside this module and in
//! the single compiled operation that sets it on the account. Nothing here
//! logs or stores a plaintext password, and the encoded forms redact
//! themselves in debug output.

use md4::{Digest, Md4};
use rand::rngs::OsRng;
use rand::Rng;
use sha_crypt::{sha512_simple, Sha512Params};
use std::fmt;
use std::fmt::Write as _;

use crate::config::Settings;
use crate::error::{SyncError, SyncResult};

const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const DIGITS: &str = "0123456789";
const MAX_TRIES: usize = 1000;

/// Encoded credentials for a dependent-directory account.
///
/// The NT hash is password-equivalent, so both fields redact in `Debug`.
#[derive(Clone)]
pub struct GeneratedCredentials {
    /// `{CRYPT}`-prefixed SHA-512 crypt hash for the `userPassword`
    /// attribute.
    pub user_password: String,
    /// Uppercase hex MD4-over-UTF-16LE hash for the `sambaNTPassword`
    /// attribute.
    pub nt_password: String,
}

impl fmt::Debug for GeneratedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedCredentials")
            .field("user_password", &"***REDACTED***")
            .field("nt_password", &"***REDACTED***")
            .finish()
    }
}

fn alphabet(settings: &Settings) -> Vec<char> {
    UPPER
        .chars()
        .chain(LOWER.chars())
        .chain(DIGITS.chars())
        .chain(settings.special_password_characters.chars())
        .filter(|c| !settings.banned_password_chars.contains(*c))
        .collect()
}

fn class_reachable(settings: &Settings, class: &str) -> bool {
    class
        .chars()
        .any(|c| !settings.banned_password_chars.contains(c))
}

/// Validate that the configured policy can be satisfied at all.
///
/// A policy whose banned set empties a required character class must fail
/// loudly instead of silently weakening generated passwords.
pub fn validate_policy(settings: &Settings) -> SyncResult<()> {
    if settings.password_length < 4 {
        return Err(SyncError::invalid_configuration(
            "password_length must allow one character of each required class",
        ));
    }
    for (class, name) in [
        (UPPER, "uppercase"),
        (LOWER, "lowercase"),
        (DIGITS, "digit"),
        (
            settings.special_password_characters.as_str(),
            "special_password_characters",
        ),
    ] {
        if class.is_empty() || !class_reachable(settings, class) {
            return Err(SyncError::invalid_configuration(format!(
                "banned_password_chars leaves no usable {name} characters"
            )));
        }
    }
    Ok(())
}

/// Generate a password with the given random source.
pub fn generate_password_with<R: Rng + ?Sized>(
    settings: &Settings,
    rng: &mut R,
) -> SyncResult<String> {
    validate_policy(settings)?;
    let alphabet = alphabet(settings);
    let special = &settings.special_password_characters;
    for _ in 0..MAX_TRIES {
        let candidate: String = (0..settings.password_length)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
            .collect();
        let ok = candidate.chars().any(|c| c.is_ascii_uppercase())
            && candidate.chars().any(|c| c.is_ascii_lowercase())
            && candidate.chars().any(|c| c.is_ascii_digit())
            && candidate.chars().any(|c| special.contains(c))
            && !candidate
                .chars()
                .any(|c| settings.banned_password_chars.contains(c));
        if ok {
            return Ok(candidate);
        }
    }
    Err(SyncError::credential(
        "unable to generate a policy-compliant password",
    ))
}

/// Generate a password from the system CSPRNG.
pub fn generate_password(settings: &Settings) -> SyncResult<String> {
    generate_password_with(settings, &mut OsRng)
}

/// Encode a plaintext password as a `{CRYPT}`-prefixed SHA-512 crypt hash.
pub fn sha512_crypt_password(password: &str) -> SyncResult<String> {
    let hash = sha512_simple(password, &Sha512Params::default())
        .map_err(|e| SyncError::credential(format!("sha512-crypt failed: {e:?}")))?;
    Ok(format!("{{CRYPT}}{hash}"))
}

/// Encode a plaintext password as an uppercase-hex NT hash
/// (MD4 over UTF-16LE).
#[must_use]
pub fn nt_password_hash(password: &str) -> String {
    let utf16le: Vec<u8> = password.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let digest = Md4::digest(&utf16le);
    digest.iter().fold(String::new(), |mut out, byte| {
        let _ = write!(out, "{byte:02X}");
        out
    })
}

/// Generate a fresh password and return only its encoded forms.
pub fn issue(settings: &Settings) -> SyncResult<GeneratedCredentials> {
    let plaintext = generate_password(settings)?;
    Ok(GeneratedCredentials {
        user_password: sha512_crypt_password(&plaintext)?,
        nt_password: nt_password_hash(&plaintext),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_generated_password_meets_policy() {
        let settings = Settings::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let pw = generate_password_with(&settings, &mut rng).unwrap();
            assert_eq!(pw.chars().count(), settings.password_length);
            assert!(pw.chars().any(|c| c.is_ascii_uppercase()));
            assert!(pw.chars().any(|c| c.is_ascii_lowercase()));
            assert!(pw.chars().any(|c| c.is_ascii_digit()));
            assert!(pw
                .chars()
                .any(|c| settings.special_password_characters.contains(c)));
            assert!(!pw
                .chars()
                .any(|c| settings.banned_password_chars.contains(c)));
        }
    }

    #[test]
    fn test_unreachable_class_is_config_error() {
        let settings = Settings {
            special_password_characters: "!".to_string(),
            banned_password_chars: "!".to_string(),
            ..Settings::default()
        };
        let err = validate_policy(&settings).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("special_password_characters"));
    }

    #[test]
    fn test_short_length_rejected() {
        let settings = Settings {
            password_length: 3,
            ..Settings::default()
        };
        assert!(validate_policy(&settings).is_err());
    }

    #[test]
    fn test_nt_hash_known_vector() {
        // Well-known NT hash of "password".
        assert_eq!(
            nt_password_hash("password"),
            "8846F7EAEE8FB117AD06BDD830B7586C"
        );
    }

    #[test]
    fn test_sha512_crypt_format() {
        let hash = sha512_crypt_password("Test123!").unwrap();
        assert!(hash.starts_with("{CRYPT}$6$"));
    }

    #[test]
    fn test_issue_produces_both_encodings() {
        let creds = issue(&Settings::default()).unwrap();
        assert!(creds.user_password.starts_with("{CRYPT}$6$"));
        assert_eq!(creds.nt_password.len(), 32);
        assert!(creds
            .nt_password
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_debug_redacts() {
        let creds = issue(&Settings::default()).unwrap();
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains(&creds.nt_password));
    }
}

//! Local asymmetric cryptography for at-rest protection of stored key shares.
//!
//! A 2048-bit RSA key pair is generated on first use and persisted as
//! PKCS#1 PEM (`RSA PRIVATE KEY` / `RSA PUBLIC KEY`), matching the layout a
//! pre-existing deployment would already have on disk. Padding is PKCS#1
//! v1.5, not OAEP: this is a compatibility requirement, since OAEP
//! ciphertexts are not cross-readable with previously stored shares.

use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding,
};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::path::{Path, PathBuf};

const KEY_BITS: usize = 2048;
const PRIVATE_KEY_FILE: &str = "private.pem";
const PUBLIC_KEY_FILE: &str = "public.pem";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("failed to generate RSA key pair: {0}")]
    KeyGeneration(rsa::Error),

    #[error("failed to encrypt: {0}")]
    Encrypt(rsa::Error),

    #[error("failed to decrypt: {0}")]
    Decrypt(rsa::Error),

    #[error("invalid PEM: {0}")]
    Pem(String),

    #[error("invalid base64 ciphertext: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decrypted value is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A short plaintext that has been wrapped for at-rest storage, as a
/// base64 string.
pub type WrappedValue = String;

/// Seam over at-rest key protection, so a stronger custody mechanism (HSM,
/// KMS) can later substitute without the reconciliation engine changing.
pub trait KeyWrapper: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<WrappedValue, CryptoError>;
    fn decrypt(&self, wrapped: &str) -> Result<String, CryptoError>;
}

/// Loads or generates the on-disk RSA key pair and wraps/unwraps short
/// strings against it.
pub struct LocalCrypto {
    public_key: RsaPublicKey,
    private_key: RsaPrivateKey,
}

impl std::fmt::Debug for LocalCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCrypto").field("private_key", &"<redacted>").finish()
    }
}

impl LocalCrypto {
    /// Load the key pair from `dir` if both PEM files exist; otherwise
    /// generate a fresh 2048-bit pair and persist it there.
    pub fn load_or_generate(dir: &Path) -> Result<Self, CryptoError> {
        let private_path = dir.join(PRIVATE_KEY_FILE);
        let public_path = dir.join(PUBLIC_KEY_FILE);

        if private_path.exists() && public_path.exists() {
            return Self::load(&private_path, &public_path);
        }

        std::fs::create_dir_all(dir).map_err(|source| CryptoError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut rng = rand::rngs::OsRng;
        let private_key =
            RsaPrivateKey::new(&mut rng, KEY_BITS).map_err(CryptoError::KeyGeneration)?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Pem(e.to_string()))?;
        let public_pem = public_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Pem(e.to_string()))?;

        std::fs::write(&private_path, private_pem.as_bytes()).map_err(|source| {
            CryptoError::Io {
                path: private_path.clone(),
                source,
            }
        })?;
        std::fs::write(&public_path, public_pem.as_bytes()).map_err(|source| CryptoError::Io {
            path: public_path.clone(),
            source,
        })?;

        Ok(Self {
            public_key,
            private_key,
        })
    }

    fn load(private_path: &Path, public_path: &Path) -> Result<Self, CryptoError> {
        let private_pem =
            std::fs::read_to_string(private_path).map_err(|source| CryptoError::Io {
                path: private_path.to_path_buf(),
                source,
            })?;
        let public_pem = std::fs::read_to_string(public_path).map_err(|source| CryptoError::Io {
            path: public_path.to_path_buf(),
            source,
        })?;

        let private_key = RsaPrivateKey::from_pkcs1_pem(&private_pem)
            .map_err(|e| CryptoError::Pem(e.to_string()))?;
        let public_key = RsaPublicKey::from_pkcs1_pem(&public_pem)
            .map_err(|e| CryptoError::Pem(e.to_string()))?;

        Ok(Self {
            public_key,
            private_key,
        })
    }
}

impl KeyWrapper for LocalCrypto {
    fn encrypt(&self, plaintext: &str) -> Result<WrappedValue, CryptoError> {
        let mut rng = rand::rngs::OsRng;
        let ciphertext = self
            .public_key
            .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext.as_bytes())
            .map_err(CryptoError::Encrypt)?;
        Ok(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            ciphertext,
        ))
    }

    fn decrypt(&self, wrapped: &str) -> Result<String, CryptoError> {
        let ciphertext =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, wrapped)?;
        let plaintext = self
            .private_key
            .decrypt(Pkcs1v15Encrypt, &ciphertext)
            .map_err(CryptoError::Decrypt)?;
        Ok(String::from_utf8(plaintext)?)
    }
}

/// Generate a cryptographically random alphanumeric string of `len`
/// characters, for the `*random*` placeholder substitution.
pub fn random_alphanumeric(len: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rngs::OsRng;
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn generates_and_persists_key_pair_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let crypto = LocalCrypto::load_or_generate(dir.path()).unwrap();
        assert!(dir.path().join(PRIVATE_KEY_FILE).exists());
        assert!(dir.path().join(PUBLIC_KEY_FILE).exists());

        let wrapped = crypto.encrypt("hello").unwrap();
        assert_eq!(crypto.decrypt(&wrapped).unwrap(), "hello");
    }

    #[test]
    fn reload_from_disk_can_decrypt_values_from_a_prior_instance() {
        let dir = tempfile::tempdir().unwrap();
        let first = LocalCrypto::load_or_generate(dir.path()).unwrap();
        let wrapped = first.encrypt("share-data").unwrap();
        drop(first);

        let second = LocalCrypto::load_or_generate(dir.path()).unwrap();
        assert_eq!(second.decrypt(&wrapped).unwrap(), "share-data");
    }

    #[test]
    fn empty_string_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let crypto = LocalCrypto::load_or_generate(dir.path()).unwrap();
        let wrapped = crypto.encrypt("").unwrap();
        assert_eq!(crypto.decrypt(&wrapped).unwrap(), "");
    }

    #[test]
    fn random_alphanumeric_has_requested_length_and_charset() {
        let s = random_alphanumeric(32);
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn random_alphanumeric_calls_differ() {
        assert_ne!(random_alphanumeric(32), random_alphanumeric(32));
    }

    proptest! {
        // RSA-2048 PKCS#1 v1.5 can wrap at most k-11 = 245 bytes; restrict
        // the generator to ASCII so char count and byte length coincide.
        #[test]
        fn encrypt_decrypt_roundtrips_for_short_strings(s in "[ -~]{0,200}") {
            let dir = tempfile::tempdir().unwrap();
            let crypto = LocalCrypto::load_or_generate(dir.path()).unwrap();
            let wrapped = crypto.encrypt(&s).unwrap();
            prop_assert_eq!(crypto.decrypt(&wrapped).unwrap(), s);
        }
    }
}

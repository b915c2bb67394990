//! Key derivation: HKDF-BLAKE2b, Argon2i passwords, X25519 agreement
//!
//! ```text
//! symmetric : HKDF(secret,               salt, "aenker symmetric")
//! password  : HKDF(Argon2i(pw, salt),    -,    "aenker password")
//! elliptic  : HKDF(X25519(priv, peer),   salt, "aenker elliptic")
//! ```
//! Every derivation is deterministic; both ends of a stream rely on that.

use argon2::{Algorithm, Argon2, Params, Version};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Blake2b512, Digest};
use ::hkdf::SimpleHkdf;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use aenker_core::{AenkerError, AenkerResult};

use crate::KEY_SIZE;

/// Prefix of every HKDF info string.
pub const INFO_PREFIX: &str = "aenker ";

/// A 256-bit key encryption key. Zeroized on drop.
///
/// Also used for the static shared secret of symmetric mode, which is
/// stretched into the per-stream KEK.
#[derive(Clone)]
pub struct Kek {
    bytes: [u8; KEY_SIZE],
}

impl Kek {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for Kek {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kek").field("bytes", &"[REDACTED]").finish()
    }
}

/// What a derived key is for. Selects the HKDF info suffix so that the same
/// secret never yields the same key for two roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Symmetric,
    Password,
    Elliptic,
}

impl Purpose {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Symmetric => "symmetric",
            Self::Password => "password",
            Self::Elliptic => "elliptic",
        }
    }

    /// Full HKDF info string, e.g. `"aenker elliptic"`.
    pub fn info(self) -> String {
        format!("{INFO_PREFIX}{}", self.suffix())
    }
}

/// Argon2i cost parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub mem_cost_kib: u32,
    /// Time cost / iterations
    pub time_cost: u32,
    /// Parallelism
    pub parallelism: u32,
}

/// Cost of password-mode streams. Not recorded in the stream, so reader
/// and writer must agree on it.
pub const PASSWORD_PARAMS: KdfParams = KdfParams {
    mem_cost_kib: 64 * 1024,
    time_cost: 16,
    parallelism: 2,
};

/// Cost of password-derived private keys (`aenker pbkdf`).
pub const PBKDF_PARAMS: KdfParams = KdfParams {
    mem_cost_kib: 256 * 1024,
    time_cost: 32,
    parallelism: 4,
};

impl Default for KdfParams {
    fn default() -> Self {
        PASSWORD_PARAMS
    }
}

/// Single-shot HKDF over BLAKE2b-512 producing one 32-byte key.
///
/// An empty `salt` is treated as absent, which HKDF replaces with a
/// block of zeros.
pub fn hkdf(secret: &[u8], salt: &[u8], info: &str) -> AenkerResult<Kek> {
    let salt = (!salt.is_empty()).then_some(salt);
    let hk = SimpleHkdf::<Blake2b512>::new(salt, secret);
    let mut okm = [0u8; KEY_SIZE];
    hk.expand(info.as_bytes(), &mut okm)
        .map_err(|e| AenkerError::Kdf(format!("HKDF expand failed: {e}")))?;
    Ok(Kek::from_bytes(okm))
}

/// HKDF with the info string of `purpose`.
pub fn derive(secret: &[u8], salt: &[u8], purpose: Purpose) -> AenkerResult<Kek> {
    hkdf(secret, salt, &purpose.info())
}

/// Stretch a static shared secret into a per-stream KEK.
pub fn symmetric(secret: &Kek, salt: &[u8]) -> AenkerResult<Kek> {
    derive(secret.as_bytes(), salt, Purpose::Symmetric)
}

fn argon2i(password: &[u8], salt: &[u8], params: &KdfParams) -> AenkerResult<[u8; KEY_SIZE]> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| AenkerError::Kdf(format!("invalid Argon2i params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2i, Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password, salt, &mut key)
        .map_err(|e| AenkerError::Kdf(format!("Argon2i KDF failed: {e}")))?;
    Ok(key)
}

/// Derive a KEK from a password: Argon2i over (password, salt), then HKDF
/// without salt under the "password" purpose.
///
/// Argon2 requires at least 8 salt bytes; the header salt is exactly that.
pub fn password(password: &SecretString, salt: &[u8], params: &KdfParams) -> AenkerResult<Kek> {
    let mut stretched = argon2i(password.expose_secret().as_bytes(), salt, params)?;
    let kek = derive(&stretched, &[], Purpose::Password);
    stretched.zeroize();
    kek
}

/// X25519 agreement between `private` and `peer`, fed into HKDF.
pub fn elliptic(
    private: &StaticSecret,
    peer: &PublicKey,
    salt: &[u8],
    purpose: Purpose,
) -> AenkerResult<Kek> {
    let shared = private.diffie_hellman(peer);
    derive(shared.as_bytes(), salt, purpose)
}

/// X25519 base-point multiplication.
pub fn public_key(private: &StaticSecret) -> PublicKey {
    PublicKey::from(private)
}

/// A fresh random X25519 private key.
pub fn generate_private_key() -> StaticSecret {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    let secret = StaticSecret::from(bytes);
    bytes.zeroize();
    secret
}

/// Argon2i salt for [`derive_private_key`]: BLAKE2b-256 of the salt string.
pub fn pbkdf_salt(salt: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Blake2b::<U32>::digest(salt.as_bytes()));
    out
}

fn stretch_to_private_key(
    password: &SecretString,
    salt: &str,
    params: &KdfParams,
) -> AenkerResult<StaticSecret> {
    let mut bytes = argon2i(password.expose_secret().as_bytes(), &pbkdf_salt(salt), params)?;
    let secret = StaticSecret::from(bytes);
    bytes.zeroize();
    Ok(secret)
}

/// Derive a private key from a password and a free-form salt string, with
/// the fixed [`PBKDF_PARAMS`] cost.
///
/// The salt string is hashed with BLAKE2b-256 first, so any length works.
/// The same password and salt give the same key pair on every machine.
pub fn derive_private_key(password: &SecretString, salt: &str) -> AenkerResult<StaticSecret> {
    stretch_to_private_key(password, salt, &PBKDF_PARAMS)
}

// SPDX-FileCopyrightText: 2024-2025 The kbundle developers
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    env::{self, VarError},
    ffi::{OsStr, OsString},
    fs::File,
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
};

use pkcs8::DecodePrivateKey;
use rsa::{
    pkcs1::DecodeRsaPrivateKey, pkcs8::DecodePublicKey, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey,
};
use sha2::Sha256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read environment variable: {0:?}")]
    InvalidEnvVar(OsString, #[source] VarError),
    #[error("Failed to load encrypted private key")]
    LoadKeyEncrypted(#[source] pkcs8::Error),
    #[error("Failed to load unencrypted private key")]
    LoadKeyUnencrypted(#[source] pkcs8::Error),
    #[error("Failed to load PKCS#1 private key")]
    LoadKeyPkcs1(#[source] rsa::pkcs1::Error),
    #[error("Failed to load public key")]
    LoadPublicKey(#[source] pkcs8::spki::Error),
    #[error("Not a PEM-encoded RSA key")]
    UnknownKeyFormat,
    #[error("RSA error")]
    Rsa(#[from] rsa::Error),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

pub enum PassphraseSource {
    Prompt(String),
    EnvVar(OsString),
    File(PathBuf),
}

impl PassphraseSource {
    pub fn new(key_file: &Path, pass_file: Option<&Path>, env_var: Option<&OsStr>) -> Self {
        if let Some(v) = env_var {
            Self::EnvVar(v.to_owned())
        } else if let Some(p) = pass_file {
            Self::File(p.to_owned())
        } else {
            Self::Prompt(format!("Enter passphrase for {key_file:?}: "))
        }
    }

    pub fn acquire(&self) -> Result<String> {
        let passphrase = match self {
            Self::Prompt(p) => rpassword::prompt_password(p)?,
            Self::EnvVar(v) => env::var(v).map_err(|e| Error::InvalidEnvVar(v.clone(), e))?,
            Self::File(p) => std::fs::read_to_string(p)?
                .trim_end_matches(['\r', '\n'])
                .to_owned(),
        };

        Ok(passphrase)
    }
}

/// A key usable for signature checks: either a private key (the public half
/// is derived) or a bare public key.
pub enum VerifyKey {
    Private(Box<RsaPrivateKey>),
    Public(RsaPublicKey),
}

impl VerifyKey {
    pub fn to_public_key(&self) -> RsaPublicKey {
        match self {
            Self::Private(key) => key.to_public_key(),
            Self::Public(key) => key.clone(),
        }
    }
}

/// Read a PEM-encoded RSA private key from a reader. PKCS#8 (optionally
/// encrypted) and legacy PKCS#1 encodings are both accepted.
pub fn read_pem_key(mut reader: impl Read, source: &PassphraseSource) -> Result<RsaPrivateKey> {
    let mut data = String::new();
    reader.read_to_string(&mut data)?;

    if data.contains("ENCRYPTED") {
        let passphrase = source.acquire()?;

        RsaPrivateKey::from_pkcs8_encrypted_pem(&data, passphrase).map_err(Error::LoadKeyEncrypted)
    } else if data.contains("BEGIN RSA PRIVATE KEY") {
        RsaPrivateKey::from_pkcs1_pem(&data).map_err(Error::LoadKeyPkcs1)
    } else {
        RsaPrivateKey::from_pkcs8_pem(&data).map_err(Error::LoadKeyUnencrypted)
    }
}

/// Read a PEM-encoded RSA private key from a file.
pub fn read_pem_key_file(path: &Path, source: &PassphraseSource) -> Result<RsaPrivateKey> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    read_pem_key(reader, source)
}

/// Read a PEM-encoded key usable for verification from a file. Private keys
/// are tried first so that the same `-k` argument works for both directions.
pub fn read_pem_verify_key_file(path: &Path, source: &PassphraseSource) -> Result<VerifyKey> {
    let mut data = String::new();
    File::open(path)?.read_to_string(&mut data)?;

    if data.contains("PRIVATE KEY") {
        let key = read_pem_key(data.as_bytes(), source)?;
        Ok(VerifyKey::Private(Box::new(key)))
    } else if data.contains("BEGIN PUBLIC KEY") {
        let key = RsaPublicKey::from_public_key_pem(&data).map_err(Error::LoadPublicKey)?;
        Ok(VerifyKey::Public(key))
    } else {
        Err(Error::UnknownKeyFormat)
    }
}

/// Compute the RSA-PKCS#1 v1.5 signature for a precomputed SHA-256 digest.
/// The result is exactly as long as the key modulus.
pub fn sign_digest(key: &RsaPrivateKey, digest: &[u8]) -> Result<Vec<u8>> {
    let scheme = Pkcs1v15Sign::new::<Sha256>();
    let signature = key.sign(scheme, digest)?;

    Ok(signature)
}

/// Check an RSA-PKCS#1 v1.5 signature against a precomputed SHA-256 digest.
pub fn verify_digest(key: &RsaPublicKey, digest: &[u8], signature: &[u8]) -> bool {
    let scheme = Pkcs1v15Sign::new::<Sha256>();

    key.verify(scheme, digest, signature).is_ok()
}

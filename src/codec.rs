//! Payload Codec
//!
//! Turns a [`Metric`] into the bytes that go over the wire and back.
//!
//! # Pipeline
//!
//! - **Serialize**: JSON wire form `{id, type, delta?, value?}`
//! - **Sign**: HMAC-SHA256 over the uncompressed JSON, base64 encoded ([`Signer`])
//! - **Compress**: gzip ([`compress`] / [`decompress`])
//! - **Encrypt**: RSA PKCS#1 v1.5 over the compressed body ([`Encryptor`] / [`Decryptor`])
//!
//! Signing and encryption are optional and independent: the signature always
//! covers the plaintext JSON, encryption always replaces the body.

mod compress;
mod crypto;
mod sign;

pub use compress::{compress, decompress};
pub use crypto::{Decryptor, Encryptor};
pub use sign::Signer;

use thiserror::Error;

use crate::model::Metric;

/// Header carrying the base64 HMAC-SHA256 of the uncompressed body.
pub const HASH_HEADER: &str = "HashSHA256";

/// Header carrying the sender's declared source address.
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// Errors raised while encoding or decoding payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression stream failure.
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// Key material could not be read or parsed.
    #[error("key error: {0}")]
    Key(String),

    /// RSA operation failed.
    #[error("rsa error: {0}")]
    Rsa(#[from] rsa::Error),

    /// Signature header is not valid base64 or does not match the body.
    #[error("signature mismatch")]
    SignatureMismatch,
}

/// A payload ready for transmission.
#[derive(Debug, Clone)]
pub struct SealedPayload {
    /// Compressed and possibly encrypted body.
    pub body: Vec<u8>,
    /// Base64 HMAC of the uncompressed JSON, when a key is configured.
    pub signature: Option<String>,
}

/// Outbound payload pipeline shared by the transports.
#[derive(Clone, Default)]
pub struct Codec {
    signer: Option<Signer>,
    encryptor: Option<Encryptor>,
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("signed", &self.signer.is_some())
            .field("encrypted", &self.encryptor.is_some())
            .finish()
    }
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sign payloads with the given shared key.
    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Encrypt payloads with the given public key.
    pub fn with_encryptor(mut self, encryptor: Encryptor) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    #[inline]
    pub fn signer(&self) -> Option<&Signer> {
        self.signer.as_ref()
    }

    #[inline]
    pub fn encrypts(&self) -> bool {
        self.encryptor.is_some()
    }

    /// Serialize, sign, compress and optionally encrypt one metric.
    pub fn seal(&self, metric: &Metric) -> Result<SealedPayload, CodecError> {
        let json = serde_json::to_vec(metric)?;
        let signature = self.signer.as_ref().map(|s| s.sign(&json));
        let mut body = compress(&json)?;
        if let Some(encryptor) = &self.encryptor {
            body = encryptor.encrypt(&body)?;
        }
        Ok(SealedPayload { body, signature })
    }
}

/// Inverse of [`Codec::seal`] for a single metric.
///
/// The collector performs these steps as separate middleware; this function
/// runs them in one place.
pub fn open(
    payload: &SealedPayload,
    verifier: Option<&Signer>,
    decryptor: Option<&Decryptor>,
) -> Result<Metric, CodecError> {
    let compressed = match decryptor {
        Some(decryptor) => decryptor.decrypt(&payload.body)?,
        None => payload.body.clone(),
    };
    let json = decompress(&compressed)?;
    if let (Some(verifier), Some(signature)) = (verifier, payload.signature.as_deref()) {
        verifier.verify(&json, signature)?;
    }
    Ok(serde_json::from_slice(&json)?)
}

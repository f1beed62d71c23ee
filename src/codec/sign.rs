//! HMAC-SHA256 body signatures.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::CodecError;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies payloads with a shared key.
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length")
    }

    /// Base64 HMAC of `data`.
    pub fn sign(&self, data: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(data);
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Check a base64 signature against `data` in constant time.
    pub fn verify(&self, data: &[u8], signature: &str) -> Result<(), CodecError> {
        let expected = STANDARD
            .decode(signature.trim())
            .map_err(|_| CodecError::SignatureMismatch)?;
        let mut mac = self.mac();
        mac.update(data);
        mac.verify_slice(&expected)
            .map_err(|_| CodecError::SignatureMismatch)
    }
}

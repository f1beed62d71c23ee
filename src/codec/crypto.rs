//! RSA PKCS#1 v1.5 body encryption.
//!
//! A body longer than one RSA block is split into `key_size - 11` byte
//! chunks; the ciphertext is the concatenation of one `key_size` block per
//! chunk.

use std::path::Path;

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

use super::CodecError;

/// PKCS#1 v1.5 padding overhead per block.
const PKCS1_PADDING_OVERHEAD: usize = 11;

fn read_pem(path: &Path) -> Result<String, CodecError> {
    std::fs::read_to_string(path)
        .map_err(|e| CodecError::Key(format!("cannot read '{}': {}", path.display(), e)))
}

/// Encrypts outbound bodies with the collector's public key.
#[derive(Debug, Clone)]
pub struct Encryptor {
    key: RsaPublicKey,
}

impl Encryptor {
    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// Load a `PUBLIC KEY` (SPKI) or `RSA PUBLIC KEY` (PKCS#1) PEM file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, CodecError> {
        let path = path.as_ref();
        let pem = read_pem(path)?;
        let key = RsaPublicKey::from_public_key_pem(&pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(&pem))
            .map_err(|e| {
                CodecError::Key(format!("invalid public key '{}': {}", path.display(), e))
            })?;
        Ok(Self::new(key))
    }

    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let block = self.key.size();
        let chunk = block - PKCS1_PADDING_OVERHEAD;
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(data.len().div_ceil(chunk).max(1) * block);
        if data.is_empty() {
            out.extend(self.key.encrypt(&mut rng, Pkcs1v15Encrypt, data)?);
            return Ok(out);
        }
        for part in data.chunks(chunk) {
            out.extend(self.key.encrypt(&mut rng, Pkcs1v15Encrypt, part)?);
        }
        Ok(out)
    }
}

/// Decrypts inbound bodies with the collector's private key.
#[derive(Debug, Clone)]
pub struct Decryptor {
    key: RsaPrivateKey,
}

impl Decryptor {
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Load an `RSA PRIVATE KEY` (PKCS#1) or `PRIVATE KEY` (PKCS#8) PEM file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, CodecError> {
        let path = path.as_ref();
        let pem = read_pem(path)?;
        let key = RsaPrivateKey::from_pkcs1_pem(&pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
            .map_err(|e| {
                CodecError::Key(format!("invalid private key '{}': {}", path.display(), e))
            })?;
        Ok(Self::new(key))
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let block = self.key.size();
        if data.is_empty() || data.len() % block != 0 {
            return Err(CodecError::Rsa(rsa::Error::Decryption));
        }
        let mut out = Vec::with_capacity(data.len());
        for part in data.chunks(block) {
            out.extend(self.key.decrypt(Pkcs1v15Encrypt, part)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};

    fn keypair() -> (Encryptor, Decryptor) {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        (
            Encryptor::new(private.to_public_key()),
            Decryptor::new(private),
        )
    }

    #[test]
    fn test_encrypt_multi_block() {
        let (encryptor, decryptor) = keypair();
        let body: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let sealed = encryptor.encrypt(&body).unwrap();
        assert_eq!(sealed.len() % 128, 0);
        assert!(sealed.len() > 128);
        assert_eq!(decryptor.decrypt(&sealed).unwrap(), body);
    }

    #[test]
    fn test_decrypt_rejects_truncated() {
        let (encryptor, decryptor) = keypair();
        let sealed = encryptor.encrypt(b"hello").unwrap();
        assert!(decryptor.decrypt(&sealed[..sealed.len() - 1]).is_err());
        assert!(decryptor.decrypt(b"").is_err());
    }

    #[test]
    fn test_load_keys_from_pem() {
        let dir = tempfile::tempdir().unwrap();
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let private_path = dir.path().join("private.pem");
        let public_path = dir.path().join("public.pem");
        std::fs::write(
            &private_path,
            private.to_pkcs1_pem(LineEnding::LF).unwrap().as_bytes(),
        )
        .unwrap();
        std::fs::write(
            &public_path,
            private
                .to_public_key()
                .to_public_key_pem(LineEnding::LF)
                .unwrap(),
        )
        .unwrap();

        let encryptor = Encryptor::from_pem_file(&public_path).unwrap();
        let decryptor = Decryptor::from_pem_file(&private_path).unwrap();
        let sealed = encryptor.encrypt(b"metric").unwrap();
        assert_eq!(decryptor.decrypt(&sealed).unwrap(), b"metric");

        assert!(matches!(
            Encryptor::from_pem_file(dir.path().join("missing.pem")),
            Err(CodecError::Key(_))
        ));
        assert!(matches!(
            Decryptor::from_pem_file(&public_path),
            Err(CodecError::Key(_))
        ));
    }
}

//! JSON-over-HTTP transport.

use std::net::IpAddr;

use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};

use crate::codec::{Codec, HASH_HEADER, REAL_IP_HEADER};
use crate::delivery::{Transport, TransportError};
use crate::model::Metric;

/// Sends each metric as `POST /update` with a gzip-compressed JSON body.
///
/// The body passes through [`Codec::seal`]: the `HashSHA256` header signs
/// the uncompressed JSON and, with an encryptor configured, the compressed
/// body is RSA-encrypted.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    codec: Codec,
    real_ip: Option<IpAddr>,
}

impl HttpTransport {
    /// Create a transport for a collector at `address` (`host:port` or a
    /// full base URL).
    pub fn new(address: &str, codec: Codec) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;
        Ok(Self {
            client,
            url: update_url(address),
            codec,
            real_ip: None,
        })
    }

    /// Declare this source address in the `X-Real-IP` header.
    pub fn with_real_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.real_ip = ip;
        self
    }

    /// Target URL of every request.
    pub fn url(&self) -> &str {
        &self.url
    }
}

fn update_url(address: &str) -> String {
    let base = address.trim_end_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        format!("{base}/update")
    } else {
        format!("http://{base}/update")
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_builder() {
        TransportError::Config(err.to_string())
    } else {
        TransportError::Connect(err.to_string())
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, metric: &Metric) -> Result<(), TransportError> {
        let sealed = self.codec.seal(metric)?;

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .header(ACCEPT_ENCODING, "gzip")
            .body(sealed.body);
        if let Some(signature) = sealed.signature {
            request = request.header(HASH_HEADER, signature);
        }
        if let Some(ip) = self.real_ip {
            request = request.header(REAL_IP_HEADER, ip.to_string());
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let code = status.as_u16().to_string();
        let message = status.canonical_reason().unwrap_or("unknown status").to_string();
        if status.is_server_error() {
            Err(TransportError::Server { code, message })
        } else {
            Err(TransportError::Rejected { code, message })
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

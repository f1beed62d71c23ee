//! Request middleware: trusted subnet, body decryption, signature check.

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes, to_bytes},
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use ipnet::IpNet;

use crate::codec::{HASH_HEADER, REAL_IP_HEADER};
use crate::server::AppState;

/// Largest request body buffered by the middleware.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Network whose members may report metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedSubnet(IpNet);

impl TrustedSubnet {
    pub fn new(network: IpNet) -> Self {
        Self(network)
    }

    /// Parse CIDR notation such as `192.168.1.0/24`.
    pub fn parse(cidr: &str) -> Result<Self, ipnet::AddrParseError> {
        cidr.trim().parse().map(Self)
    }

    pub fn network(&self) -> IpNet {
        self.0
    }

    /// Whether a declared source address belongs to the network.
    ///
    /// A missing or unparsable address is never allowed.
    pub fn allows(&self, declared: Option<&str>) -> bool {
        declared
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
            .is_some_and(|ip| self.0.contains(&ip))
    }
}

impl std::fmt::Display for TrustedSubnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Reject requests whose `X-Real-IP` is outside the trusted network.
pub(super) async fn check_trusted_subnet(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(subnet) = &state.trusted_subnet else {
        return next.run(request).await;
    };
    let declared = request
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok());
    if subnet.allows(declared) {
        return next.run(request).await;
    }
    tracing::warn!(declared = ?declared, subnet = %subnet, "Request from untrusted address rejected");
    (StatusCode::FORBIDDEN, "forbidden").into_response()
}

/// Replace an RSA-encrypted body with its plaintext.
///
/// Empty bodies pass through untouched.
pub(super) async fn decrypt_body(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(decryptor) = &state.decryptor else {
        return next.run(request).await;
    };
    let (mut parts, body) = request.into_parts();
    let bytes = match read_body(body).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };
    if bytes.is_empty() {
        return next.run(Request::from_parts(parts, Body::empty())).await;
    }

    match decryptor.decrypt(&bytes) {
        Ok(plain) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            next.run(Request::from_parts(parts, Body::from(plain))).await
        }
        Err(err) => {
            tracing::warn!(error = %err, "Body decryption failed");
            (StatusCode::BAD_REQUEST, "cannot decrypt body").into_response()
        }
    }
}

/// Verify the `HashSHA256` header against the decompressed body.
///
/// Requests without the header are accepted.
pub(super) async fn verify_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(verifier) = &state.verifier else {
        return next.run(request).await;
    };
    let Some(signature) = request
        .headers()
        .get(HASH_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
    else {
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();
    let bytes = match read_body(body).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };
    if let Err(err) = verifier.verify(&bytes, &signature) {
        tracing::warn!(error = %err, uri = %parts.uri, "Signature check failed");
        return (StatusCode::BAD_REQUEST, "hash mismatch").into_response();
    }
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

async fn read_body(body: Body) -> Result<Bytes, Response> {
    to_bytes(body, MAX_BODY_BYTES).await.map_err(|err| {
        tracing::warn!(error = %err, "Cannot read request body");
        (StatusCode::BAD_REQUEST, "cannot read body").into_response()
    })
}

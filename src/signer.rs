//! # Handshake Signing
//!
//! Builds the canonical signing string for the WebSocket upgrade request,
//! signs it with HMAC-SHA256 and assembles the headers the server checks.
//!
//! The canonical string is a compatibility contract with the server's
//! verifier: component order, quoting and the `\n` separator must match
//! byte for byte or the upgrade is rejected.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Component list announced in `@signature-params` and `Signature-Input`.
///
/// Session id precedes correlation id here even though the component lines
/// list them the other way round; the server verifies exactly this text.
pub const SIGNATURE_COMPONENTS: &str = "(\"@request-target\" \"@authority\" \"audiohook-organization-id\" \"audiohook-session-id\" \"audiohook-correlation-id\" \"x-api-key\")";

pub const SIGNATURE_ALGORITHM: &str = "hmac-sha256";

/// Compute `base64(HMAC-SHA256(secret, signing_string))`.
pub fn sign(signing_string: &[u8], secret: &[u8]) -> ClientResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| ClientError::CryptoUnavailable(format!("Failed to create HMAC: {}", e)))?;
    mac.update(signing_string);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// The request components covered by the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    pub request_target: String,
    pub authority: String,
    pub organization_id: String,
    pub correlation_id: String,
    pub session_id: String,
    pub api_key: String,
}

impl CanonicalRequest {
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        Ok(Self {
            request_target: config.request_target()?,
            authority: config.authority()?,
            organization_id: config.auth.organization_id.clone(),
            correlation_id: config.auth.correlation_id.clone(),
            session_id: config.session.session_id.clone(),
            api_key: config.auth.api_key.clone(),
        })
    }

    /// Newline-joined `"<component>": <value>` lines followed by the
    /// `@signature-params` trailer. No trailing newline.
    pub fn signing_string(&self) -> String {
        [
            format!("\"@request-target\": {}", self.request_target),
            format!("\"@authority\": {}", self.authority),
            format!("\"audiohook-organization-id\": {}", self.organization_id),
            format!("\"audiohook-correlation-id\": {}", self.correlation_id),
            format!("\"audiohook-session-id\": {}", self.session_id),
            format!("\"x-api-key\": {}", self.api_key),
            format!("@signature-params: {}", SIGNATURE_COMPONENTS),
        ]
        .join("\n")
    }
}

/// Parameters of the `Signature-Input` header other than the component list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParams {
    pub nonce: String,
    /// Unix seconds
    pub created: i64,
    /// Unix seconds
    pub expires: i64,
}

impl SignatureParams {
    /// Stamp `created` with the current time. A random nonce is generated
    /// when none is configured.
    pub fn now(nonce: Option<String>, ttl_secs: u64) -> Self {
        let created = chrono::Utc::now().timestamp();
        let nonce = nonce.unwrap_or_else(|| BASE64.encode(uuid::Uuid::new_v4().as_bytes()));
        Self {
            nonce,
            created,
            expires: created + ttl_secs as i64,
        }
    }
}

/// Ordered header list for the WebSocket upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeHeaders(Vec<(String, String)>);

impl HandshakeHeaders {
    pub fn build(
        request: &CanonicalRequest,
        participant_id: &str,
        secret: &[u8],
        params: &SignatureParams,
    ) -> ClientResult<Self> {
        let signature = sign(request.signing_string().as_bytes(), secret)?;
        let signature_input = format!(
            "sig1={};keyid=\"{}\";nonce=\"{}\";alg=\"{}\";created={};expires={}",
            SIGNATURE_COMPONENTS,
            request.api_key,
            params.nonce,
            SIGNATURE_ALGORITHM,
            params.created,
            params.expires,
        );

        Ok(Self(vec![
            ("Audiohook-Organization-Id".to_string(), request.organization_id.clone()),
            ("Audiohook-Correlation-Id".to_string(), request.correlation_id.clone()),
            ("Audiohook-Session-Id".to_string(), request.session_id.clone()),
            ("X-API-KEY".to_string(), request.api_key.clone()),
            ("Signature".to_string(), format!("sig1=:{}:", signature)),
            ("Signature-Input".to_string(), signature_input),
            ("participantId".to_string(), participant_id.to_string()),
        ]))
    }

    /// Build the full header set straight from configuration.
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        let request = CanonicalRequest::from_config(config)?;
        let params = SignatureParams::now(config.auth.nonce.clone(), config.auth.signature_ttl_secs);
        Self::build(
            &request,
            &config.session.participant_id,
            config.auth.client_secret.as_bytes(),
            &params,
        )
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

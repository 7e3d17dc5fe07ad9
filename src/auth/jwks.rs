//! C1: JWKS-backed JWT verification.
//!
//! Grounded on `other_examples/…guyernest-rust-mcp-sdk…jwt_validator.rs`
//! (RwLock key cache keyed by `kid`, `DecodingKey::from_rsa_components`,
//! refresh-on-miss) and the teacher's `auth/jwt.rs` (`JwtKeys` shape,
//! `tracing::debug!` logging on sign/verify).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use crate::config::JwksConfig;

const CACHE_TTL: Duration = Duration::from_secs(3600);
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("invalid token")]
    InvalidToken,
    #[error("issuer mismatch")]
    IssuerMismatch,
    #[error("audience mismatch")]
    AudienceMismatch,
    #[error("org_name mismatch")]
    OrgMismatch,
    #[error("jwks unavailable: {0}")]
    JwksUnavailable(String),
    #[error("token has no email claim")]
    MissingEmail,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: String,
    #[serde(rename = "use")]
    key_use: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

struct KeyCache {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
}

impl KeyCache {
    fn is_stale(&self) -> bool {
        match self.fetched_at {
            None => true,
            Some(t) => t.elapsed() > CACHE_TTL,
        }
    }
}

/// Fetches, caches, and refreshes RSA keys from an IdP JWKS endpoint;
/// parses and validates JWTs carrying claims this platform cares about.
pub struct JwksVerifier {
    config: JwksConfig,
    http: reqwest::Client,
    cache: RwLock<KeyCache>,
    // Single-flight: only one refresh runs at a time; losers block on
    // this mutex, then re-read the now-fresh cache.
    refresh_lock: Mutex<()>,
}

impl JwksVerifier {
    pub fn new(config: JwksConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            config,
            http,
            cache: RwLock::new(KeyCache {
                keys: HashMap::new(),
                fetched_at: None,
            }),
            refresh_lock: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn with_client(config: JwksConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            cache: RwLock::new(KeyCache {
                keys: HashMap::new(),
                fetched_at: None,
            }),
            refresh_lock: Mutex::new(()),
        }
    }

    /// `verify(tokenString) -> Claims | ErrorKind`.
    pub async fn verify(&self, token: &str) -> Result<serde_json::Map<String, serde_json::Value>, VerifyError> {
        let header = decode_header(token).map_err(|_| VerifyError::InvalidToken)?;
        if !matches!(header.alg, Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512) {
            return Err(VerifyError::InvalidToken);
        }
        let kid = header.kid.ok_or(VerifyError::InvalidToken)?;

        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(std::slice::from_ref(&self.config.issuer));
        validation.set_audience(std::slice::from_ref(&self.config.audience));

        let data = decode::<serde_json::Value>(token, &key, &validation)
            .map_err(|_| VerifyError::InvalidToken)?;

        let claims = data
            .claims
            .as_object()
            .cloned()
            .ok_or(VerifyError::InvalidToken)?;

        // jsonwebtoken's Validation already enforces iss/aud/exp; the
        // explicit re-checks below exist only to attribute a precise
        // ErrorKind to iss vs aud failures per §4.1 step 4.
        if let Some(iss) = claims.get("iss").and_then(|v| v.as_str()) {
            if iss != self.config.issuer {
                return Err(VerifyError::IssuerMismatch);
            }
        }
        if let Some(org_name) = &self.config.org_name {
            match claims.get("org_name").and_then(|v| v.as_str()) {
                Some(actual) if actual == org_name => {}
                _ => return Err(VerifyError::OrgMismatch),
            }
        }

        Ok(claims)
    }

    /// `verifyAndExtractEmail(tokenString) -> email | ErrorKind`.
    pub async fn verify_and_extract_email(&self, token: &str) -> Result<String, VerifyError> {
        let claims = self.verify(token).await?;
        claims
            .get("email")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or(VerifyError::MissingEmail)
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, VerifyError> {
        {
            let cache = self.cache.read().await;
            if !cache.is_stale() {
                if let Some(key) = cache.keys.get(kid) {
                    return Ok(key.clone());
                }
            }
        }

        self.refresh().await?;

        let cache = self.cache.read().await;
        cache.keys.get(kid).cloned().ok_or(VerifyError::InvalidToken)
    }

    async fn refresh(&self) -> Result<(), VerifyError> {
        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        {
            let cache = self.cache.read().await;
            if !cache.is_stale() {
                return Ok(());
            }
        }

        let resp = self
            .http
            .get(&self.config.url)
            .send()
            .await
            .map_err(|e| VerifyError::JwksUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(VerifyError::JwksUnavailable(format!(
                "jwks endpoint returned {}",
                resp.status()
            )));
        }

        let jwks: JwksResponse = resp
            .json()
            .await
            .map_err(|e| VerifyError::JwksUnavailable(e.to_string()))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            if let Some(u) = &jwk.key_use {
                if u != "sig" {
                    continue;
                }
            }
            if let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) {
                match DecodingKey::from_rsa_components(&n, &e) {
                    Ok(key) => {
                        keys.insert(kid, key);
                    }
                    Err(err) => {
                        tracing::warn!(%err, "failed to parse JWK");
                    }
                }
            }
        }

        tracing::info!(keys_count = keys.len(), "refreshed JWKS cache");

        let mut cache = self.cache.write().await;
        cache.keys = keys;
        cache.fetched_at = Some(Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::{RsaPrivateKey, RsaPublicKey};
    use serde::Serialize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Serialize)]
    struct Claims {
        iss: String,
        aud: String,
        exp: usize,
        email: String,
        org_name: Option<String>,
    }

    fn rsa_keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let mut rng = rand::thread_rng();
        let priv_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pub_key = RsaPublicKey::from(&priv_key);
        (priv_key, pub_key)
    }

    fn b64url(bytes: &[u8]) -> String {
        use base64::Engine;
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }

    async fn serve_jwks(kid: &str, pub_key: &RsaPublicKey) -> MockServer {
        use rsa::traits::PublicKeyParts;
        let n = b64url(&pub_key.n().to_bytes_be());
        let e = b64url(&pub_key.e().to_bytes_be());
        let body = serde_json::json!({
            "keys": [{"kid": kid, "kty": "RSA", "use": "sig", "n": n, "e": e}]
        });
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
        server
    }

    fn sign(priv_key: &RsaPrivateKey, kid: &str, claims: &Claims) -> String {
        let der = priv_key.to_pkcs1_der().unwrap();
        let encoding_key = EncodingKey::from_rsa_der(der.as_bytes());
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        encode(&header, claims, &encoding_key).unwrap()
    }

    fn cfg(url: String) -> JwksConfig {
        JwksConfig {
            url,
            issuer: "https://idp.example".into(),
            audience: "consent-engine".into(),
            org_name: None,
        }
    }

    #[tokio::test]
    async fn verifies_valid_token_and_caches_key() {
        let (priv_key, pub_key) = rsa_keypair();
        let server = serve_jwks("key-1", &pub_key).await;
        let verifier = JwksVerifier::new(cfg(format!("{}/jwks", server.uri())));

        let claims = Claims {
            iss: "https://idp.example".into(),
            aud: "consent-engine".into(),
            exp: (time::OffsetDateTime::now_utc() + time::Duration::hours(1)).unix_timestamp()
                as usize,
            email: "u@x".into(),
            org_name: None,
        };
        let token = sign(&priv_key, "key-1", &claims);

        let email = verifier.verify_and_extract_email(&token).await.unwrap();
        assert_eq!(email, "u@x");

        // Second verification must not hit the network again (cache hit).
        server.reset().await;
        let email2 = verifier.verify_and_extract_email(&token).await.unwrap();
        assert_eq!(email2, "u@x");
    }

    #[tokio::test]
    async fn unknown_kid_triggers_single_refresh_then_fails_cleanly() {
        let (_priv_key, pub_key) = rsa_keypair();
        let server = serve_jwks("key-1", &pub_key).await;
        let verifier = JwksVerifier::new(cfg(format!("{}/jwks", server.uri())));

        let err = match verifier.key_for("does-not-exist").await {
            Ok(_) => panic!("expected lookup to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, VerifyError::InvalidToken));
    }

    #[tokio::test]
    async fn rejects_wrong_issuer() {
        let (priv_key, pub_key) = rsa_keypair();
        let server = serve_jwks("key-1", &pub_key).await;
        let verifier = JwksVerifier::new(cfg(format!("{}/jwks", server.uri())));

        let claims = Claims {
            iss: "https://someone-else.example".into(),
            aud: "consent-engine".into(),
            exp: (time::OffsetDateTime::now_utc() + time::Duration::hours(1)).unix_timestamp()
                as usize,
            email: "u@x".into(),
            org_name: None,
        };
        let token = sign(&priv_key, "key-1", &claims);
        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::InvalidToken));
    }

    #[tokio::test]
    async fn org_name_mismatch_is_rejected() {
        let (priv_key, pub_key) = rsa_keypair();
        let server = serve_jwks("key-1", &pub_key).await;
        let mut config = cfg(format!("{}/jwks", server.uri()));
        config.org_name = Some("gov-dx".into());
        let verifier = JwksVerifier::new(config);

        let claims = Claims {
            iss: "https://idp.example".into(),
            aud: "consent-engine".into(),
            exp: (time::OffsetDateTime::now_utc() + time::Duration::hours(1)).unix_timestamp()
                as usize,
            email: "u@x".into(),
            org_name: Some("someone-else".into()),
        };
        let token = sign(&priv_key, "key-1", &claims);
        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::OrgMismatch));
    }
}

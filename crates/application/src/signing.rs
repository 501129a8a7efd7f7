use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use hmac::{Hmac, Mac};
use jitgate_core::{AppError, AppResult};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::store_ports::NonceRepository;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signing key identifier.
pub const HEADER_KEY_ID: &str = "X-JIT-KeyID";
/// Header carrying the Unix epoch request timestamp.
pub const HEADER_TIMESTAMP: &str = "X-JIT-Timestamp";
/// Header carrying the unique request nonce.
pub const HEADER_NONCE: &str = "X-JIT-Nonce";
/// Header carrying the HMAC-SHA256 hex-encoded signature.
pub const HEADER_SIGNATURE: &str = "X-JIT-Signature";

/// Maximum age of a request timestamp before rejection.
pub const MAX_TIMESTAMP_SKEW_SECONDS: i64 = 300;

/// Nonce retention: slightly past the skew window on both sides.
const NONCE_TTL_SECONDS: i64 = 2 * MAX_TIMESTAMP_SKEW_SECONDS;

/// Signing key material: key id → secret.
///
/// Holds every currently valid key so rotation can overlap; immutable after
/// load, rotation propagates by process restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySet {
    keys: BTreeMap<String, String>,
}

impl KeySet {
    /// Parses the secret layout: a JSON object `{key_id: secret}`, or a plain
    /// string treated as a single key under the id `default`.
    pub fn parse(raw: &str) -> AppResult<Self> {
        if let Ok(keys) = serde_json::from_str::<BTreeMap<String, String>>(raw) {
            if !keys.is_empty() {
                return Ok(Self { keys });
            }
        }

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation(
                "signing key material must not be empty".to_owned(),
            ));
        }

        Ok(Self {
            keys: BTreeMap::from([("default".to_owned(), trimmed.to_owned())]),
        })
    }

    /// Creates a key set holding a single key.
    #[must_use]
    pub fn single(key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            keys: BTreeMap::from([(key_id.into(), secret.into())]),
        }
    }

    /// Returns the secret for one key id.
    #[must_use]
    pub fn secret(&self, key_id: &str) -> Option<&str> {
        self.keys.get(key_id).map(String::as_str)
    }

    /// Iterates every configured `(key_id, secret)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.keys
            .iter()
            .map(|(key_id, secret)| (key_id.as_str(), secret.as_str()))
    }

    /// Returns the key signers use: the greatest key id in the set.
    ///
    /// The layout carries no timestamps, so rotation runbooks add the new key
    /// under an id that sorts above the old one.
    pub fn signing_key(&self) -> AppResult<(&str, &str)> {
        self.keys
            .iter()
            .next_back()
            .map(|(key_id, secret)| (key_id.as_str(), secret.as_str()))
            .ok_or_else(|| AppError::Validation("signing key set is empty".to_owned()))
    }
}

/// The four signature headers extracted from an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSignature {
    /// Presented key id.
    pub key_id: String,
    /// Presented epoch-seconds timestamp.
    pub timestamp: String,
    /// Presented one-shot nonce.
    pub nonce: String,
    /// Presented hex-encoded MAC.
    pub signature: String,
}

impl InboundSignature {
    /// Extracts the signature headers with case-insensitive name matching.
    pub fn from_headers<'a>(
        headers: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> AppResult<Self> {
        let mut key_id = None;
        let mut timestamp = None;
        let mut nonce = None;
        let mut signature = None;

        for (name, value) in headers {
            if name.eq_ignore_ascii_case(HEADER_KEY_ID) {
                key_id = Some(value.to_owned());
            } else if name.eq_ignore_ascii_case(HEADER_TIMESTAMP) {
                timestamp = Some(value.to_owned());
            } else if name.eq_ignore_ascii_case(HEADER_NONCE) {
                nonce = Some(value.to_owned());
            } else if name.eq_ignore_ascii_case(HEADER_SIGNATURE) {
                signature = Some(value.to_owned());
            }
        }

        match (key_id, timestamp, nonce, signature) {
            (Some(key_id), Some(timestamp), Some(nonce), Some(signature)) => Ok(Self {
                key_id,
                timestamp,
                nonce,
                signature,
            }),
            _ => Err(AppError::Unauthorized(
                "missing required signature headers".to_owned(),
            )),
        }
    }
}

/// Signature headers attached to an outbound signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    /// Key id the payload was signed with.
    pub key_id: String,
    /// Epoch-seconds timestamp.
    pub timestamp: String,
    /// Fresh one-shot nonce.
    pub nonce: String,
    /// Hex-encoded MAC.
    pub signature: String,
}

impl SignedHeaders {
    /// Returns the headers as name/value pairs ready to attach.
    #[must_use]
    pub fn as_pairs(&self) -> [(&'static str, &str); 4] {
        [
            (HEADER_KEY_ID, self.key_id.as_str()),
            (HEADER_TIMESTAMP, self.timestamp.as_str()),
            (HEADER_NONCE, self.nonce.as_str()),
            (HEADER_SIGNATURE, self.signature.as_str()),
        ]
    }
}

/// Builds the canonical message to be signed.
///
/// Format: `timestamp\nnonce\nMETHOD\npath\nhex(sha256(body))`, byte-exact on
/// both sides of the plugin boundary.
#[must_use]
pub fn build_signing_message(
    timestamp: &str,
    nonce: &str,
    method: &str,
    path: &str,
    body: &[u8],
) -> String {
    let body_hash = hex::encode(Sha256::digest(body));
    format!(
        "{timestamp}\n{nonce}\n{method}\n{path}\n{body_hash}",
        method = method.to_ascii_uppercase()
    )
}

/// Computes the HMAC-SHA256 of a message as lowercase hex.
pub fn compute_signature(secret: &str, message: &str) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|error| AppError::Internal(format!("failed to key MAC: {error}")))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn verify_signature(secret: &str, message: &str, signature_hex: &str) -> bool {
    let Ok(expected_tag) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message.as_bytes());
    // Mac::verify_slice is a constant-time comparison.
    mac.verify_slice(&expected_tag).is_ok()
}

/// Validates inbound HMAC-signed requests.
#[derive(Clone)]
pub struct RequestAuthenticator {
    keys: KeySet,
    nonces: Arc<dyn NonceRepository>,
}

impl RequestAuthenticator {
    /// Creates a validator over the full key set and a nonce store.
    #[must_use]
    pub fn new(keys: KeySet, nonces: Arc<dyn NonceRepository>) -> Self {
        Self { keys, nonces }
    }

    /// Verifies timestamp freshness, nonce uniqueness, and the signature.
    ///
    /// Every validation failure is `AppError::Unauthorized` and is never
    /// retried; the reason string is what lands in the logs.
    pub async fn validate(
        &self,
        method: &str,
        path: &str,
        signature: &InboundSignature,
        body: &[u8],
    ) -> AppResult<()> {
        let timestamp = signature.timestamp.parse::<i64>().map_err(|error| {
            AppError::Unauthorized(format!("invalid timestamp format: {error}"))
        })?;
        let skew = (Utc::now().timestamp() - timestamp).abs();
        if skew > MAX_TIMESTAMP_SKEW_SECONDS {
            return Err(AppError::Unauthorized(format!(
                "timestamp outside allowed skew: {skew}s"
            )));
        }

        if self
            .nonces
            .exists(signature.key_id.as_str(), signature.nonce.as_str())
            .await?
        {
            return Err(AppError::Unauthorized("nonce already used".to_owned()));
        }

        let message = build_signing_message(
            signature.timestamp.as_str(),
            signature.nonce.as_str(),
            method,
            path,
            body,
        );

        // Check the presented key id first, then every configured secret so
        // rotation overlap never rejects a correctly signed request.
        let mut matched = self
            .keys
            .secret(signature.key_id.as_str())
            .is_some_and(|secret| {
                verify_signature(secret, message.as_str(), signature.signature.as_str())
            });
        if !matched {
            matched = self.keys.iter().any(|(_, secret)| {
                verify_signature(secret, message.as_str(), signature.signature.as_str())
            });
        }
        if !matched {
            return Err(AppError::Unauthorized("invalid signature".to_owned()));
        }

        let expires_at = Utc::now().timestamp() + NONCE_TTL_SECONDS;
        let stored = self
            .nonces
            .put_once(
                signature.key_id.as_str(),
                signature.nonce.as_str(),
                expires_at,
            )
            .await?;
        if !stored {
            // A concurrent request won the unique put: same nonce, replay.
            return Err(AppError::Unauthorized("nonce already used".to_owned()));
        }

        Ok(())
    }
}

/// Signs outbound webhook callbacks with the newest configured key.
#[derive(Debug, Clone)]
pub struct CallbackSigner {
    keys: KeySet,
}

impl CallbackSigner {
    /// Creates a signer over the callback key set.
    #[must_use]
    pub fn new(keys: KeySet) -> Self {
        Self { keys }
    }

    /// Produces the four signature headers for one outbound payload.
    pub fn sign(&self, method: &str, path: &str, body: &[u8]) -> AppResult<SignedHeaders> {
        let (key_id, secret) = self.keys.signing_key()?;
        let timestamp = Utc::now().timestamp().to_string();
        let nonce = Uuid::new_v4().to_string();

        let message =
            build_signing_message(timestamp.as_str(), nonce.as_str(), method, path, body);
        let signature = compute_signature(secret, message.as_str())?;

        Ok(SignedHeaders {
            key_id: key_id.to_owned(),
            timestamp,
            nonce,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use jitgate_core::{AppError, AppResult};
    use tokio::sync::Mutex;

    use super::{
        CallbackSigner, InboundSignature, KeySet, RequestAuthenticator, build_signing_message,
    };
    use crate::store_ports::NonceRepository;

    #[derive(Default)]
    struct FakeNonceRepository {
        seen: Mutex<HashSet<(String, String)>>,
    }

    #[async_trait]
    impl NonceRepository for FakeNonceRepository {
        async fn put_once(&self, key_id: &str, nonce: &str, _expires_at: i64) -> AppResult<bool> {
            Ok(self
                .seen
                .lock()
                .await
                .insert((key_id.to_owned(), nonce.to_owned())))
        }

        async fn exists(&self, key_id: &str, nonce: &str) -> AppResult<bool> {
            Ok(self
                .seen
                .lock()
                .await
                .contains(&(key_id.to_owned(), nonce.to_owned())))
        }

        async fn purge_expired(&self, _now_epoch_seconds: i64) -> AppResult<u64> {
            Ok(0)
        }
    }

    fn signed_header_pairs(headers: &super::SignedHeaders) -> Vec<(&str, &str)> {
        headers.as_pairs().to_vec()
    }

    #[test]
    fn canonical_message_is_byte_exact() {
        let message = build_signing_message("1700000000", "abc", "post", "/requests", b"{}");
        assert_eq!(
            message,
            "1700000000\nabc\nPOST\n/requests\n\
             44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn key_set_parses_json_map_and_plain_string() {
        let mapped = KeySet::parse(r#"{"k1":"secret-one","k2":"secret-two"}"#).unwrap();
        assert_eq!(mapped.secret("k1"), Some("secret-one"));
        assert_eq!(mapped.signing_key().unwrap().0, "k2");

        let plain = KeySet::parse("just-a-secret").unwrap();
        assert_eq!(plain.secret("default"), Some("just-a-secret"));

        assert!(KeySet::parse("   ").is_err());
    }

    #[tokio::test]
    async fn sign_then_validate_round_trips() {
        let keys = KeySet::single("k1", "secret-one");
        let signer = CallbackSigner::new(keys.clone());
        let validator = RequestAuthenticator::new(keys, Arc::new(FakeNonceRepository::default()));

        let body = br#"{"request_id":"r1"}"#;
        let headers = signer.sign("POST", "/jit/webhook", body).unwrap();
        let signature =
            InboundSignature::from_headers(signed_header_pairs(&headers)).expect("headers");

        validator
            .validate("POST", "/jit/webhook", &signature, body)
            .await
            .expect("valid signature");
    }

    #[tokio::test]
    async fn replayed_nonce_is_rejected() {
        let keys = KeySet::single("k1", "secret-one");
        let signer = CallbackSigner::new(keys.clone());
        let validator = RequestAuthenticator::new(keys, Arc::new(FakeNonceRepository::default()));

        let body = b"payload";
        let headers = signer.sign("POST", "/requests", body).unwrap();
        let signature = InboundSignature::from_headers(signed_header_pairs(&headers)).unwrap();

        validator
            .validate("POST", "/requests", &signature, body)
            .await
            .expect("first use succeeds");
        let replay = validator
            .validate("POST", "/requests", &signature, body)
            .await
            .expect_err("replay fails");
        assert!(matches!(replay, AppError::Unauthorized(reason) if reason.contains("nonce")));
    }

    #[tokio::test]
    async fn tampered_body_is_rejected() {
        let keys = KeySet::single("k1", "secret-one");
        let signer = CallbackSigner::new(keys.clone());
        let validator = RequestAuthenticator::new(keys, Arc::new(FakeNonceRepository::default()));

        let headers = signer.sign("POST", "/requests", b"original").unwrap();
        let signature = InboundSignature::from_headers(signed_header_pairs(&headers)).unwrap();

        let result = validator
            .validate("POST", "/requests", &signature, b"tampered")
            .await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn stale_timestamp_is_rejected() {
        let keys = KeySet::single("k1", "secret-one");
        let validator =
            RequestAuthenticator::new(keys.clone(), Arc::new(FakeNonceRepository::default()));

        let stale = (Utc::now().timestamp() - 400).to_string();
        let message = build_signing_message(stale.as_str(), "n1", "GET", "/requests", b"");
        let signature = InboundSignature {
            key_id: "k1".to_owned(),
            timestamp: stale,
            nonce: "n1".to_owned(),
            signature: super::compute_signature("secret-one", message.as_str()).unwrap(),
        };

        let result = validator.validate("GET", "/requests", &signature, b"").await;
        assert!(matches!(result, Err(AppError::Unauthorized(reason)) if reason.contains("skew")));
    }

    #[test]
    fn missing_header_is_rejected() {
        let result = InboundSignature::from_headers([
            ("X-JIT-KeyID", "k1"),
            ("X-JIT-Timestamp", "1700000000"),
            ("X-JIT-Signature", "deadbeef"),
        ]);
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let signature = InboundSignature::from_headers([
            ("x-jit-keyid", "k1"),
            ("X-JIT-TIMESTAMP", "1700000000"),
            ("x-Jit-Nonce", "n1"),
            ("x-jit-signature", "deadbeef"),
        ])
        .expect("case-insensitive match");
        assert_eq!(signature.key_id, "k1");
        assert_eq!(signature.nonce, "n1");
    }

    #[tokio::test]
    async fn rotation_overlap_validates_both_keys_then_only_the_new_one() {
        let old_keys = KeySet::single("k1", "secret-one");
        let overlap = KeySet::parse(r#"{"k1":"secret-one","k2":"secret-two"}"#).unwrap();
        let new_keys = KeySet::single("k2", "secret-two");

        let body = b"rotation";
        let overlap_validator =
            RequestAuthenticator::new(overlap.clone(), Arc::new(FakeNonceRepository::default()));

        // Requests signed by the old key still validate during the overlap.
        let old_signed = CallbackSigner::new(old_keys).sign("POST", "/requests", body).unwrap();
        let old_signature = InboundSignature::from_headers(signed_header_pairs(&old_signed)).unwrap();
        overlap_validator
            .validate("POST", "/requests", &old_signature, body)
            .await
            .expect("old key accepted during overlap");

        // The rolled-over signer picks k2 and also validates.
        let new_signed = CallbackSigner::new(overlap).sign("POST", "/requests", body).unwrap();
        assert_eq!(new_signed.key_id, "k2");
        let new_signature = InboundSignature::from_headers(signed_header_pairs(&new_signed)).unwrap();
        overlap_validator
            .validate("POST", "/requests", &new_signature, body)
            .await
            .expect("new key accepted during overlap");

        // After the old key is removed, only k2 signatures validate.
        let final_validator =
            RequestAuthenticator::new(new_keys, Arc::new(FakeNonceRepository::default()));
        let result = final_validator
            .validate("POST", "/requests", &old_signature, body)
            .await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }
}

//! Local, unverified reading of access token claims.
//!
//! The payload is only used to guess whether a token is about to expire so the
//! gateway can refresh before sending. The backend remains the authority on
//! whether a token is valid; nothing here checks a signature.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::{Map, Value};

/// Seconds shaved off `exp` to absorb clock drift and request latency
pub const DEFAULT_SKEW_SECS: i64 = 30;

/// Decoded JWT payload
#[derive(Debug, Clone, PartialEq)]
pub struct AccessClaims(Map<String, Value>);

impl AccessClaims {
    /// Expiry as seconds since the epoch. Zero, negative and non-numeric values count as absent.
    pub fn exp(&self) -> Option<i64> {
        let exp = match self.0.get("exp")? {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|exp| exp.floor() as i64))?,
            Value::String(text) => text.trim().parse::<f64>().ok()?.floor() as i64,
            _ => return None,
        };
        (exp > 0).then_some(exp)
    }

    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.0.get(claim)
    }
}

/// Decode the payload segment of a three-part JWT
pub fn decode_claims(token: &str) -> Option<AccessClaims> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };

    // Accept standard-alphabet and padded payloads too
    let payload: String = payload
        .trim_end_matches('=')
        .chars()
        .map(|ch| match ch {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    match serde_json::from_slice::<Value>(&bytes).ok()? {
        Value::Object(map) => Some(AccessClaims(map)),
        _ => None,
    }
}

/// Whether `token` expires within `skew_secs` from now.
/// Tokens that cannot be decoded or carry no `exp` are treated as non-expiring.
pub fn is_expired(token: &str, skew_secs: i64) -> bool {
    is_expired_at(token, skew_secs, chrono::Utc::now().timestamp())
}

/// `is_expired` against an explicit clock
pub fn is_expired_at(token: &str, skew_secs: i64, now: i64) -> bool {
    match decode_claims(token).and_then(|claims| claims.exp()) {
        Some(exp) => now >= exp - skew_secs,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unsigned_token(payload: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{payload}.signature")
    }

    #[test]
    fn test_decodes_payload() {
        let token = unsigned_token(&json!({ "exp": 1_700_000_000, "user_id": 7 }));
        let claims = decode_claims(&token).unwrap();

        assert_eq!(claims.exp(), Some(1_700_000_000));
        assert_eq!(claims.get("user_id"), Some(&json!(7)));
    }

    #[test]
    fn test_decodes_token_minted_by_jsonwebtoken() {
        #[derive(serde::Serialize)]
        struct Claims {
            exp: i64,
            user_id: u64,
        }

        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &Claims {
                exp: 2_000_000_000,
                user_id: 3,
            },
            &jsonwebtoken::EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        assert_eq!(decode_claims(&token).unwrap().exp(), Some(2_000_000_000));
    }

    #[test]
    fn test_undecodable_tokens_never_expire() {
        for token in ["", "abc", "a.b", "a.!!!.c", "a.b.c.d"] {
            assert!(decode_claims(token).is_none(), "{token:?} should not decode");
            assert!(!is_expired_at(token, DEFAULT_SKEW_SECS, i64::MAX - 1));
        }

        let not_an_object = format!("h.{}.s", URL_SAFE_NO_PAD.encode("[1,2]"));
        assert!(!is_expired_at(&not_an_object, DEFAULT_SKEW_SECS, 0));
    }

    #[test]
    fn test_missing_exp_never_expires() {
        let token = unsigned_token(&json!({ "user_id": 7 }));
        assert!(!is_expired_at(&token, DEFAULT_SKEW_SECS, i64::MAX - 1));
        assert!(!is_expired(&token, DEFAULT_SKEW_SECS));
    }

    #[test]
    fn test_skew_boundary() {
        let now = 1_000_000;
        let skew = 30;

        let at_edge = unsigned_token(&json!({ "exp": now + skew }));
        let inside = unsigned_token(&json!({ "exp": now + skew - 1 }));
        let outside = unsigned_token(&json!({ "exp": now + skew + 1 }));

        assert!(is_expired_at(&at_edge, skew, now));
        assert!(is_expired_at(&inside, skew, now));
        assert!(!is_expired_at(&outside, skew, now));
    }

    #[test]
    fn test_fractional_and_string_exp() {
        let fractional = unsigned_token(&json!({ "exp": 100.9 }));
        assert_eq!(decode_claims(&fractional).unwrap().exp(), Some(100));

        let text = unsigned_token(&json!({ "exp": "250" }));
        assert_eq!(decode_claims(&text).unwrap().exp(), Some(250));
    }

    #[test]
    fn test_real_clock() {
        let now = chrono::Utc::now().timestamp();
        let fresh = unsigned_token(&json!({ "exp": now + 3600 }));
        let stale = unsigned_token(&json!({ "exp": now - 1 }));

        assert!(!is_expired(&fresh, DEFAULT_SKEW_SECS));
        assert!(is_expired(&stale, DEFAULT_SKEW_SECS));
    }
}

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// HS256 secret shared by every token the fixture issues
const SIGNING_SECRET: &[u8] = b"noteshare-fixture-signing-secret";

/// Access token lifetime handed out by login and refresh
pub const ACCESS_TOKEN_TTL_SECS: i64 = 5 * 60;

/// Claims carried by fixture access tokens, shaped like a SimpleJWT access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub token_type: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub user_id: u64,
}

/// Mint a signed access token; a negative `ttl_secs` yields an already expired token
pub fn mint_access_token(user_id: u64, ttl_secs: i64, serial: u64) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = AccessClaims {
        token_type: "access".to_string(),
        exp: now + ttl_secs,
        iat: now,
        jti: format!("fixture-access-{serial}"),
        user_id,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SIGNING_SECRET),
    )
    .expect("HS256 encoding of fixture claims cannot fail")
}

/// Verify signature and expiry of an access token
pub fn verify_access_token(token: &str) -> Option<AccessClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    decode::<AccessClaims>(token, &DecodingKey::from_secret(SIGNING_SECRET), &validation)
        .ok()
        .map(|data| data.claims)
}

/// Opaque refresh tokens; the fixture tracks which ones are live
pub fn mint_refresh_token(user_id: u64, serial: u64) -> String {
    format!("fixture-refresh-{user_id}-{serial}")
}

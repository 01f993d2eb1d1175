//! Typed wrappers over the backend's `/api/user/` endpoints.
//!
//! Each function builds an [`ApiRequest`](crate::gateway::ApiRequest), sends it
//! through the gateway and decodes the JSON body. Non-2xx answers become
//! [`Error::Status`](crate::Error::Status).

use reqwest::Response;
use serde::de::DeserializeOwned;

use crate::errors::{ensure_success, Result};

pub mod auth;
pub mod notes;
pub mod users;

pub(crate) const USER_PREFIX: &str = "/api/user";

/// `/api/user/<path>`
pub(crate) fn user_path(path: &str) -> String {
    format!("{USER_PREFIX}/{}", path.trim_start_matches('/'))
}

/// Percent-encode a caller-supplied path segment
pub(crate) fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let response = ensure_success(response).await?;
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Success with no interesting body (204s and acknowledgements)
pub(crate) async fn read_empty(response: Response) -> Result<()> {
    ensure_success(response).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_path() {
        assert_eq!(user_path("notes/"), "/api/user/notes/");
        assert_eq!(user_path("/heartbeat/"), "/api/user/heartbeat/");
    }

    #[test]
    fn test_segment_is_encoded() {
        assert_eq!(segment("bob@example.com"), "bob%40example.com");
        assert_eq!(segment("a b/c"), "a%20b%2Fc");
    }
}

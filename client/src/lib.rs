//! Client for the noteshare notes-sharing backend.
//!
//! [`Gateway`] is the piece everything else goes through: it keeps the access
//! token fresh, shares one refresh between concurrent callers and replays a
//! rejected request once. The [`api`] modules wrap the backend endpoints on
//! top of it.

pub mod analytics;
pub mod api;
pub mod claims;
pub mod config;
pub mod credentials;
mod errors;
pub mod events;
pub mod gateway;
pub mod heartbeat;
pub mod models;
pub mod search;
pub mod storage;

pub use config::ClientConfig;
pub use credentials::{Credentials, SessionUser};
pub use errors::{Error, Result};
pub use events::{AuthEvent, AuthEvents};
pub use gateway::{ApiRequest, FormPart, Gateway, RequestBody};
pub use storage::{CredentialStore, FileStore, MemoryStore, Scope, StorageKey};

/// Gateway backed by the credential file under the configured state directory
pub fn open(config: ClientConfig) -> Result<Gateway> {
    let credentials = Credentials::file_backed(config.credentials_path());
    Gateway::new(config, credentials)
}

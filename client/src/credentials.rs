use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::{Error, Result};
use crate::events::{AuthEvent, AuthEvents};
use crate::models::TokenPair;
use crate::storage::{CredentialStore, FileStore, MemoryStore, Scope, StorageKey};

/// Who is signed in, as remembered alongside the tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub email: String,
    pub name: Option<String>,
    pub is_admin: bool,
}

/// Typed access to the credential store plus the auth event channel.
/// Every read goes back to the store; nothing is cached here.
#[derive(Clone)]
pub struct Credentials {
    store: Arc<dyn CredentialStore>,
    events: AuthEvents,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            events: AuthEvents::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn file_backed(path: impl Into<std::path::PathBuf>) -> Self {
        Self::new(Arc::new(FileStore::new(path)))
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn events(&self) -> &AuthEvents {
        &self.events
    }

    /// First non-empty value for `key`, persistent scope first
    fn lookup(&self, key: StorageKey) -> Option<(Scope, String)> {
        Scope::ALL.into_iter().find_map(|scope| {
            self.store
                .get(scope, key)
                .filter(|value| !value.is_empty())
                .map(|value| (scope, value))
        })
    }

    pub fn access_token(&self) -> Option<String> {
        self.lookup(StorageKey::AccessToken).map(|(_, token)| token)
    }

    /// The refresh token and the scope it was found in
    pub fn refresh_token(&self) -> Option<(Scope, String)> {
        self.lookup(StorageKey::RefreshToken)
    }

    pub fn current_user(&self) -> Option<SessionUser> {
        let email = self
            .lookup(StorageKey::CurrentUserEmail)
            .or_else(|| self.lookup(StorageKey::CurrentUser))
            .map(|(_, email)| email)?;

        Some(SessionUser {
            email,
            name: self.lookup(StorageKey::CurrentUserName).map(|(_, name)| name),
            is_admin: self
                .lookup(StorageKey::IsAdmin)
                .is_some_and(|(_, flag)| flag == "true"),
        })
    }

    /// Store a fresh login in `scope` and wipe the other scope
    pub fn save_login(&self, scope: Scope, tokens: &TokenPair, user: &SessionUser) -> Result<()> {
        for key in StorageKey::ALL {
            self.store.clear(scope.other(), key)?;
            self.store.clear(scope, key)?;
        }

        self.store.set(scope, StorageKey::AccessToken, &tokens.access)?;
        self.store.set(scope, StorageKey::RefreshToken, &tokens.refresh)?;
        self.store.set(scope, StorageKey::CurrentUser, &user.email)?;
        self.store.set(scope, StorageKey::CurrentUserEmail, &user.email)?;
        if let Some(name) = user.name.as_deref().filter(|name| !name.is_empty()) {
            self.store.set(scope, StorageKey::CurrentUserName, name)?;
        }
        self.store
            .set(scope, StorageKey::IsAdmin, if user.is_admin { "true" } else { "false" })?;

        info!(?scope, "Signed in as {}", user.email);
        self.events.publish(AuthEvent::SignedIn);
        Ok(())
    }

    /// Overwrite the access token in place, keeping its scope
    pub fn set_access_token(&self, scope: Scope, token: &str) -> Result<()> {
        self.store.set(scope, StorageKey::AccessToken, token)
    }

    fn clear_all(&self) -> Result<()> {
        for scope in Scope::ALL {
            for key in StorageKey::ALL {
                self.store.clear(scope, key)?;
            }
        }
        Ok(())
    }

    /// Drop every stored credential after the session became unusable. Safe to repeat.
    pub fn purge(&self) -> Result<()> {
        warn!("Clearing stored credentials");
        self.clear_all()?;
        self.events.publish(AuthEvent::CredentialsCleared);
        Ok(())
    }

    /// User-initiated sign out
    pub fn sign_out(&self) -> Result<()> {
        self.clear_all()?;
        info!("Signed out");
        self.events.publish(AuthEvent::SignedOut);
        Ok(())
    }

    /// Guard for operations that need a session: any access token (or legacy
    /// `token`) in either scope passes; otherwise leftovers are purged.
    pub fn require_session(&self) -> Result<String> {
        let token = self
            .lookup(StorageKey::AccessToken)
            .or_else(|| self.lookup(StorageKey::LegacyToken))
            .map(|(_, token)| token);

        match token {
            Some(token) => Ok(token),
            None => {
                self.purge()?;
                Err(Error::NotAuthenticated)
            }
        }
    }
}

use tokio::sync::broadcast;
use tracing::debug;

/// Changes to the signed-in state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    /// Credentials were dropped because the session could not be kept alive
    CredentialsCleared,
}

/// Broadcast channel for auth changes. Clones publish to the same subscribers.
#[derive(Debug, Clone)]
pub struct AuthEvents {
    sender: broadcast::Sender<AuthEvent>,
}

impl Default for AuthEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: AuthEvent) {
        // No subscribers is fine
        match self.sender.send(event) {
            Ok(receivers) => debug!(?event, receivers, "Published auth event"),
            Err(_) => debug!(?event, "Auth event had no subscribers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let events = AuthEvents::new();
        let mut rx = events.subscribe();

        events.publish(AuthEvent::SignedIn);
        events.clone().publish(AuthEvent::CredentialsCleared);

        assert_eq!(rx.recv().await.unwrap(), AuthEvent::SignedIn);
        assert_eq!(rx.recv().await.unwrap(), AuthEvent::CredentialsCleared);
    }

    #[test]
    fn test_publish_without_subscribers() {
        AuthEvents::new().publish(AuthEvent::SignedOut);
    }
}

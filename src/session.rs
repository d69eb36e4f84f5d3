use serde::{Deserialize, Serialize};
use tracing::info;

use crate::user::{User, UserId};

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: User,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignedIn(Session),
    SignedOut,
}

type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Shared view of the current session.
///
/// Components that care about the signed-in user hold a clone of the hub and
/// either read `current()` when they act or `subscribe` to transitions.
#[derive(Clone, Default)]
pub struct SessionHub {
    inner: Arc<Mutex<HubState>>,
}

#[derive(Default)]
struct HubState {
    current: Option<Session>,
    listeners: Vec<(u64, Listener)>,
    next_id: u64,
}

impl SessionHub {
    pub fn new() -> Self {
        SessionHub::default()
    }

    pub fn current(&self) -> Option<Session> {
        self.lock(|state| state.current.clone())
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.lock(|state| state.current.as_ref().map(|session| session.user.id.clone()))
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock(|state| state.current.as_ref().map(|session| session.access_token.clone()))
    }

    /// Registers `listener` for session transitions. It stays registered
    /// until the returned `Subscription` is dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = self.lock(|state| {
            let id = state.next_id;
            state.next_id += 1;
            state.listeners.push((id, Arc::new(listener)));
            id
        });
        Subscription {
            hub: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock(|state| state.listeners.len())
    }

    /// Records the transition and notifies listeners. Listeners run after the
    /// hub is unlocked, so they may read the hub themselves.
    pub fn publish(&self, event: SessionEvent) {
        let listeners: Vec<Listener> = self.lock(|state| {
            state.current = match &event {
                SessionEvent::SignedIn(session) => Some(session.clone()),
                SessionEvent::SignedOut => None,
            };
            state.listeners.iter().map(|(_, listener)| listener.clone()).collect()
        });

        match &event {
            SessionEvent::SignedIn(session) => info!(user = %session.user.id, "session started"),
            SessionEvent::SignedOut => info!("session ended"),
        }

        for listener in listeners {
            listener(&event);
        }
    }

    fn lock<T, F: FnOnce(&mut HubState) -> T>(&self, f: F) -> T {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

impl fmt::Debug for SessionHub {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionHub")
            .field("user", &self.user_id())
            .finish()
    }
}

/// Keeps a session listener registered.
#[must_use = "dropping a Subscription unregisters its listener"]
pub struct Subscription {
    hub: Weak<Mutex<HubState>>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            let mut state = hub.lock().unwrap_or_else(PoisonError::into_inner);
            state.listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn session_for(id: &str) -> Session {
        Session {
            access_token: format!("token-{}", id),
            token_type: Some("bearer".to_string()),
            expires_in: Some(3600),
            refresh_token: None,
            user: User {
                id: UserId::new(id),
                email: Some(format!("{}@example.com", id)),
            },
        }
    }

    #[test]
    fn publish_updates_current_session() {
        let hub = SessionHub::new();
        assert!(hub.user_id().is_none());

        hub.publish(SessionEvent::SignedIn(session_for("alice")));
        assert_eq!(hub.user_id(), Some(UserId::new("alice")));
        assert_eq!(hub.access_token().as_deref(), Some("token-alice"));

        hub.publish(SessionEvent::SignedOut);
        assert!(hub.current().is_none());
    }

    #[test]
    fn listeners_see_transitions_until_dropped() {
        let hub = SessionHub::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        let reader = hub.clone();
        let subscription = hub.subscribe(move |event| {
            // the hub is unlocked while listeners run
            let signed_in = reader.user_id().is_some();
            assert_eq!(signed_in, matches_signed_in(event));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hub.listener_count(), 1);

        hub.publish(SessionEvent::SignedIn(session_for("bob")));
        hub.publish(SessionEvent::SignedOut);
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        subscription.unsubscribe();
        assert_eq!(hub.listener_count(), 0);
        hub.publish(SessionEvent::SignedIn(session_for("bob")));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    fn matches_signed_in(event: &SessionEvent) -> bool {
        match event {
            SessionEvent::SignedIn(_) => true,
            SessionEvent::SignedOut => false,
        }
    }

    #[test]
    fn session_debug_hides_tokens() {
        let output = format!("{:?}", session_for("carol"));
        assert!(!output.contains("token-carol"));
    }
}

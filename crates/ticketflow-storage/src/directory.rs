//! Directory adapter contract (component C, spec.md 6.3): resolves an
//! email to a user snapshot and a user to their manager. May degrade to
//! an "unresolved" snapshot without failing the caller -- this crate's
//! implementations never return an error for a missing manager, only
//! `UserSnapshot::unresolved`.

use async_trait::async_trait;
use ticketflow_core::UserSnapshot;

#[async_trait]
pub trait DirectoryAdapter: Send + Sync + 'static {
    /// Resolve an email to a user snapshot. `None` when the identity
    /// provider genuinely has no such user (distinct from "lookup
    /// degraded", which this trait represents as `Some(unresolved)`).
    async fn get_user(&self, email: &str) -> Option<UserSnapshot>;

    /// Resolve a user's manager. Implementations fall back to
    /// `UserSnapshot::unresolved` on a directory outage rather than
    /// propagating an error, per spec.md 6.3.
    async fn get_manager(&self, user_email: &str) -> Option<UserSnapshot>;
}

/// An in-memory directory seeded with a fixed user/manager map, standing
/// in for the external identity provider the spec excludes as a
/// named-interface-only collaborator (spec.md 1).
#[derive(Debug, Default)]
pub struct InMemoryDirectoryAdapter {
    users: parking_lot::RwLock<std::collections::HashMap<String, UserSnapshot>>,
    managers: parking_lot::RwLock<std::collections::HashMap<String, String>>,
    /// When set, every lookup degrades to unresolved instead of
    /// consulting the seeded maps -- used by tests to exercise the
    /// ApproverResolutionError / unresolved-manager paths.
    degraded: std::sync::atomic::AtomicBool,
}

impl InMemoryDirectoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_user(&self, snapshot: UserSnapshot) {
        self.users.write().insert(snapshot.email.clone(), snapshot);
    }

    /// Record that `user_email`'s manager is `manager_email`. The manager
    /// must already (or later) be seeded via `seed_user` to resolve to a
    /// full snapshot; otherwise `get_manager` returns unresolved.
    pub fn seed_manager(&self, user_email: impl Into<String>, manager_email: impl Into<String>) {
        self.managers.write().insert(user_email.into(), manager_email.into());
    }

    /// Force every subsequent lookup to act as if the directory were
    /// unreachable.
    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, std::sync::atomic::Ordering::SeqCst);
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryAdapter for InMemoryDirectoryAdapter {
    async fn get_user(&self, email: &str) -> Option<UserSnapshot> {
        if self.is_degraded() {
            return None;
        }
        self.users.read().get(email).cloned()
    }

    async fn get_manager(&self, user_email: &str) -> Option<UserSnapshot> {
        if self.is_degraded() {
            return Some(UserSnapshot::unresolved(format!("manager-of-{user_email}")));
        }
        let managers = self.managers.read();
        let Some(manager_email) = managers.get(user_email) else {
            return Some(UserSnapshot::unresolved(format!("manager-of-{user_email}")));
        };
        let users = self.users.read();
        Some(
            users
                .get(manager_email)
                .cloned()
                .unwrap_or_else(|| UserSnapshot::unresolved(manager_email.clone())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_seeded_manager() {
        let dir = InMemoryDirectoryAdapter::new();
        dir.seed_user(UserSnapshot::resolved("u1", "alice@example.com", "Alice"));
        dir.seed_user(UserSnapshot::resolved("u2", "boss@example.com", "Bob"));
        dir.seed_manager("alice@example.com", "boss@example.com");

        let manager = dir.get_manager("alice@example.com").await.unwrap();
        assert_eq!(manager.email, "boss@example.com");
        assert!(manager.resolved);
    }

    #[tokio::test]
    async fn missing_manager_mapping_degrades_to_unresolved() {
        let dir = InMemoryDirectoryAdapter::new();
        let manager = dir.get_manager("nobody@example.com").await.unwrap();
        assert!(!manager.resolved);
    }

    #[tokio::test]
    async fn degraded_mode_fails_every_lookup_to_unresolved() {
        let dir = InMemoryDirectoryAdapter::new();
        dir.seed_user(UserSnapshot::resolved("u1", "alice@example.com", "Alice"));
        dir.set_degraded(true);
        assert!(dir.get_user("alice@example.com").await.is_none());
        let manager = dir.get_manager("alice@example.com").await.unwrap();
        assert!(!manager.resolved);
    }
}

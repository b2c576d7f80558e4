//! `UserSnapshot`: a structurally frozen copy of directory attributes
//! captured at a decision moment (GLOSSARY).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSnapshot {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    /// `true` when resolution fell back to the "unresolved" placeholder
    /// rather than a real directory lookup.
    pub resolved: bool,
}

impl UserSnapshot {
    pub fn resolved(user_id: impl Into<String>, email: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            display_name: display_name.into(),
            resolved: true,
        }
    }

    /// The directory adapter's fallback snapshot, used when a lookup fails
    /// and the caller should not be blocked on an external directory
    /// outage.
    pub fn unresolved(email: impl Into<String>) -> Self {
        let email = email.into();
        Self {
            user_id: String::new(),
            email,
            display_name: "Manager (directory unavailable)".to_string(),
            resolved: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_snapshot_carries_placeholder_display_name() {
        let snap = UserSnapshot::unresolved("boss@example.com");
        assert!(!snap.resolved);
        assert_eq!(snap.display_name, "Manager (directory unavailable)");
        assert_eq!(snap.email, "boss@example.com");
    }
}

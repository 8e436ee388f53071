//! Caller identity as handed to the core by the authentication layer.
//!
//! The core never inspects credentials itself; an [`IdentityProvider`]
//! turns an opaque bearer credential into a [`Caller`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::model::Reservation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// What a caller may do beyond touching their own reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Acts on reservations whose `user_id` matches the caller.
    Owner,
    /// Acts on every reservation and sees the full listing.
    Elevated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    elevated: bool,
}

impl Capabilities {
    pub fn for_role(role: Role) -> Self {
        Self { elevated: role == Role::Admin }
    }

    pub fn has(&self, cap: Capability) -> bool {
        match cap {
            Capability::Owner => true,
            Capability::Elevated => self.elevated,
        }
    }
}

/// Resolved identity of whoever issued the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Ulid,
    pub capabilities: Capabilities,
}

impl Caller {
    pub fn new(user_id: Ulid, role: Role) -> Self {
        Self {
            user_id,
            capabilities: Capabilities::for_role(role),
        }
    }

    pub fn is_elevated(&self) -> bool {
        self.capabilities.has(Capability::Elevated)
    }

    /// The single authorization check: owner of the reservation, or elevated.
    pub fn may_access(&self, reservation: &Reservation) -> bool {
        (self.capabilities.has(Capability::Owner) && reservation.user_id == self.user_id)
            || self.is_elevated()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("unauthenticated")]
    Unauthenticated,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, credential: &str) -> Result<Caller, AuthError>;
}

/// Seeded bearer-token table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityEntry {
    pub token: String,
    pub user_id: Ulid,
    pub role: Role,
}

#[derive(Debug, Default)]
pub struct StaticIdentities {
    by_token: HashMap<String, Caller>,
}

impl StaticIdentities {
    pub fn new(entries: impl IntoIterator<Item = IdentityEntry>) -> Self {
        let by_token = entries
            .into_iter()
            .map(|e| (e.token, Caller::new(e.user_id, e.role)))
            .collect();
        Self { by_token }
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentities {
    async fn authenticate(&self, credential: &str) -> Result<Caller, AuthError> {
        self.by_token
            .get(credential)
            .copied()
            .ok_or(AuthError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ReservationStatus, Span};

    fn owned_by(user_id: Ulid) -> Reservation {
        Reservation {
            id: Ulid::new(),
            room_id: Ulid::new(),
            user_id,
            span: Span::new(0, 1),
            purpose: None,
            status: ReservationStatus::Active,
            created_at: 0,
        }
    }

    #[test]
    fn owner_and_elevated_access() {
        let alice = Caller::new(Ulid::new(), Role::User);
        let admin = Caller::new(Ulid::new(), Role::Admin);
        let bob = Caller::new(Ulid::new(), Role::User);
        let r = owned_by(alice.user_id);

        assert!(alice.may_access(&r));
        assert!(admin.may_access(&r));
        assert!(!bob.may_access(&r));
        assert!(!alice.is_elevated());
        assert!(admin.is_elevated());
    }

    #[tokio::test]
    async fn static_identities_resolve_tokens() {
        let uid = Ulid::new();
        let ids = StaticIdentities::new([IdentityEntry {
            token: "t-admin".into(),
            user_id: uid,
            role: Role::Admin,
        }]);

        let caller = ids.authenticate("t-admin").await.unwrap();
        assert_eq!(caller.user_id, uid);
        assert!(caller.is_elevated());
        assert_eq!(ids.authenticate("nope").await, Err(AuthError::Unauthenticated));
    }
}

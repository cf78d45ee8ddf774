//! Identifiers and actor identity.
//!
//! Every lifecycle operation receives the calling [`Actor`] explicitly; nothing
//! in the engine reads a "current user" from shared state.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

entity_id!(
    /// A student, tutor or admin as known to the identity provider.
    UserId
);
entity_id!(RequestId);
entity_id!(CommitmentId);
entity_id!(SessionId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Tutor,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Student => f.write_str("student"),
            Role::Tutor => f.write_str("tutor"),
            Role::Admin => f.write_str("admin"),
        }
    }
}

/// The authenticated caller of an operation, as supplied by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn student(id: UserId) -> Self {
        Self {
            id,
            role: Role::Student,
        }
    }

    pub fn tutor(id: UserId) -> Self {
        Self {
            id,
            role: Role::Tutor,
        }
    }

    pub fn admin(id: UserId) -> Self {
        Self {
            id,
            role: Role::Admin,
        }
    }

    /// Fails with `Unauthorized` unless the actor holds the admin role.
    pub fn require_admin(&self, action: &'static str) -> Result<UserId> {
        if self.role == Role::Admin {
            Ok(self.id)
        } else {
            Err(EngineError::Unauthorized {
                actor: self.id,
                action,
            })
        }
    }
}

/// One of the two sides of a teaching relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Student,
    Tutor,
}

impl Party {
    pub const BOTH: [Party; 2] = [Party::Tutor, Party::Student];

    pub fn other(self) -> Self {
        match self {
            Party::Student => Party::Tutor,
            Party::Tutor => Party::Student,
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::Student => f.write_str("student"),
            Party::Tutor => f.write_str("tutor"),
        }
    }
}

/// Resolves which side of a student/tutor pair `actor` is, or `Unauthorized`.
pub fn party_of(
    actor: &Actor,
    student_id: UserId,
    tutor_id: UserId,
    action: &'static str,
) -> Result<Party> {
    match actor.role {
        Role::Student if actor.id == student_id => Ok(Party::Student),
        Role::Tutor if actor.id == tutor_id => Ok(Party::Tutor),
        _ => Err(EngineError::Unauthorized {
            actor: actor.id,
            action,
        }),
    }
}

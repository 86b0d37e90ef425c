pub mod audit;
pub mod courier;
pub mod order;
pub mod settlement;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    System,
    Admin,
    Courier,
    Customer,
}

/// Who performed an action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub kind: ActorKind,
    pub id: Option<Uuid>,
}

impl Actor {
    pub const SYSTEM: Actor = Actor {
        kind: ActorKind::System,
        id: None,
    };

    pub fn courier(id: Uuid) -> Self {
        Self {
            kind: ActorKind::Courier,
            id: Some(id),
        }
    }

    pub fn customer(id: Uuid) -> Self {
        Self {
            kind: ActorKind::Customer,
            id: Some(id),
        }
    }

    pub fn admin(id: Uuid) -> Self {
        Self {
            kind: ActorKind::Admin,
            id: Some(id),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ActorKind::System => "system",
            ActorKind::Admin => "admin",
            ActorKind::Courier => "courier",
            ActorKind::Customer => "customer",
        };
        match self.id {
            Some(id) => write!(f, "{kind} {id}"),
            None => f.write_str(kind),
        }
    }
}

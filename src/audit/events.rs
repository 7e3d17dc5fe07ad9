use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActorRole {
    System,
    Member,
}

#[derive(Debug, Clone, Serialize)]
pub struct Actor {
    #[serde(rename = "type")]
    pub actor_type: String,
    pub id: String,
    pub role: ActorRole,
}

impl Actor {
    /// Unauthenticated or system-initiated writes never get `MEMBER` —
    /// mislabeling an unauthenticated caller as a member would look like
    /// a privilege escalation in the audit trail.
    pub fn system() -> Self {
        Self {
            actor_type: "SYSTEM".into(),
            id: "unauthenticated-request".into(),
            role: ActorRole::System,
        }
    }

    pub fn user(email: &str) -> Self {
        Self {
            actor_type: "USER".into(),
            id: email.to_string(),
            role: ActorRole::Member,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Target {
    pub resource: String,
    pub resource_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagementEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub action: EventAction,
    pub status: EventStatus,
    pub actor: Actor,
    pub target: Target,
}

impl ManagementEvent {
    pub fn new(action: EventAction, status: EventStatus, actor: Actor, consent_id: Uuid) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            action,
            status,
            actor,
            target: Target {
                resource: "consent".into(),
                resource_id: consent_id,
            },
        }
    }
}

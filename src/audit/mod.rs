pub mod emitter;
pub mod events;

pub use emitter::AuditEmitter;
pub use events::{Actor, ActorRole, EventAction, EventStatus, ManagementEvent};

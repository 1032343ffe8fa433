pub mod config;
pub mod models;
pub mod traits;

pub use config::*;
pub use models::{
    CustomKind, Envelope, EventClass, EventId, EventKind, EventPriority, GameEvent, InboundMessage, Task,
    TaskIdGenerator, TaskOptions, TaskPriority, WorkerNotification,
};
pub use traits::{Worker, WorkerOutbox, WorkerSpec};
pub use tabletop_errors::{RuntimeError, RuntimeResult};

mod adapter;
mod outbox;
mod parts;
mod record;
mod retry;
mod rpc;
mod tractor;
mod var;

pub use adapter::{
    AdapterFlags, PLAYER_IDENTITY, PendingIntent, Phase, Role, SpawnSpec, SyncAdapter,
    SyncContext,
};
pub use outbox::{Outbox, Route};
pub use parts::{PartFrame, PartStatus, PartTable};
pub use record::{
    HEALTH_TOLERANCE, ROTATION_TOLERANCE_SQ_DEG, RecordFrame, SEED_HEALTH, StateRecord,
    TIMER_TOLERANCE, TRANSFORM_TOLERANCE_SQ,
};
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use tractor::{Resolution, TractorLink};
pub use var::{Change, ReplicatedVar, Tolerant};

pub mod config;
pub mod entity;
pub mod net;
pub mod replicator;
pub mod session;
pub mod sync;
pub mod world;

pub use config::{ConfigError, SyncConfig};
pub use entity::{Blueprint, BlueprintKind, BlueprintRegistry, Entity, EntityKind};
pub use net::{LoopbackHub, Packet, PacketError, PacketType, SyncMessage, UdpEndpoint};
pub use replicator::{Replicator, SyncError};
pub use session::{NetId, NetworkMode, SERVER_SESSION, Session, SessionDirectory, SessionId};
pub use sync::{
    AdapterFlags, Phase, RetryPolicy, Role, SpawnSpec, StateRecord, SyncAdapter, SyncContext,
};
pub use world::{EntityHandle, World};

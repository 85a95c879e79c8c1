use std::collections::HashMap;

use crate::world::EntityHandle;

pub type SessionId = u64;
pub type NetId = u64;

/// Session id the authority process runs under.
pub const SERVER_SESSION: SessionId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkMode {
    Server,
    Host,
    Client,
}

impl NetworkMode {
    pub fn is_authority(self) -> bool {
        matches!(self, Self::Server | Self::Host)
    }

    /// Whether this process renders a local view (and so owns a local player).
    pub fn is_client(self) -> bool {
        matches!(self, Self::Host | Self::Client)
    }
}

/// A live entry in the spawn registry. `husk` is `None` until the entity
/// has been materialized locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnedRef {
    pub net_id: NetId,
    pub husk: Option<EntityHandle>,
}

/// Everything the sync layer needs to know about sessions. The adapter never
/// owns session lifecycle; it only reads roles and reports player presence.
pub trait SessionDirectory {
    fn mode(&self) -> NetworkMode;

    fn is_authority(&self) -> bool {
        self.mode().is_authority()
    }

    fn local_session_id(&self) -> SessionId;

    fn faction_count(&self) -> i32;

    fn lookup_spawned(&self, net_id: NetId) -> Option<SpawnedRef>;

    fn mark_player_spawned(&mut self, session: SessionId, spawned: bool);

    fn player_count(&self) -> usize;

    /// Returns the population after the increment.
    fn add_player(&mut self) -> usize;

    fn remove_player(&mut self);
}

#[derive(Debug)]
pub struct Session {
    mode: NetworkMode,
    local_session: SessionId,
    faction_count: i32,
    player_spawned: HashMap<SessionId, bool>,
    players: usize,
    spawned: HashMap<NetId, Option<EntityHandle>>,
}

impl Session {
    pub fn new(mode: NetworkMode, local_session: SessionId, faction_count: i32) -> Self {
        Self {
            mode,
            local_session,
            faction_count: faction_count.max(1),
            player_spawned: HashMap::new(),
            players: 0,
            spawned: HashMap::new(),
        }
    }

    pub fn register(&mut self, net_id: NetId) {
        self.spawned.entry(net_id).or_insert(None);
    }

    pub fn update_husk(&mut self, net_id: NetId, husk: Option<EntityHandle>) {
        if let Some(slot) = self.spawned.get_mut(&net_id) {
            *slot = husk;
        }
    }

    pub fn unregister(&mut self, net_id: NetId) {
        self.spawned.remove(&net_id);
    }

    pub fn is_player_spawned(&self, session: SessionId) -> bool {
        self.player_spawned.get(&session).copied().unwrap_or(false)
    }
}

impl SessionDirectory for Session {
    fn mode(&self) -> NetworkMode {
        self.mode
    }

    fn local_session_id(&self) -> SessionId {
        self.local_session
    }

    fn faction_count(&self) -> i32 {
        self.faction_count
    }

    fn lookup_spawned(&self, net_id: NetId) -> Option<SpawnedRef> {
        self.spawned
            .get(&net_id)
            .map(|&husk| SpawnedRef { net_id, husk })
    }

    fn mark_player_spawned(&mut self, session: SessionId, spawned: bool) {
        self.player_spawned.insert(session, spawned);
    }

    fn player_count(&self) -> usize {
        self.players
    }

    fn add_player(&mut self) -> usize {
        self.players += 1;
        self.players
    }

    fn remove_player(&mut self) {
        self.players = self.players.saturating_sub(1);
    }
}

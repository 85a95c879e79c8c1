use std::collections::BTreeMap;

use glam::{Vec2, Vec3};
use log::{debug, info};

use crate::config::SyncConfig;
use crate::entity::BlueprintRegistry;
use crate::net::SyncMessage;
use crate::session::{NetId, Session, SessionDirectory, SessionId};
use crate::sync::{Outbox, RecordFrame, Route, SpawnSpec, SyncAdapter, SyncContext};
use crate::world::World;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("no adapter with net id {0}")]
    UnknownEntity(NetId),
    #[error("operation requires the authority role")]
    NotAuthority,
    #[error("unknown blueprint `{0}`")]
    UnknownBlueprint(String),
}

/// Owns every adapter of one process and drives them at a fixed tick.
#[derive(Debug)]
pub struct Replicator {
    world: World,
    session: Session,
    blueprints: BlueprintRegistry,
    config: SyncConfig,
    adapters: BTreeMap<NetId, SyncAdapter>,
    outbox: Outbox,
    next_net_id: NetId,
    tick: u64,
}

impl Replicator {
    pub fn new(session: Session, blueprints: BlueprintRegistry, config: SyncConfig) -> Self {
        Self {
            world: World::new(),
            session,
            blueprints,
            config,
            adapters: BTreeMap::new(),
            outbox: Outbox::new(),
            next_net_id: 1,
            tick: 0,
        }
    }

    fn split(&mut self) -> (&mut BTreeMap<NetId, SyncAdapter>, SyncContext<'_>) {
        (
            &mut self.adapters,
            SyncContext {
                world: &mut self.world,
                session: &mut self.session,
                blueprints: &self.blueprints,
                outbox: &mut self.outbox,
                config: &self.config,
            },
        )
    }

    fn require_authority(&self) -> Result<(), SyncError> {
        if self.session.is_authority() {
            Ok(())
        } else {
            Err(SyncError::NotAuthority)
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn blueprints(&self) -> &BlueprintRegistry {
        &self.blueprints
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn local_session_id(&self) -> SessionId {
        self.session.local_session_id()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn adapter(&self, net_id: NetId) -> Option<&SyncAdapter> {
        self.adapters.get(&net_id)
    }

    pub fn adapters(&self) -> impl Iterator<Item = &SyncAdapter> {
        self.adapters.values()
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    pub fn player_of(&self, owner: SessionId) -> Option<NetId> {
        self.adapters
            .values()
            .find(|a| a.is_player() && a.owner() == owner)
            .map(SyncAdapter::net_id)
    }

    pub fn find_by_entity_id(&self, id: &str) -> Option<NetId> {
        let handle = self.world.find_by_id(id)?;
        self.adapters
            .values()
            .find(|a| a.husk() == Some(handle))
            .map(SyncAdapter::net_id)
    }

    pub fn spawn(&mut self, owner: SessionId, spec: SpawnSpec) -> Result<NetId, SyncError> {
        self.require_authority()?;
        if !self.blueprints.contains(&spec.blueprint) {
            return Err(SyncError::UnknownBlueprint(spec.blueprint));
        }

        let net_id = self.next_net_id;
        self.next_net_id += 1;
        let is_player = spec.is_player;
        let position = spec.position;

        let mut adapter = SyncAdapter::authority(net_id, owner, spec);
        {
            let (_, mut ctx) = self.split();
            adapter.start(&mut ctx);
        }
        self.adapters.insert(net_id, adapter);
        self.session.register(net_id);
        self.outbox.broadcast(SyncMessage::Spawn {
            net_id,
            owner,
            is_player,
            position: position.into(),
        });
        info!("spawned net id {net_id} for session {owner}");
        Ok(net_id)
    }

    pub fn despawn(&mut self, net_id: NetId) -> Result<(), SyncError> {
        self.require_authority()?;
        let mut adapter = self
            .adapters
            .remove(&net_id)
            .ok_or(SyncError::UnknownEntity(net_id))?;
        {
            let (_, mut ctx) = self.split();
            adapter.despawn(&mut ctx);
        }
        self.session.unregister(net_id);
        self.outbox.broadcast(SyncMessage::Despawn { net_id });
        Ok(())
    }

    /// Brings a newly connected session up to date with every live adapter,
    /// then spawns its player if one is given.
    pub fn session_joined(
        &mut self,
        session: SessionId,
        player: Option<SpawnSpec>,
    ) -> Result<Option<NetId>, SyncError> {
        self.require_authority()?;
        for adapter in self.adapters.values() {
            let net_id = adapter.net_id();
            self.outbox.to_session(
                session,
                SyncMessage::Spawn {
                    net_id,
                    owner: adapter.owner(),
                    is_player: adapter.is_player(),
                    position: adapter.intent().position.into(),
                },
            );
            if adapter.has_record() {
                self.outbox.to_session(
                    session,
                    SyncMessage::State {
                        net_id,
                        version: adapter.record_version(),
                        record: RecordFrame::from(adapter.record()),
                        forced: true,
                    },
                );
            }
            if !adapter.parts().is_empty() {
                self.outbox.to_session(
                    session,
                    SyncMessage::Parts {
                        net_id,
                        version: adapter.parts().version(),
                        entries: adapter.parts().frames(),
                    },
                );
            }
            if let Some(target) = adapter.tractor().target() {
                self.outbox.to_session(
                    session,
                    SyncMessage::Tractor {
                        net_id,
                        target: Some(target),
                    },
                );
            }
        }
        info!(
            "session {session} joined; sent catch-up for {} entities",
            self.adapters.len()
        );
        player.map(|spec| self.spawn(session, spec)).transpose()
    }

    /// Despawns everything the departed session owned. Returns how many
    /// adapters went away.
    pub fn session_left(&mut self, session: SessionId) -> Result<usize, SyncError> {
        self.require_authority()?;
        let owned: Vec<NetId> = self
            .adapters
            .values()
            .filter(|a| a.owner() == session)
            .map(SyncAdapter::net_id)
            .collect();
        for net_id in &owned {
            self.despawn(*net_id)?;
        }
        info!("session {session} left; released {} entities", owned.len());
        Ok(owned.len())
    }

    pub fn detach_part(&mut self, net_id: NetId, location: Vec2) -> Result<bool, SyncError> {
        self.require_authority()?;
        let (adapters, mut ctx) = self.split();
        let adapter = adapters
            .get_mut(&net_id)
            .ok_or(SyncError::UnknownEntity(net_id))?;
        Ok(adapter.detach_part(location, &mut ctx))
    }

    pub fn reset_parts(&mut self, net_id: NetId) -> Result<(), SyncError> {
        self.require_authority()?;
        let (adapters, mut ctx) = self.split();
        let adapter = adapters
            .get_mut(&net_id)
            .ok_or(SyncError::UnknownEntity(net_id))?;
        adapter.reset_parts(&mut ctx);
        Ok(())
    }

    /// Restores every part of the entity after a reset. Returns `false`
    /// while the adapter has no bound entity to rebuild.
    pub fn rebuild_parts(&mut self, net_id: NetId) -> Result<bool, SyncError> {
        self.require_authority()?;
        let (adapters, mut ctx) = self.split();
        let adapter = adapters
            .get_mut(&net_id)
            .ok_or(SyncError::UnknownEntity(net_id))?;
        Ok(adapter.rebuild_parts(&mut ctx))
    }

    /// Applies one message from `from`. Unknown targets and messages the
    /// sender may not originate are dropped.
    pub fn receive(&mut self, from: SessionId, message: SyncMessage) {
        let authority = self.session.is_authority();
        if authority && message.is_authoritative() {
            debug!("dropped authoritative message from session {from}");
            return;
        }
        match message {
            SyncMessage::Spawn {
                net_id,
                owner,
                is_player,
                position,
            } => {
                if self.adapters.contains_key(&net_id) {
                    return;
                }
                let adapter = SyncAdapter::observer(net_id, owner, is_player, Vec3::from(position));
                self.adapters.insert(net_id, adapter);
                self.session.register(net_id);
                debug!("observing net id {net_id} owned by session {owner}");
            }
            SyncMessage::Despawn { net_id } => {
                let Some(mut adapter) = self.adapters.remove(&net_id) else {
                    return;
                };
                let (_, mut ctx) = self.split();
                adapter.despawn(&mut ctx);
                self.session.unregister(net_id);
            }
            message => {
                let net_id = message.net_id();
                let (adapters, mut ctx) = self.split();
                match adapters.get_mut(&net_id) {
                    Some(adapter) => adapter.handle(from, message, &mut ctx),
                    None => debug!("dropped message for unknown net id {net_id}"),
                }
            }
        }
    }

    pub fn tick(&mut self) {
        self.deliver_local();
        let (adapters, mut ctx) = self.split();
        for adapter in adapters.values_mut() {
            adapter.tick(&mut ctx);
        }
        for adapter in self.adapters.values() {
            self.session.update_husk(adapter.net_id(), adapter.husk());
        }
        let dt = self.config.dt();
        self.world.advance(dt);
        self.tick += 1;
    }

    fn deliver_local(&mut self) {
        if !self.session.is_authority() {
            return;
        }
        let local = self.session.local_session_id();
        for message in self.outbox.take_authority_bound() {
            self.receive(local, message);
        }
    }

    pub fn drain_outbox(&mut self) -> Vec<(Route, SyncMessage)> {
        self.deliver_local();
        self.outbox.drain()
    }

    fn with_adapter<F>(&mut self, net_id: NetId, f: F) -> Result<(), SyncError>
    where
        F: FnOnce(&mut SyncAdapter, &mut SyncContext),
    {
        let (adapters, mut ctx) = self.split();
        let adapter = adapters
            .get_mut(&net_id)
            .ok_or(SyncError::UnknownEntity(net_id))?;
        f(adapter, &mut ctx);
        self.deliver_local();
        Ok(())
    }

    pub fn request_ability_activation(
        &mut self,
        net_id: NetId,
        location: Vec2,
        target: Vec3,
    ) -> Result<(), SyncError> {
        self.with_adapter(net_id, |a, ctx| {
            a.request_ability_activation(location, target, ctx)
        })
    }

    pub fn request_vendor_purchase(
        &mut self,
        net_id: NetId,
        index: usize,
        vendor: NetId,
    ) -> Result<(), SyncError> {
        self.with_adapter(net_id, |a, ctx| a.request_vendor_purchase(index, vendor, ctx))
    }

    pub fn request_tractor_target(
        &mut self,
        net_id: NetId,
        target: Option<NetId>,
    ) -> Result<(), SyncError> {
        self.with_adapter(net_id, |a, ctx| a.request_tractor_target(target, ctx))
    }

    pub fn request_blueprint_and_identity(&mut self, net_id: NetId) -> Result<(), SyncError> {
        self.with_adapter(net_id, |a, ctx| a.request_blueprint_and_identity(ctx))
    }

    pub fn request_direction(&mut self, net_id: NetId, direction: Vec3) -> Result<(), SyncError> {
        self.with_adapter(net_id, |a, ctx| a.request_direction(direction, ctx))
    }

    pub fn force_update(&mut self, net_id: NetId) -> Result<(), SyncError> {
        self.with_adapter(net_id, |a, ctx| a.force_update(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Blueprint, BlueprintKind};
    use crate::session::{NetworkMode, SERVER_SESSION};

    fn registry() -> BlueprintRegistry {
        let mut registry = BlueprintRegistry::new();
        registry.insert(Blueprint::new("Scout", BlueprintKind::Craft));
        registry
    }

    #[test]
    fn observers_cannot_spawn() {
        let mut client = Replicator::new(
            Session::new(NetworkMode::Client, 2, 2),
            registry(),
            SyncConfig::default(),
        );
        assert_eq!(
            client.spawn(2, SpawnSpec::npc("Scout", "s", 0, Vec3::ZERO)),
            Err(SyncError::NotAuthority)
        );
    }

    #[test]
    fn unknown_blueprint_is_refused() {
        let mut server = Replicator::new(
            Session::new(NetworkMode::Server, SERVER_SESSION, 2),
            registry(),
            SyncConfig::default(),
        );
        assert_eq!(
            server.spawn(SERVER_SESSION, SpawnSpec::npc("Dreadnought", "d", 0, Vec3::ZERO)),
            Err(SyncError::UnknownBlueprint("Dreadnought".into()))
        );
        assert_eq!(server.despawn(4), Err(SyncError::UnknownEntity(4)));
    }

    #[test]
    fn spawn_registers_and_announces() {
        let mut server = Replicator::new(
            Session::new(NetworkMode::Server, SERVER_SESSION, 2),
            registry(),
            SyncConfig::default(),
        );
        let net_id = server
            .spawn(SERVER_SESSION, SpawnSpec::npc("Scout", "s", 0, Vec3::ZERO))
            .unwrap();
        assert!(server.session().lookup_spawned(net_id).is_some());

        server.tick();
        assert!(server.session().lookup_spawned(net_id).unwrap().husk.is_some());
        assert_eq!(server.find_by_entity_id("s"), Some(net_id));

        let routes: Vec<Route> = server.drain_outbox().into_iter().map(|(r, _)| r).collect();
        assert!(routes.iter().all(|r| *r == Route::Broadcast));
        assert!(routes.len() >= 2);
    }

    #[test]
    fn authority_drops_forged_state() {
        let mut server = Replicator::new(
            Session::new(NetworkMode::Server, SERVER_SESSION, 2),
            registry(),
            SyncConfig::default(),
        );
        let net_id = server
            .spawn(SERVER_SESSION, SpawnSpec::npc("Scout", "s", 0, Vec3::ZERO))
            .unwrap();
        server.tick();
        let version = server.adapter(net_id).unwrap().record_version();

        let mut forged = *server.adapter(net_id).unwrap().record();
        forged.position = Vec3::splat(900.0);
        server.receive(
            5,
            SyncMessage::State {
                net_id,
                version: version.wrapping_add(1),
                record: RecordFrame::from(&forged),
                forced: true,
            },
        );
        assert_eq!(server.adapter(net_id).unwrap().record_version(), version);
    }
}

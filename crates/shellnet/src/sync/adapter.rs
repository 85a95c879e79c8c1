use bitflags::bitflags;
use glam::{Vec2, Vec3};
use log::{debug, info, warn};

use super::outbox::Outbox;
use super::parts::{PartFrame, PartStatus, PartTable};
use super::record::{RecordFrame, StateRecord};
use super::retry::{RetryDecision, RetryState};
use super::tractor::{Resolution, TractorLink};
use super::var::ReplicatedVar;
use crate::config::SyncConfig;
use crate::entity::{Blueprint, BlueprintRegistry, Entity};
use crate::net::{SyncMessage, sequence_greater_than};
use crate::session::{NetId, NetworkMode, SessionDirectory, SessionId};
use crate::world::{EntityHandle, World};

pub const PLAYER_IDENTITY: &str = "player";

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct AdapterFlags: u8 {
        const PLAYER = 0b0000_0001;
        const SERVER_READY = 0b0000_0010;
        const CLIENT_READY = 0b0000_0100;
        /// Forces the next authority tick to publish.
        const DIRTY = 0b0000_1000;
        const NAME_ANNOUNCED = 0b0001_0000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Authority,
    Observer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unbound,
    AwaitingBlueprint,
    Materializing,
    Bound(Role),
    Despawned,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PendingIntent {
    pub position: Vec3,
    pub direction: Vec3,
}

/// What the authority knows about an entity when it starts replicating it.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnSpec {
    pub blueprint: String,
    pub entity_id: String,
    pub player_name: String,
    /// Zero lets the authority pick a faction for players.
    pub faction: i32,
    pub position: Vec3,
    pub is_player: bool,
}

impl SpawnSpec {
    pub fn npc(
        blueprint: impl Into<String>,
        entity_id: impl Into<String>,
        faction: i32,
        position: Vec3,
    ) -> Self {
        Self {
            blueprint: blueprint.into(),
            entity_id: entity_id.into(),
            player_name: String::new(),
            faction,
            position,
            is_player: false,
        }
    }

    pub fn player(
        blueprint: impl Into<String>,
        player_name: impl Into<String>,
        position: Vec3,
    ) -> Self {
        Self {
            blueprint: blueprint.into(),
            entity_id: PLAYER_IDENTITY.to_string(),
            player_name: player_name.into(),
            faction: 0,
            position,
            is_player: true,
        }
    }
}

pub struct SyncContext<'a> {
    pub world: &'a mut World,
    pub session: &'a mut dyn SessionDirectory,
    pub blueprints: &'a BlueprintRegistry,
    pub outbox: &'a mut Outbox,
    pub config: &'a SyncConfig,
}

/// Per-entity replication state. The authority samples its entity into a
/// [`StateRecord`]; observers apply received records to a local husk.
#[derive(Debug)]
pub struct SyncAdapter {
    pub(super) net_id: NetId,
    pub(super) owner: SessionId,
    pub(super) phase: Phase,
    pub(super) flags: AdapterFlags,
    pub(super) state: ReplicatedVar<StateRecord>,
    pub(super) parts: PartTable,
    pub(super) husk: Option<EntityHandle>,
    pub(super) blueprint_name: Option<String>,
    pub(super) blueprint: Option<Blueprint>,
    pub(super) entity_id: Option<String>,
    pub(super) player_name: String,
    pub(super) faction: i32,
    pub(super) intent: PendingIntent,
    pub(super) tractor: TractorLink,
    pub(super) retry: RetryState,
    /// Authority versions of the last applied record and part table.
    pub(super) seen_state: Option<u32>,
    pub(super) seen_parts: Option<u32>,
}

impl SyncAdapter {
    fn blank(net_id: NetId, owner: SessionId, is_player: bool, position: Vec3) -> Self {
        let mut flags = AdapterFlags::empty();
        flags.set(AdapterFlags::PLAYER, is_player);
        Self {
            net_id,
            owner,
            phase: Phase::Unbound,
            flags,
            state: ReplicatedVar::default(),
            parts: PartTable::new(),
            husk: None,
            blueprint_name: None,
            blueprint: None,
            entity_id: None,
            player_name: String::new(),
            faction: 0,
            intent: PendingIntent {
                position,
                direction: Vec3::ZERO,
            },
            tractor: TractorLink::default(),
            retry: RetryState::default(),
            seen_state: None,
            seen_parts: None,
        }
    }

    pub fn authority(net_id: NetId, owner: SessionId, spec: SpawnSpec) -> Self {
        let mut adapter = Self::blank(net_id, owner, spec.is_player, spec.position);
        adapter.blueprint_name = Some(spec.blueprint);
        adapter.entity_id = Some(spec.entity_id);
        adapter.player_name = spec.player_name;
        adapter.faction = spec.faction;
        adapter
    }

    pub fn observer(net_id: NetId, owner: SessionId, is_player: bool, position: Vec3) -> Self {
        Self::blank(net_id, owner, is_player, position)
    }

    pub fn net_id(&self) -> NetId {
        self.net_id
    }

    pub fn owner(&self) -> SessionId {
        self.owner
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn flags(&self) -> AdapterFlags {
        self.flags
    }

    pub fn is_player(&self) -> bool {
        self.flags.contains(AdapterFlags::PLAYER)
    }

    pub fn husk(&self) -> Option<EntityHandle> {
        self.husk
    }

    pub fn record(&self) -> &StateRecord {
        self.state.get()
    }

    pub fn record_version(&self) -> u32 {
        self.state.version()
    }

    pub fn has_record(&self) -> bool {
        self.state.is_initialized()
    }

    pub fn parts(&self) -> &PartTable {
        &self.parts
    }

    pub fn blueprint_name(&self) -> Option<&str> {
        self.blueprint_name.as_deref()
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    pub fn faction(&self) -> i32 {
        self.faction
    }

    pub fn intent(&self) -> PendingIntent {
        self.intent
    }

    pub fn tractor(&self) -> &TractorLink {
        &self.tractor
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry.attempts()
    }

    /// Authority-side registration: population and faction bookkeeping for
    /// players, then the seed record.
    pub fn start(&mut self, ctx: &mut SyncContext) {
        if !ctx.session.is_authority() {
            return;
        }
        if self.is_player() {
            let players = ctx.session.add_player();
            if self.faction == 0 {
                self.faction = (players as i32) % ctx.session.faction_count();
            }
            if self.owner == ctx.session.local_session_id() {
                self.faction = 0;
            }
            ctx.session.mark_player_spawned(self.owner, true);
        }
        self.state.reset(StateRecord::seed(self.owner, self.faction));
        self.phase = Phase::AwaitingBlueprint;
    }

    pub fn tick(&mut self, ctx: &mut SyncContext) {
        if self.phase == Phase::Despawned {
            return;
        }
        if !self.preliminary_check(ctx) {
            return;
        }
        let mode = ctx.session.mode();
        if mode == NetworkMode::Client {
            self.resolve_queued_tractor(ctx);
        }
        self.prune_tractor(ctx);
        self.set_up_husk(ctx);
        if mode.is_authority() {
            self.attempt_publish(ctx);
        }
        self.announce_player_name(ctx);
        if mode.is_authority() {
            self.integrate_intent(ctx);
        }
        if mode == NetworkMode::Client {
            self.sync_parts(ctx);
        }
    }

    /// Blueprint and identity must both be known before anything else runs.
    /// Observers ask the authority for them under the retry policy.
    fn preliminary_check(&mut self, ctx: &mut SyncContext) -> bool {
        if self.blueprint.is_none() {
            self.blueprint = self
                .blueprint_name
                .as_deref()
                .and_then(|name| ctx.blueprints.get(name))
                .cloned();
        }
        if self.blueprint.is_some() && self.entity_id.is_some() {
            if matches!(self.phase, Phase::Unbound | Phase::AwaitingBlueprint) {
                self.phase = Phase::Materializing;
            }
            return true;
        }
        if ctx.session.is_authority() {
            return false;
        }

        self.phase = Phase::AwaitingBlueprint;
        match self.retry.poll(&ctx.config.retry) {
            RetryDecision::Attempt(attempt) => {
                debug!(
                    "adapter {} requesting blueprint and identity (attempt {attempt})",
                    self.net_id
                );
                if self.blueprint_name.is_none() {
                    ctx.outbox.to_authority(SyncMessage::RequestDataStrings {
                        net_id: self.net_id,
                    });
                }
                if self.entity_id.is_none() {
                    ctx.outbox.to_authority(SyncMessage::RequestIdentity {
                        net_id: self.net_id,
                    });
                }
            }
            RetryDecision::GiveUp => warn!(
                "adapter {} gave up resolving its blueprint after {} attempts",
                self.net_id,
                self.retry.attempts()
            ),
            RetryDecision::Wait | RetryDecision::Idle => {}
        }
        false
    }

    fn resolve_queued_tractor(&mut self, ctx: &mut SyncContext) {
        // No husk yet: leave the request queued.
        let Some(handle) = self.husk else { return };
        match self.tractor.resolve(&*ctx.session) {
            Resolution::Idle | Resolution::Pending => {}
            Resolution::Dropped(target) => {
                debug!("adapter {} dropped tractor target {target}", self.net_id);
            }
            Resolution::Apply(target) => {
                if let Some(entity) = ctx.world.get_mut(handle) {
                    entity.set_tractor_target(target);
                }
            }
        }
    }

    /// A tractor target that left the spawn registry is cleared, not followed.
    fn prune_tractor(&mut self, ctx: &mut SyncContext) {
        let Some(entity) = self.husk.and_then(|h| ctx.world.get_mut(h)) else {
            return;
        };
        let Some(target) = entity.tractor_target() else {
            return;
        };
        if ctx.session.lookup_spawned(target).is_none() {
            entity.set_tractor_target(None);
            if self.tractor.target() == Some(target) && !self.tractor.is_queued() {
                self.tractor.set(None);
            }
            debug!("adapter {} cleared dangling tractor target {target}", self.net_id);
        }
    }

    fn set_up_husk(&mut self, ctx: &mut SyncContext) {
        if let Some(handle) = self.husk {
            if !ctx.world.contains(handle) {
                debug!("adapter {} lost its husk", self.net_id);
                self.husk = None;
                self.flags
                    .remove(AdapterFlags::CLIENT_READY | AdapterFlags::NAME_ANNOUNCED);
            }
        }

        let mode = ctx.session.mode();
        let owned_locally = self.owner == ctx.session.local_session_id();

        if self.husk.is_none() && (!owned_locally || !self.is_player()) {
            self.materialize(ctx);
        } else if self.husk.is_none()
            && mode.is_client()
            && owned_locally
            && self.is_player()
            && !self.flags.contains(AdapterFlags::CLIENT_READY)
            && (self.flags.contains(AdapterFlags::SERVER_READY) || mode == NetworkMode::Host)
            && self.state.get().owner == self.owner
        {
            self.bind_local_player(ctx);
        } else if self.husk.is_some() {
            self.reconcile(ctx);
        }
    }

    fn world_identity(&self, local: SessionId) -> String {
        let id = self.entity_id.as_deref().unwrap_or_default();
        if self.is_player() && id == PLAYER_IDENTITY && self.owner != local {
            format!("{PLAYER_IDENTITY}-{}", self.owner)
        } else {
            id.to_string()
        }
    }

    /// Binds an existing entity with a matching identity, or instantiates
    /// one from the blueprint.
    fn materialize(&mut self, ctx: &mut SyncContext) {
        let Some(blueprint) = self.blueprint.clone() else {
            return;
        };
        let local = ctx.session.local_session_id();
        let authority = ctx.session.is_authority();
        let identity = self.world_identity(local);
        let record = *self.state.get();
        let position = if !authority && self.flags.contains(AdapterFlags::SERVER_READY) {
            record.position
        } else {
            self.intent.position
        };

        let handle = match ctx.world.find_by_id(&identity) {
            Some(existing) => existing,
            None => ctx.world.spawn(Entity::from_blueprint(
                identity.as_str(),
                &blueprint,
                record.faction,
                position,
            )),
        };
        let Some(entity) = ctx.world.get_mut(handle) else {
            return;
        };
        entity.faction = record.faction;
        entity.net_id = Some(self.net_id);
        entity.husk = !authority || self.owner != local;
        if entity.blueprint.is_none() {
            entity.rebuild(&blueprint);
        }
        if !authority && self.flags.contains(AdapterFlags::SERVER_READY) {
            record.apply_to(entity);
        }
        info!(
            "adapter {} materialized `{identity}` from blueprint `{}`",
            self.net_id, blueprint.name
        );
        self.husk = Some(handle);
        self.finish_binding(ctx);
    }

    /// The observer that owns a player entity drives its own local player
    /// rather than a husk.
    fn bind_local_player(&mut self, ctx: &mut SyncContext) {
        let Some(blueprint) = self.blueprint.clone() else {
            return;
        };
        let authority = ctx.session.is_authority();
        let record = *self.state.get();
        let handle = match ctx.world.local_player().filter(|&h| ctx.world.contains(h)) {
            Some(handle) => handle,
            None => {
                let position = if !authority && self.flags.contains(AdapterFlags::SERVER_READY) {
                    record.position
                } else {
                    self.intent.position
                };
                ctx.world.spawn_local_player(Entity::from_blueprint(
                    PLAYER_IDENTITY,
                    &blueprint,
                    record.faction,
                    position,
                ))
            }
        };
        let Some(entity) = ctx.world.get_mut(handle) else {
            return;
        };
        entity.id = PLAYER_IDENTITY.to_string();
        entity.faction = record.faction;
        entity.rebuild(&blueprint);
        entity.net_id = Some(self.net_id);
        entity.husk = false;
        if !authority {
            record.apply_to(entity);
        }
        info!("adapter {} bound the local player", self.net_id);
        self.husk = Some(handle);
        self.entity_id = Some(PLAYER_IDENTITY.to_string());
        self.finish_binding(ctx);
    }

    fn finish_binding(&mut self, ctx: &mut SyncContext) {
        self.flags.insert(AdapterFlags::CLIENT_READY);
        if ctx.session.is_authority() {
            if let Some(entity) = self.husk.and_then(|h| ctx.world.get(h)) {
                self.parts.refill(entity);
            }
            self.flags.insert(AdapterFlags::DIRTY);
            self.phase = Phase::Bound(Role::Authority);
            self.broadcast_parts(ctx);
        } else {
            ctx.outbox.to_authority(SyncMessage::ForceUpdate {
                net_id: self.net_id,
            });
            self.phase = Phase::Bound(Role::Observer);
        }
    }

    /// Observers pick up faction changes by rebuilding the husk.
    fn reconcile(&mut self, ctx: &mut SyncContext) {
        let mode = ctx.session.mode();
        let Some(entity) = self.husk.and_then(|h| ctx.world.get_mut(h)) else {
            return;
        };
        if mode != NetworkMode::Host && entity.is_dead() {
            return;
        }
        self.flags.insert(AdapterFlags::CLIENT_READY);
        if mode != NetworkMode::Client || !self.flags.contains(AdapterFlags::SERVER_READY) {
            return;
        }
        let faction = self.state.get().faction;
        if entity.faction != faction {
            entity.faction = faction;
            if let Some(blueprint) = &self.blueprint {
                entity.rebuild(blueprint);
            }
            info!("adapter {} moved to faction {faction}", self.net_id);
        }
    }

    /// Publishes a fresh record when anyone could be watching: players,
    /// the first tick, an explicit refresh, or another craft in range.
    fn attempt_publish(&mut self, ctx: &mut SyncContext) {
        if self.phase != Phase::Bound(Role::Authority) {
            return;
        }
        let Some(handle) = self.husk else { return };
        let Some(entity) = ctx.world.get(handle) else {
            return;
        };

        let first = !self.flags.contains(AdapterFlags::SERVER_READY);
        let dirty = self.flags.contains(AdapterFlags::DIRTY);
        let radius_sq = ctx.config.pop_in_distance_sq();
        let watched = self.is_player()
            || first
            || dirty
            || ctx
                .world
                .interest_points(Some(handle))
                .any(|point| point.distance_squared(entity.position) <= radius_sq);
        if !watched {
            return;
        }

        let record = StateRecord::sample(self.owner, entity);
        self.flags.remove(AdapterFlags::DIRTY);
        self.flags.insert(AdapterFlags::SERVER_READY);
        let forced = first || dirty;
        if let Some(change) = self.state.publish(record, forced) {
            ctx.outbox.broadcast(SyncMessage::State {
                net_id: self.net_id,
                version: self.state.version(),
                record: RecordFrame::from(&change.new),
                forced,
            });
        }
    }

    fn announce_player_name(&mut self, ctx: &mut SyncContext) {
        if !self.is_player()
            || self.player_name.is_empty()
            || self.flags.contains(AdapterFlags::NAME_ANNOUNCED)
        {
            return;
        }
        let Some(handle) = self.husk else { return };
        ctx.world.add_player_name(handle, self.player_name.clone());
        self.flags.insert(AdapterFlags::NAME_ANNOUNCED);
    }

    fn integrate_intent(&mut self, ctx: &mut SyncContext) {
        if !self.is_player() {
            return;
        }
        let Some(entity) = self.husk.and_then(|h| ctx.world.get_mut(h)) else {
            return;
        };
        if entity.husk && entity.is_craft() {
            entity.move_craft(self.intent.direction, ctx.config.dt());
        }
    }

    /// Removes local parts the authority has marked detached.
    fn sync_parts(&mut self, ctx: &mut SyncContext) {
        let target = if self.is_player() && self.owner == ctx.session.local_session_id() {
            ctx.world.local_player()
        } else {
            self.husk
        };
        let Some(entity) = target.and_then(|h| ctx.world.get_mut(h)) else {
            return;
        };
        if entity.is_dead() {
            return;
        }
        let mut removed = 0;
        for status in self.parts.detached() {
            if entity.remove_part(status.location) {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("adapter {} removed {removed} detached parts", self.net_id);
        }
    }

    pub(super) fn on_state(
        &mut self,
        frame: &RecordFrame,
        version: u32,
        forced: bool,
        ctx: &mut SyncContext,
    ) {
        if ctx.session.is_authority() {
            debug!("authority ignored a state record for {}", self.net_id);
            return;
        }
        if !advance(&mut self.seen_state, version) {
            debug!("adapter {} dropped stale record v{version}", self.net_id);
            return;
        }
        self.flags.insert(AdapterFlags::SERVER_READY);
        let Some(change) = self.state.receive(StateRecord::from(frame), forced) else {
            return;
        };
        self.apply_record(&change.new, ctx);
    }

    fn apply_record(&self, record: &StateRecord, ctx: &mut SyncContext) {
        if record.owner == ctx.session.local_session_id() && self.is_player() {
            if let Some(entity) = ctx.world.local_player().and_then(|h| ctx.world.get_mut(h)) {
                record.apply_to(entity);
                ctx.world.focus_camera(record.position);
            }
            return;
        }
        match self.husk.and_then(|h| ctx.world.get_mut(h)) {
            Some(entity) => record.apply_to(entity),
            None => debug!("adapter {} has no husk yet; record held", self.net_id),
        }
    }

    pub(super) fn on_parts(
        &mut self,
        entries: &[PartFrame],
        version: u32,
        ctx: &mut SyncContext,
    ) {
        if ctx.session.is_authority() {
            return;
        }
        if !advance(&mut self.seen_parts, version) {
            debug!("adapter {} dropped stale part table v{version}", self.net_id);
            return;
        }
        let reattached = entries.iter().any(|frame| {
            !frame.detached
                && self
                    .parts
                    .get(Vec2::from(frame.location))
                    .is_some_and(|status| status.detached)
        });
        self.parts.replace_all(entries.iter().map(PartStatus::from));
        if reattached {
            self.restore_parts(ctx);
        }
    }

    /// Entries still detached are removed again by the next part sync.
    fn restore_parts(&self, ctx: &mut SyncContext) {
        let Some(blueprint) = &self.blueprint else {
            return;
        };
        let target = if self.is_player() && self.owner == ctx.session.local_session_id() {
            ctx.world.local_player()
        } else {
            self.husk
        };
        if let Some(entity) = target.and_then(|h| ctx.world.get_mut(h)) {
            entity.rebuild(blueprint);
            debug!("adapter {} restored its parts", self.net_id);
        }
    }

    fn broadcast_parts(&self, ctx: &mut SyncContext) {
        ctx.outbox.broadcast(SyncMessage::Parts {
            net_id: self.net_id,
            version: self.parts.version(),
            entries: self.parts.frames(),
        });
    }

    pub fn detach_part(&mut self, location: Vec2, ctx: &mut SyncContext) -> bool {
        if !ctx.session.is_authority() || !self.parts.detach(location) {
            return false;
        }
        if let Some(entity) = self.husk.and_then(|h| ctx.world.get_mut(h)) {
            entity.remove_part(location);
        }
        self.broadcast_parts(ctx);
        true
    }

    pub fn reset_parts(&mut self, ctx: &mut SyncContext) {
        if !ctx.session.is_authority() {
            return;
        }
        self.parts.reset();
        self.broadcast_parts(ctx);
    }

    /// Re-applies the blueprint to the authoritative entity and rebuilds
    /// the part table from it, every part attached again.
    pub fn rebuild_parts(&mut self, ctx: &mut SyncContext) -> bool {
        if !ctx.session.is_authority() {
            return false;
        }
        let Some(blueprint) = &self.blueprint else {
            return false;
        };
        let Some(entity) = self.husk.and_then(|h| ctx.world.get_mut(h)) else {
            return false;
        };
        entity.rebuild(blueprint);
        self.parts.refill(entity);
        self.flags.insert(AdapterFlags::DIRTY);
        self.broadcast_parts(ctx);
        info!("adapter {} rebuilt {} parts", self.net_id, self.parts.len());
        true
    }

    /// Idempotent teardown. A bound local player is released, never
    /// destroyed.
    pub fn despawn(&mut self, ctx: &mut SyncContext) {
        if self.phase == Phase::Despawned {
            return;
        }
        if ctx.session.is_authority() && self.is_player() {
            ctx.session.mark_player_spawned(self.owner, false);
            ctx.session.remove_player();
        }
        if let Some(handle) = self.husk.take() {
            ctx.world.remove_player_name(handle);
            if ctx.world.local_player() == Some(handle) {
                if let Some(entity) = ctx.world.get_mut(handle) {
                    entity.net_id = None;
                }
            } else {
                ctx.world.despawn(handle);
            }
        }
        self.flags
            .remove(AdapterFlags::CLIENT_READY | AdapterFlags::NAME_ANNOUNCED);
        self.phase = Phase::Despawned;
        info!("adapter {} despawned", self.net_id);
    }
}

/// Records `version` as seen when it is newer than the last one.
fn advance(seen: &mut Option<u32>, version: u32) -> bool {
    match *seen {
        Some(last) if !sequence_greater_than(version, last) => false,
        _ => {
            *seen = Some(version);
            true
        }
    }
}

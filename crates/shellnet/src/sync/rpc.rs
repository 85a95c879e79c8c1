use glam::{Vec2, Vec3};
use log::{debug, info, warn};

use super::adapter::{AdapterFlags, PLAYER_IDENTITY, SyncAdapter, SyncContext};
use crate::entity::purchase;
use crate::net::SyncMessage;
use crate::session::{NetId, SessionId};
use crate::world::Cosmetic;

impl SyncAdapter {
    pub fn request_ability_activation(&self, location: Vec2, target: Vec3, ctx: &mut SyncContext) {
        ctx.outbox.to_authority(SyncMessage::ExecuteAbility {
            net_id: self.net_id,
            location: location.into(),
            target: target.into(),
        });
    }

    pub fn request_vendor_purchase(&self, index: usize, vendor: NetId, ctx: &mut SyncContext) {
        let Ok(index) = u32::try_from(index) else {
            return;
        };
        ctx.outbox.to_authority(SyncMessage::VendorPurchase {
            net_id: self.net_id,
            index,
            vendor,
        });
    }

    /// Observers also queue the target locally; it is applied once the
    /// target has materialized.
    pub fn request_tractor_target(&mut self, target: Option<NetId>, ctx: &mut SyncContext) {
        if !ctx.session.is_authority() {
            self.tractor.queue(target);
        }
        ctx.outbox.to_authority(SyncMessage::RequestTractor {
            net_id: self.net_id,
            target,
        });
    }

    pub fn request_blueprint_and_identity(&mut self, ctx: &mut SyncContext) {
        self.retry.reset();
        ctx.outbox.to_authority(SyncMessage::RequestDataStrings {
            net_id: self.net_id,
        });
        ctx.outbox.to_authority(SyncMessage::RequestIdentity {
            net_id: self.net_id,
        });
    }

    pub fn request_direction(&mut self, direction: Vec3, ctx: &mut SyncContext) {
        self.intent.direction = direction;
        ctx.outbox.to_authority(SyncMessage::ChangeDirection {
            net_id: self.net_id,
            direction: direction.into(),
        });
    }

    pub fn force_update(&self, ctx: &mut SyncContext) {
        ctx.outbox.to_authority(SyncMessage::ForceUpdate {
            net_id: self.net_id,
        });
    }

    pub fn handle(&mut self, from: SessionId, message: SyncMessage, ctx: &mut SyncContext) {
        if ctx.session.is_authority() {
            self.handle_request(from, message, ctx);
        } else {
            self.handle_update(message, ctx);
        }
    }

    fn handle_request(&mut self, from: SessionId, message: SyncMessage, ctx: &mut SyncContext) {
        match message {
            SyncMessage::RequestDataStrings { .. } => {
                let reply = SyncMessage::DataStrings {
                    net_id: self.net_id,
                    player_name: self.player_name.clone(),
                    blueprint: self.blueprint_name.clone().unwrap_or_default(),
                };
                ctx.outbox.to_session(from, reply);
            }
            SyncMessage::RequestIdentity { .. } => {
                let Some(entity_id) = self.entity_id.clone() else {
                    return;
                };
                ctx.outbox.to_session(
                    from,
                    SyncMessage::Identity {
                        net_id: self.net_id,
                        entity_id,
                    },
                );
            }
            SyncMessage::ForceUpdate { .. } => self.flags.insert(AdapterFlags::DIRTY),
            SyncMessage::RequestTractor { target, .. } => self.on_tractor_request(from, target, ctx),
            SyncMessage::ChangeDirection { direction, .. } => {
                if self.owned_by(from) {
                    self.intent.direction = Vec3::from(direction);
                } else {
                    self.reject(from, "direction change");
                }
            }
            SyncMessage::ExecuteAbility {
                location, target, ..
            } => self.on_ability_request(from, Vec2::from(location), Vec3::from(target), ctx),
            SyncMessage::VendorPurchase { index, vendor, .. } => {
                self.on_vendor_request(from, index as usize, vendor, ctx)
            }
            other => debug!("authority ignored {other:?} for adapter {}", self.net_id),
        }
    }

    fn handle_update(&mut self, message: SyncMessage, ctx: &mut SyncContext) {
        match message {
            SyncMessage::State {
                record,
                version,
                forced,
                ..
            } => self.on_state(&record, version, forced, ctx),
            SyncMessage::Parts {
                entries, version, ..
            } => self.on_parts(&entries, version, ctx),
            SyncMessage::DataStrings {
                player_name,
                blueprint,
                ..
            } => self.on_data_strings(player_name, blueprint, ctx),
            SyncMessage::Identity { entity_id, .. } => self.on_identity(entity_id),
            SyncMessage::Tractor { target, .. } => self.tractor.queue(target),
            SyncMessage::AbilityCosmetic {
                location, victim, ..
            } => {
                let Some(source) = self.husk else { return };
                ctx.world.push_cosmetic(Cosmetic {
                    source,
                    location: Vec2::from(location),
                    target: Vec3::from(victim),
                });
            }
            other => debug!("observer ignored {other:?} for adapter {}", self.net_id),
        }
    }

    fn owned_by(&self, from: SessionId) -> bool {
        self.owner == from
    }

    fn reject(&self, from: SessionId, what: &str) {
        debug!(
            "dropped {what} for adapter {} from session {from}",
            self.net_id
        );
    }

    fn on_tractor_request(&mut self, from: SessionId, target: Option<NetId>, ctx: &mut SyncContext) {
        if !self.owned_by(from) || !self.is_player() {
            return self.reject(from, "tractor request");
        }
        if let Some(target) = target {
            if target == self.net_id || ctx.session.lookup_spawned(target).is_none() {
                return self.reject(from, "tractor request");
            }
        }
        let Some(entity) = self.husk.and_then(|h| ctx.world.get_mut(h)) else {
            return self.reject(from, "tractor request");
        };
        if !entity.set_tractor_target(target) {
            return self.reject(from, "tractor request");
        }
        self.tractor.set(target);
        ctx.outbox.broadcast(SyncMessage::Tractor {
            net_id: self.net_id,
            target,
        });
    }

    fn on_ability_request(
        &mut self,
        from: SessionId,
        location: Vec2,
        target: Vec3,
        ctx: &mut SyncContext,
    ) {
        if !self.owned_by(from) {
            return self.reject(from, "ability");
        }
        let Some(entity) = self.husk.and_then(|h| ctx.world.get_mut(h)) else {
            return self.reject(from, "ability");
        };
        if !entity.activate_ability(location) {
            return self.reject(from, "ability");
        }
        self.flags.insert(AdapterFlags::DIRTY);
        ctx.outbox.broadcast(SyncMessage::AbilityCosmetic {
            net_id: self.net_id,
            location: location.into(),
            victim: target.into(),
        });
    }

    fn on_vendor_request(
        &mut self,
        from: SessionId,
        index: usize,
        vendor: NetId,
        ctx: &mut SyncContext,
    ) {
        if !self.owned_by(from) || !self.is_player() {
            return self.reject(from, "vendor purchase");
        }
        let Some(buyer) = self.husk else {
            return self.reject(from, "vendor purchase");
        };
        let Some(vendor_handle) = ctx.session.lookup_spawned(vendor).and_then(|s| s.husk) else {
            return self.reject(from, "vendor purchase");
        };
        match purchase(ctx.world, buyer, vendor_handle, index) {
            Ok(item) => {
                info!(
                    "session {from} bought `{}` for {} credits",
                    item.name, item.cost
                );
                self.flags.insert(AdapterFlags::DIRTY);
            }
            Err(err) => debug!("vendor purchase from session {from} failed: {err}"),
        }
    }

    fn on_data_strings(&mut self, player_name: String, blueprint: String, ctx: &mut SyncContext) {
        self.player_name = player_name;
        if blueprint.is_empty() {
            return;
        }
        if !ctx.blueprints.contains(&blueprint) {
            warn!(
                "adapter {} references unknown blueprint `{blueprint}`",
                self.net_id
            );
        }
        self.blueprint_name = Some(blueprint);
    }

    /// Players are named after their owner so every observer can tell them
    /// apart.
    fn on_identity(&mut self, entity_id: String) {
        let entity_id = if entity_id == PLAYER_IDENTITY || self.is_player() {
            format!("{PLAYER_IDENTITY}-{}", self.owner)
        } else {
            entity_id
        };
        self.entity_id = Some(entity_id);
    }
}

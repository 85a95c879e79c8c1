use glam::{Quat, Vec3};
use rkyv::{Archive, Deserialize, Serialize};

use super::var::Tolerant;
use crate::entity::{Entity, Health};
use crate::session::SessionId;

pub const TRANSFORM_TOLERANCE_SQ: f32 = 1.0;
pub const ROTATION_TOLERANCE_SQ_DEG: f32 = 1.0;
pub const TIMER_TOLERANCE: f32 = 0.1;
pub const HEALTH_TOLERANCE: f32 = 0.5;

/// Health the authority seeds a record with before its entity is sampled.
pub const SEED_HEALTH: Health = Health::new(1000.0, 250.0, 500.0);

/// Snapshot of one entity's replicated state. Always replaced whole.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateRecord {
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Quat,
    pub faction: i32,
    pub weapon_timer: f32,
    pub shell: f32,
    pub core: f32,
    pub energy: f32,
    pub power: i32,
    pub owner: SessionId,
}

impl Default for StateRecord {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            faction: 0,
            weapon_timer: 0.0,
            shell: 0.0,
            core: 0.0,
            energy: 0.0,
            power: 0,
            owner: 0,
        }
    }
}

impl StateRecord {
    pub fn seed(owner: SessionId, faction: i32) -> Self {
        Self {
            faction,
            shell: SEED_HEALTH.shell,
            core: SEED_HEALTH.core,
            energy: SEED_HEALTH.energy,
            owner,
            ..Default::default()
        }
    }

    pub fn sample(owner: SessionId, entity: &Entity) -> Self {
        Self {
            position: entity.position,
            velocity: entity.velocity,
            rotation: entity.rotation,
            faction: entity.faction,
            weapon_timer: entity.weapon_timer,
            shell: entity.health.shell,
            core: entity.health.core,
            energy: entity.health.energy,
            power: entity.power().unwrap_or(0),
            owner,
        }
    }

    pub fn health(&self) -> Health {
        Health::new(self.shell, self.core, self.energy)
    }

    /// Overwrites the entity's replicated fields and clears its local
    /// prediction flag. Power is only written to crafts.
    pub fn apply_to(&self, entity: &mut Entity) {
        entity.position = self.position;
        entity.velocity = self.velocity;
        entity.rotation = self.rotation;
        entity.dirty = false;
        entity.weapon_timer = self.weapon_timer;
        entity.sync_health(self.shell, self.core, self.energy);
        entity.sync_power(self.power);
    }
}

fn rotation_delta_deg(a: Quat, b: Quat) -> f32 {
    let dot = a.dot(b).abs().min(1.0);
    (2.0 * dot.acos()).to_degrees()
}

impl Tolerant for StateRecord {
    /// Equivalent when identity fields match and every continuous field
    /// moved by less than its tolerance.
    fn approx_eq(&self, other: &Self) -> bool {
        let rotation = rotation_delta_deg(self.rotation, other.rotation);
        self.owner == other.owner
            && self.faction == other.faction
            && self.power == other.power
            && self.position.distance_squared(other.position) < TRANSFORM_TOLERANCE_SQ
            && self.velocity.distance_squared(other.velocity) < TRANSFORM_TOLERANCE_SQ
            && rotation * rotation < ROTATION_TOLERANCE_SQ_DEG
            && (self.weapon_timer - other.weapon_timer).abs() < TIMER_TOLERANCE
            && (self.shell - other.shell).abs() < HEALTH_TOLERANCE
            && (self.core - other.core).abs() < HEALTH_TOLERANCE
            && (self.energy - other.energy).abs() < HEALTH_TOLERANCE
    }
}

/// Wire layout of a [`StateRecord`]. Field order is part of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct RecordFrame {
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub rotation: [f32; 4],
    pub owner: u64,
    pub faction: i32,
    pub weapon_timer: f32,
    pub power: i32,
    pub shell: f32,
    pub core: f32,
    pub energy: f32,
}

impl From<&StateRecord> for RecordFrame {
    fn from(record: &StateRecord) -> Self {
        Self {
            position: record.position.into(),
            velocity: record.velocity.into(),
            rotation: record.rotation.to_array(),
            owner: record.owner,
            faction: record.faction,
            weapon_timer: record.weapon_timer,
            power: record.power,
            shell: record.shell,
            core: record.core,
            energy: record.energy,
        }
    }
}

impl From<&RecordFrame> for StateRecord {
    fn from(frame: &RecordFrame) -> Self {
        Self {
            position: Vec3::from(frame.position),
            velocity: Vec3::from(frame.velocity),
            rotation: Quat::from_array(frame.rotation),
            faction: frame.faction,
            weapon_timer: frame.weapon_timer,
            shell: frame.shell,
            core: frame.core,
            energy: frame.energy,
            power: frame.power,
            owner: frame.owner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Blueprint, BlueprintKind};

    fn record() -> StateRecord {
        StateRecord {
            position: Vec3::new(10.0, 5.0, 0.0),
            velocity: Vec3::new(1.0, 0.0, 0.0),
            rotation: Quat::from_rotation_z(0.5),
            faction: 1,
            weapon_timer: 0.4,
            power: 30,
            ..StateRecord::seed(2, 1)
        }
    }

    #[test]
    fn small_differences_are_suppressed() {
        let a = record();
        let b = StateRecord {
            position: a.position + Vec3::new(0.5, 0.5, 0.0),
            velocity: a.velocity + Vec3::new(0.0, 0.9, 0.0),
            rotation: a.rotation * Quat::from_rotation_z(0.5f32.to_radians()),
            weapon_timer: a.weapon_timer + 0.05,
            shell: a.shell - 0.4,
            core: a.core + 0.4,
            energy: a.energy + 0.49,
            ..a
        };
        assert!(a.approx_eq(&b));
        assert!(b.approx_eq(&a));
    }

    #[test]
    fn any_large_difference_notifies() {
        let a = record();
        let variants = [
            StateRecord { position: a.position + Vec3::X * 1.5, ..a },
            StateRecord { velocity: a.velocity + Vec3::Y * 2.0, ..a },
            StateRecord { rotation: a.rotation * Quat::from_rotation_z(0.1), ..a },
            StateRecord { weapon_timer: a.weapon_timer + 0.2, ..a },
            StateRecord { shell: a.shell - 1.0, ..a },
            StateRecord { core: a.core - 1.0, ..a },
            StateRecord { energy: a.energy - 1.0, ..a },
            StateRecord { power: a.power + 1, ..a },
            StateRecord { faction: 2, ..a },
            StateRecord { owner: 9, ..a },
        ];
        for variant in variants {
            assert!(!a.approx_eq(&variant), "{variant:?} should notify");
        }
    }

    #[test]
    fn sign_flipped_rotation_is_equivalent() {
        let a = record();
        let b = StateRecord { rotation: -a.rotation, ..a };
        assert!(a.approx_eq(&b));
    }

    #[test]
    fn frame_preserves_every_field() {
        let a = record();
        let frame = RecordFrame::from(&a);
        assert_eq!(frame.owner, 2);
        assert_eq!(frame.power, 30);
        assert_eq!(StateRecord::from(&frame), a);
    }

    #[test]
    fn sample_and_apply_mirror_entity_state() {
        let blueprint = Blueprint::new("Scout", BlueprintKind::Craft);
        let mut source = Entity::from_blueprint("a", &blueprint, 1, Vec3::new(3.0, 4.0, 0.0));
        source.sync_power(12);
        source.weapon_timer = 0.25;

        let record = StateRecord::sample(5, &source);
        assert_eq!(record.health(), SEED_HEALTH);

        let mut target = Entity::from_blueprint("b", &blueprint, 1, Vec3::ZERO);
        target.dirty = true;
        record.apply_to(&mut target);

        assert_eq!(target.position, source.position);
        assert_eq!(target.power(), Some(12));
        assert_eq!(target.weapon_timer, 0.25);
        assert!(!target.dirty);
    }
}

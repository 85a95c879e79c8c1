use glam::{Quat, Vec2, Vec3};

use super::blueprint::{AbilitySpec, Blueprint, BlueprintKind};
use super::vendor::VendorStock;
use crate::session::NetId;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Health {
    pub shell: f32,
    pub core: f32,
    pub energy: f32,
}

impl Health {
    pub const fn new(shell: f32, core: f32, energy: f32) -> Self {
        Self {
            shell,
            core,
            energy,
        }
    }
}

impl From<[f32; 3]> for Health {
    fn from(value: [f32; 3]) -> Self {
        Self::new(value[0], value[1], value[2])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ability {
    pub name: String,
    pub cooldown: f32,
}

impl From<&AbilitySpec> for Ability {
    fn from(spec: &AbilitySpec) -> Self {
        Self {
            name: spec.name.clone(),
            cooldown: spec.cooldown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub location: Vec2,
    pub ability: Option<Ability>,
    pub attached: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CraftState {
    pub power: i32,
    pub credits: u32,
    pub speed: f32,
    pub tractor_target: Option<NetId>,
    pub cargo: Vec<String>,
}

/// Capabilities an entity carries.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Generic,
    Craft(CraftState),
    Vendor(VendorStock),
}

impl EntityKind {
    fn from_blueprint(blueprint: &Blueprint) -> Self {
        match blueprint.kind {
            BlueprintKind::Generic => Self::Generic,
            BlueprintKind::Craft => Self::Craft(CraftState {
                power: blueprint.power,
                credits: blueprint.credits,
                speed: blueprint.speed,
                ..Default::default()
            }),
            BlueprintKind::Vendor => Self::Vendor(VendorStock::new(blueprint.stock.clone())),
        }
    }

    fn matches(&self, kind: BlueprintKind) -> bool {
        matches!(
            (self, kind),
            (Self::Generic, BlueprintKind::Generic)
                | (Self::Craft(_), BlueprintKind::Craft)
                | (Self::Vendor(_), BlueprintKind::Vendor)
        )
    }
}

/// Local gameplay state of one entity, authoritative or a husk.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: String,
    pub faction: i32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Quat,
    pub health: Health,
    pub weapon_timer: f32,
    pub main_weapon: Option<Ability>,
    pub parts: Vec<Part>,
    pub kind: EntityKind,
    pub blueprint: Option<String>,
    pub spawn_point: Vec3,
    pub net_id: Option<NetId>,
    pub husk: bool,
    pub dirty: bool,
    dead: bool,
}

impl Entity {
    pub fn new(id: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id: id.into(),
            faction: 0,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            health: Health::default(),
            weapon_timer: 0.0,
            main_weapon: None,
            parts: Vec::new(),
            kind,
            blueprint: None,
            spawn_point: Vec3::ZERO,
            net_id: None,
            husk: false,
            dirty: false,
            dead: false,
        }
    }

    pub fn from_blueprint(
        id: impl Into<String>,
        blueprint: &Blueprint,
        faction: i32,
        position: Vec3,
    ) -> Self {
        let mut entity = Self::new(id, EntityKind::from_blueprint(blueprint));
        entity.faction = faction;
        entity.position = position;
        entity.spawn_point = position;
        entity.rebuild(blueprint);
        entity.health = Health::from(blueprint.health);
        entity
    }

    /// Re-applies a blueprint after a faction or stat change. Parts are
    /// recreated attached; transform, health and craft wallet are kept.
    pub fn rebuild(&mut self, blueprint: &Blueprint) {
        self.blueprint = Some(blueprint.name.clone());
        self.main_weapon = blueprint.main_weapon.as_ref().map(Ability::from);
        self.parts = blueprint
            .parts
            .iter()
            .map(|spec| Part {
                location: Vec2::from(spec.location),
                ability: spec.ability.as_ref().map(Ability::from),
                attached: true,
            })
            .collect();
        if !self.kind.matches(blueprint.kind) {
            self.kind = EntityKind::from_blueprint(blueprint);
        }
        self.dead = false;
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn kill(&mut self) {
        self.dead = true;
        self.velocity = Vec3::ZERO;
    }

    pub fn sync_health(&mut self, shell: f32, core: f32, energy: f32) {
        self.health = Health::new(shell, core, energy);
    }

    pub fn craft(&self) -> Option<&CraftState> {
        match &self.kind {
            EntityKind::Craft(craft) => Some(craft),
            _ => None,
        }
    }

    pub fn craft_mut(&mut self) -> Option<&mut CraftState> {
        match &mut self.kind {
            EntityKind::Craft(craft) => Some(craft),
            _ => None,
        }
    }

    pub fn is_craft(&self) -> bool {
        matches!(self.kind, EntityKind::Craft(_))
    }

    pub fn power(&self) -> Option<i32> {
        self.craft().map(|c| c.power)
    }

    pub fn sync_power(&mut self, power: i32) -> bool {
        match self.craft_mut() {
            Some(craft) => {
                craft.power = power;
                true
            }
            None => false,
        }
    }

    pub fn set_tractor_target(&mut self, target: Option<NetId>) -> bool {
        match self.craft_mut() {
            Some(craft) => {
                craft.tractor_target = target;
                true
            }
            None => false,
        }
    }

    pub fn tractor_target(&self) -> Option<NetId> {
        self.craft().and_then(|c| c.tractor_target)
    }

    pub fn network_parts(&self) -> impl Iterator<Item = &Part> {
        self.parts.iter().filter(|p| p.attached)
    }

    /// Detaches the attached part at `location`. Returns false when there is
    /// nothing attached there.
    pub fn remove_part(&mut self, location: Vec2) -> bool {
        match self
            .parts
            .iter_mut()
            .find(|p| p.attached && p.location == location)
        {
            Some(part) => {
                part.attached = false;
                true
            }
            None => false,
        }
    }

    /// `Vec2::ZERO` addresses the main weapon.
    pub fn ability_at(&self, location: Vec2) -> Option<&Ability> {
        if location == Vec2::ZERO {
            return self.main_weapon.as_ref();
        }
        self.network_parts()
            .find(|p| p.location == location)
            .and_then(|p| p.ability.as_ref())
    }

    pub fn activate_ability(&mut self, location: Vec2) -> bool {
        if self.dead || self.weapon_timer > 0.0 {
            return false;
        }
        let Some(cooldown) = self.ability_at(location).map(|a| a.cooldown) else {
            return false;
        };
        self.weapon_timer = cooldown;
        true
    }

    pub fn cool_down(&mut self, dt: f32) {
        self.weapon_timer = (self.weapon_timer - dt).max(0.0);
    }

    pub fn move_craft(&mut self, direction: Vec3, dt: f32) {
        let Some(speed) = self.craft().map(|c| c.speed) else {
            return;
        };
        if self.dead {
            return;
        }
        self.velocity = direction.normalize_or_zero() * speed;
        self.position += self.velocity * dt;
    }
}

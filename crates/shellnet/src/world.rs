use std::collections::HashMap;

use glam::{Vec2, Vec3};

use crate::entity::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cosmetic {
    pub source: EntityHandle,
    pub location: Vec2,
    pub target: Vec3,
}

#[derive(Debug)]
pub struct World {
    entities: HashMap<u32, Entity>,
    next_entity_id: u32,
    local_player: Option<EntityHandle>,
    camera_focus: Option<Vec3>,
    player_names: HashMap<EntityHandle, String>,
    cosmetics: Vec<Cosmetic>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            next_entity_id: 1,
            local_player: None,
            camera_focus: None,
            player_names: HashMap::new(),
            cosmetics: Vec::new(),
        }
    }

    pub fn spawn(&mut self, entity: Entity) -> EntityHandle {
        let id = self.allocate_id();
        self.entities.insert(id, entity);
        EntityHandle(id)
    }

    pub fn spawn_local_player(&mut self, entity: Entity) -> EntityHandle {
        let handle = self.spawn(entity);
        self.local_player = Some(handle);
        handle
    }

    pub fn despawn(&mut self, handle: EntityHandle) -> Option<Entity> {
        let entity = self.entities.remove(&handle.0);
        if entity.is_some() {
            self.player_names.remove(&handle);
            if self.local_player == Some(handle) {
                self.local_player = None;
            }
        }
        entity
    }

    pub fn get(&self, handle: EntityHandle) -> Option<&Entity> {
        self.entities.get(&handle.0)
    }

    pub fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut Entity> {
        self.entities.get_mut(&handle.0)
    }

    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.entities.contains_key(&handle.0)
    }

    pub fn find_by_id(&self, id: &str) -> Option<EntityHandle> {
        self.entities
            .iter()
            .find(|(_, e)| e.id == id)
            .map(|(&key, _)| EntityHandle(key))
    }

    pub fn entities(&self) -> impl Iterator<Item = (EntityHandle, &Entity)> {
        self.entities.iter().map(|(&id, e)| (EntityHandle(id), e))
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn advance(&mut self, dt: f32) {
        for entity in self.entities.values_mut() {
            entity.cool_down(dt);
        }
    }

    pub fn local_player(&self) -> Option<EntityHandle> {
        self.local_player
    }

    /// Live crafts other than `exclude`.
    pub fn interest_points(&self, exclude: Option<EntityHandle>) -> impl Iterator<Item = Vec3> {
        self.entities
            .iter()
            .filter(move |(id, e)| {
                Some(EntityHandle(**id)) != exclude && e.is_craft() && !e.is_dead()
            })
            .map(|(_, e)| e.position)
    }

    pub fn focus_camera(&mut self, position: Vec3) {
        self.camera_focus = Some(position);
    }

    pub fn camera_focus(&self) -> Option<Vec3> {
        self.camera_focus
    }

    pub fn add_player_name(&mut self, handle: EntityHandle, name: impl Into<String>) {
        self.player_names.insert(handle, name.into());
    }

    pub fn remove_player_name(&mut self, handle: EntityHandle) -> Option<String> {
        self.player_names.remove(&handle)
    }

    pub fn player_name(&self, handle: EntityHandle) -> Option<&str> {
        self.player_names.get(&handle).map(String::as_str)
    }

    pub fn push_cosmetic(&mut self, cosmetic: Cosmetic) {
        self.cosmetics.push(cosmetic);
    }

    pub fn drain_cosmetics(&mut self) -> Vec<Cosmetic> {
        std::mem::take(&mut self.cosmetics)
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }
}

use glam::Vec2;
use rkyv::{Archive, Deserialize, Serialize};

use crate::entity::Entity;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartStatus {
    pub location: Vec2,
    pub detached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PartFrame {
    pub location: [f32; 2],
    pub detached: bool,
}

impl From<&PartStatus> for PartFrame {
    fn from(status: &PartStatus) -> Self {
        Self {
            location: status.location.into(),
            detached: status.detached,
        }
    }
}

impl From<&PartFrame> for PartStatus {
    fn from(frame: &PartFrame) -> Self {
        Self {
            location: Vec2::from(frame.location),
            detached: frame.detached,
        }
    }
}

/// Ordered per-part attachment flags, keyed by location. Replicated as a
/// unit; detachment is one-way until the table is rebuilt.
#[derive(Debug, Clone, Default)]
pub struct PartTable {
    entries: Vec<PartStatus>,
    version: u32,
}

impl PartTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every entry with the entity's parts, in blueprint order.
    /// The version keeps counting up so observers take the new table.
    pub fn refill(&mut self, entity: &Entity) {
        self.clear();
        for part in &entity.parts {
            if self.insert(part.location) && !part.attached {
                self.detach(part.location);
            }
        }
    }

    pub fn insert(&mut self, location: Vec2) -> bool {
        if self.get(location).is_some() {
            return false;
        }
        self.entries.push(PartStatus {
            location,
            detached: false,
        });
        self.bump();
        true
    }

    pub fn get(&self, location: Vec2) -> Option<&PartStatus> {
        self.entries.iter().find(|e| e.location == location)
    }

    /// Marks the part at `location` detached. A missing or already detached
    /// entry is left alone; detach requests may race with despawn.
    pub fn detach(&mut self, location: Vec2) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| e.location == location && !e.detached)
        {
            Some(entry) => {
                entry.detached = true;
                self.bump();
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.detached = true;
        }
        self.bump();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.bump();
    }

    pub fn replace_all(&mut self, entries: impl IntoIterator<Item = PartStatus>) {
        self.entries.clear();
        for entry in entries {
            if self.get(entry.location).is_none() {
                self.entries.push(entry);
            }
        }
        self.bump();
    }

    pub fn detached(&self) -> impl Iterator<Item = &PartStatus> {
        self.entries.iter().filter(|e| e.detached)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartStatus> {
        self.entries.iter()
    }

    pub fn frames(&self) -> Vec<PartFrame> {
        self.entries.iter().map(PartFrame::from).collect()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn bump(&mut self) {
        self.version = self.version.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PartTable {
        let mut table = PartTable::new();
        table.insert(Vec2::new(2.0, 0.0));
        table.insert(Vec2::new(-2.0, 0.0));
        table.insert(Vec2::new(0.0, 1.5));
        table
    }

    #[test]
    fn locations_are_unique() {
        let mut table = table();
        assert!(!table.insert(Vec2::new(2.0, 0.0)));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn detach_is_idempotent() {
        let mut table = table();
        assert!(table.detach(Vec2::new(2.0, 0.0)));
        let version = table.version();
        let before: Vec<PartStatus> = table.iter().copied().collect();

        assert!(!table.detach(Vec2::new(2.0, 0.0)));
        let after: Vec<PartStatus> = table.iter().copied().collect();
        assert_eq!(before, after);
        assert_eq!(table.version(), version);
    }

    #[test]
    fn detach_missing_location_is_noop() {
        let mut table = table();
        assert!(!table.detach(Vec2::new(7.0, 7.0)));
        assert_eq!(table.detached().count(), 0);
    }

    #[test]
    fn reset_detaches_everything_in_order() {
        let mut table = table();
        table.reset();
        assert_eq!(table.detached().count(), 3);
        assert_eq!(table.iter().next().unwrap().location, Vec2::new(2.0, 0.0));
    }

    #[test]
    fn refill_after_reset_reattaches_with_a_newer_version() {
        let mut entity = Entity::new("hull", crate::entity::EntityKind::Generic);
        entity.parts = [Vec2::new(2.0, 0.0), Vec2::new(-2.0, 0.0)]
            .into_iter()
            .map(|location| crate::entity::Part {
                location,
                ability: None,
                attached: true,
            })
            .collect();
        entity.parts[1].attached = false;

        let mut table = PartTable::new();
        table.refill(&entity);
        assert_eq!(table.len(), 2);
        assert_eq!(table.detached().count(), 1);

        table.reset();
        let version = table.version();
        entity.parts[1].attached = true;
        table.refill(&entity);
        assert_eq!(table.detached().count(), 0);
        assert!(table.version() > version);
    }

    #[test]
    fn replace_all_drops_duplicate_locations() {
        let mut table = PartTable::new();
        let entry = PartStatus {
            location: Vec2::ONE,
            detached: false,
        };
        table.replace_all([entry, PartStatus { detached: true, ..entry }]);
        assert_eq!(table.len(), 1);
        assert!(!table.get(Vec2::ONE).unwrap().detached);
    }
}

/// Coarse equivalence used to damp change notifications.
pub trait Tolerant {
    fn approx_eq(&self, other: &Self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Change<T> {
    pub old: T,
    pub new: T,
}

/// A replicated value with exactly one writer. Writes replace the value
/// whole and report the `(old, new)` pair unless the new value is
/// equivalent to the current one.
#[derive(Debug, Clone)]
pub struct ReplicatedVar<T> {
    value: T,
    version: u32,
    initialized: bool,
}

impl<T: Default> Default for ReplicatedVar<T> {
    fn default() -> Self {
        Self {
            value: T::default(),
            version: 0,
            initialized: false,
        }
    }
}

impl<T: Tolerant + Clone> ReplicatedVar<T> {
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Bumped on every accepted write.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Replaces the value without notifying; the next write always notifies.
    pub fn reset(&mut self, value: T) {
        self.value = value;
        self.initialized = false;
    }

    pub fn publish(&mut self, value: T, force: bool) -> Option<Change<T>> {
        self.write(value, force)
    }

    pub fn receive(&mut self, value: T, force: bool) -> Option<Change<T>> {
        self.write(value, force)
    }

    fn write(&mut self, value: T, force: bool) -> Option<Change<T>> {
        if self.initialized && !force && self.value.approx_eq(&value) {
            return None;
        }
        let old = std::mem::replace(&mut self.value, value.clone());
        self.initialized = true;
        self.version = self.version.wrapping_add(1);
        Some(Change { old, new: value })
    }
}

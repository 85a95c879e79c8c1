use crate::session::{NetId, SessionDirectory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing queued.
    Idle,
    /// Target is registered but not materialized locally yet.
    Pending,
    /// Target left the spawn registry; the request was abandoned.
    Dropped(NetId),
    Apply(Option<NetId>),
}

/// Weak tractor reference by network identity. Observers hold a queued
/// target until the spawn registry can resolve it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TractorLink {
    target: Option<NetId>,
    queued: bool,
}

impl TractorLink {
    /// Queues a target for lazy resolution, replacing any pending one.
    pub fn queue(&mut self, target: Option<NetId>) {
        self.target = target;
        self.queued = true;
    }

    /// Records a target that has already been applied.
    pub fn set(&mut self, target: Option<NetId>) {
        self.target = target;
        self.queued = false;
    }

    pub fn target(&self) -> Option<NetId> {
        self.target
    }

    pub fn is_queued(&self) -> bool {
        self.queued
    }

    pub fn resolve(&mut self, session: &dyn SessionDirectory) -> Resolution {
        if !self.queued {
            return Resolution::Idle;
        }
        let Some(target) = self.target else {
            self.queued = false;
            return Resolution::Apply(None);
        };
        match session.lookup_spawned(target) {
            None => {
                self.target = None;
                self.queued = false;
                Resolution::Dropped(target)
            }
            Some(spawned) if spawned.husk.is_none() => Resolution::Pending,
            Some(_) => {
                self.queued = false;
                Resolution::Apply(Some(target))
            }
        }
    }
}

use std::collections::BTreeMap;

use log::trace;

use super::protocol::{PacketError, SyncMessage};
use crate::replicator::{Replicator, SyncError};
use crate::session::{NetId, SessionId};
use crate::sync::{Route, SpawnSpec};

const MAX_PUMP_ROUNDS: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum LoopbackError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Packet(#[from] PacketError),
}

/// In-memory transport between one authority and any number of observers.
/// Every message goes through the wire encoding on its way across.
#[derive(Debug)]
pub struct LoopbackHub {
    authority: Replicator,
    observers: BTreeMap<SessionId, Replicator>,
    delivered: u64,
}

impl LoopbackHub {
    pub fn new(authority: Replicator) -> Self {
        Self {
            authority,
            observers: BTreeMap::new(),
            delivered: 0,
        }
    }

    pub fn authority(&self) -> &Replicator {
        &self.authority
    }

    pub fn authority_mut(&mut self) -> &mut Replicator {
        &mut self.authority
    }

    pub fn observer(&self, session: SessionId) -> Option<&Replicator> {
        self.observers.get(&session)
    }

    pub fn observer_mut(&mut self, session: SessionId) -> Option<&mut Replicator> {
        self.observers.get_mut(&session)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn connect(
        &mut self,
        observer: Replicator,
        player: Option<SpawnSpec>,
    ) -> Result<Option<NetId>, LoopbackError> {
        let session = observer.local_session_id();
        self.observers.insert(session, observer);
        let player = self.authority.session_joined(session, player)?;
        self.pump()?;
        Ok(player)
    }

    pub fn disconnect(&mut self, session: SessionId) -> Result<Option<Replicator>, LoopbackError> {
        let observer = self.observers.remove(&session);
        self.authority.session_left(session)?;
        self.pump()?;
        Ok(observer)
    }

    /// Moves messages until no outbox has anything left. Returns how many
    /// were delivered.
    pub fn pump(&mut self) -> Result<usize, LoopbackError> {
        let authority_id = self.authority.local_session_id();
        let mut total = 0;

        for _ in 0..MAX_PUMP_ROUNDS {
            let mut moved = 0;

            for (route, message) in self.authority.drain_outbox() {
                let bytes = message.to_bytes()?;
                let targets: Vec<SessionId> = match route {
                    Route::Broadcast => self.observers.keys().copied().collect(),
                    Route::Session(session) => vec![session],
                    Route::Authority => Vec::new(),
                };
                for session in targets {
                    if let Some(observer) = self.observers.get_mut(&session) {
                        observer.receive(authority_id, SyncMessage::from_bytes(&bytes)?);
                        moved += 1;
                    }
                }
            }

            for (&session, observer) in self.observers.iter_mut() {
                for (route, message) in observer.drain_outbox() {
                    if route != Route::Authority {
                        trace!("observer {session} tried to route {route:?}");
                        continue;
                    }
                    let bytes = message.to_bytes()?;
                    self.authority
                        .receive(session, SyncMessage::from_bytes(&bytes)?);
                    moved += 1;
                }
            }

            if moved == 0 {
                break;
            }
            total += moved;
        }

        self.delivered += total as u64;
        Ok(total)
    }

    pub fn step(&mut self) -> Result<(), LoopbackError> {
        self.authority.tick();
        self.pump()?;
        for observer in self.observers.values_mut() {
            observer.tick();
        }
        self.pump()?;
        Ok(())
    }

    pub fn run(&mut self, ticks: usize) -> Result<(), LoopbackError> {
        for _ in 0..ticks {
            self.step()?;
        }
        Ok(())
    }
}

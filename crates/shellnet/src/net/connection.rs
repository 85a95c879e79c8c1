use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::protocol::sequence_greater_than;
use crate::session::{NetId, SERVER_SESSION, SessionId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmitError {
    #[error("server full")]
    ServerFull,
}

#[derive(Debug)]
pub struct PeerSession {
    pub addr: SocketAddr,
    pub session_id: SessionId,
    pub player_name: String,
    pub blueprint: String,
    pub player: Option<NetId>,
    pub last_receive_time: Instant,
    last_sequence: Option<u32>,
}

impl PeerSession {
    pub fn new(addr: SocketAddr, session_id: SessionId, player_name: String, blueprint: String) -> Self {
        Self {
            addr,
            session_id,
            player_name,
            blueprint,
            player: None,
            last_receive_time: Instant::now(),
            last_sequence: None,
        }
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive_time.elapsed() > timeout
    }

    pub fn touch(&mut self) {
        self.last_receive_time = Instant::now();
    }

    /// Accepts a packet sequence unless it is older than or equal to the
    /// newest one seen.
    pub fn accept_sequence(&mut self, sequence: u32) -> bool {
        match self.last_sequence {
            Some(last) if !sequence_greater_than(sequence, last) => false,
            _ => {
                self.last_sequence = Some(sequence);
                true
            }
        }
    }
}

#[derive(Debug)]
pub struct SessionTable {
    by_addr: HashMap<SocketAddr, SessionId>,
    sessions: HashMap<SessionId, PeerSession>,
    next_session: SessionId,
    max_sessions: usize,
    timeout: Duration,
}

impl SessionTable {
    pub fn new(max_sessions: usize, timeout: Duration) -> Self {
        Self {
            by_addr: HashMap::new(),
            sessions: HashMap::new(),
            next_session: SERVER_SESSION + 1,
            max_sessions,
            timeout,
        }
    }

    /// Returns the session for `addr`, creating it if needed. The flag is
    /// true when the session is new.
    pub fn admit(
        &mut self,
        addr: SocketAddr,
        player_name: &str,
        blueprint: &str,
    ) -> Result<(SessionId, bool), AdmitError> {
        if let Some(&session_id) = self.by_addr.get(&addr) {
            return Ok((session_id, false));
        }
        if self.sessions.len() >= self.max_sessions {
            return Err(AdmitError::ServerFull);
        }

        let session_id = self.next_session;
        self.next_session += 1;
        self.sessions.insert(
            session_id,
            PeerSession::new(addr, session_id, player_name.to_string(), blueprint.to_string()),
        );
        self.by_addr.insert(addr, session_id);
        Ok((session_id, true))
    }

    pub fn session_for(&self, addr: &SocketAddr) -> Option<SessionId> {
        self.by_addr.get(addr).copied()
    }

    pub fn get(&self, session_id: SessionId) -> Option<&PeerSession> {
        self.sessions.get(&session_id)
    }

    pub fn get_mut(&mut self, session_id: SessionId) -> Option<&mut PeerSession> {
        self.sessions.get_mut(&session_id)
    }

    pub fn remove(&mut self, session_id: SessionId) -> Option<PeerSession> {
        let peer = self.sessions.remove(&session_id)?;
        self.by_addr.remove(&peer.addr);
        Some(peer)
    }

    pub fn expire(&mut self) -> Vec<PeerSession> {
        let timed_out: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|peer| peer.is_timed_out(self.timeout))
            .map(|peer| peer.session_id)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerSession> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

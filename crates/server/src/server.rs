use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use glam::Vec3;
use log::{debug, trace};

use shellnet::net::{NetworkStats, PacketType, SessionTable, SyncMessage, UdpEndpoint};
use shellnet::sync::{Route, SpawnSpec};
use shellnet::{
    BlueprintRegistry, NetworkMode, Packet, Replicator, SERVER_SESSION, Session, SessionId,
};

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};

pub struct GameServer {
    endpoint: UdpEndpoint,
    sessions: SessionTable,
    replicator: Replicator,
    config: ServerConfig,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    pending_events: VecDeque<ServerEvent>,
}

impl GameServer {
    pub fn new(config: ServerConfig, blueprints: BlueprintRegistry) -> Result<Self> {
        let bind_addr = config.bind_addr();
        let endpoint =
            UdpEndpoint::bind(&bind_addr).with_context(|| format!("binding {bind_addr}"))?;
        let tick_duration = Duration::from_secs_f64(1.0 / config.sync.tick_rate.max(1) as f64);

        let mut replicator = Replicator::new(
            Session::new(NetworkMode::Server, SERVER_SESSION, config.faction_count),
            blueprints,
            config.sync.clone(),
        );
        for npc in &config.npcs {
            replicator
                .spawn(SERVER_SESSION, npc.spawn_spec())
                .with_context(|| format!("spawning npc `{}`", npc.id))?;
        }

        Ok(Self {
            endpoint,
            sessions: SessionTable::new(
                config.max_sessions,
                Duration::from_secs(config.session_timeout_secs),
            ),
            replicator,
            tick_duration,
            last_tick_time: Instant::now(),
            accumulator: Duration::ZERO,
            pending_events: VecDeque::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn shutdown_connections(&mut self) {
        let sessions: Vec<SessionId> = self.sessions.iter().map(|s| s.session_id).collect();
        for session in sessions {
            if let Some(peer) = self.sessions.get(session) {
                let addr = peer.addr;
                let _ = self.endpoint.send_payload(PacketType::Disconnect, addr);
            }
            self.drop_session(session, DisconnectReason::Shutdown);
        }
        self.flush_outbox();
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.accumulator += delta;

        if let Err(e) = self.process_network() {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("Network error: {e:#}"),
            });
        }

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.tick();
        }
    }

    fn tick(&mut self) {
        self.replicator.tick();
        self.flush_outbox();

        for peer in self.sessions.expire() {
            self.release(peer.session_id, DisconnectReason::Timeout);
        }
        self.flush_outbox();
    }

    fn flush_outbox(&mut self) {
        for (route, message) in self.replicator.drain_outbox() {
            let targets: Vec<SocketAddr> = match route {
                Route::Broadcast => self.sessions.iter().map(|s| s.addr).collect(),
                Route::Session(session) => {
                    self.sessions.get(session).map(|s| s.addr).into_iter().collect()
                }
                Route::Authority => {
                    trace!("authority-bound message left in outbox: {message:?}");
                    continue;
                }
            };
            for addr in targets {
                if let Err(e) = self
                    .endpoint
                    .send_payload(PacketType::Sync(message.clone()), addr)
                {
                    self.pending_events.push_back(ServerEvent::Error {
                        message: format!("Failed to send to {addr}: {e}"),
                    });
                }
            }
        }
    }

    fn process_network(&mut self) -> Result<()> {
        let packets = self.endpoint.receive()?;

        for (packet, addr) in packets {
            self.handle_packet(packet, addr)?;
        }
        self.flush_outbox();

        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) -> Result<()> {
        let sequence = packet.header.sequence;
        match packet.payload {
            PacketType::ConnectionRequest {
                player_name,
                blueprint,
            } => {
                self.handle_connection_request(addr, &player_name, &blueprint)?;
            }
            PacketType::Sync(message) => {
                self.handle_sync(addr, sequence, message);
            }
            PacketType::Ping { timestamp } => {
                self.endpoint
                    .send_payload(PacketType::Pong { timestamp }, addr)?;
            }
            PacketType::Disconnect => {
                if let Some(session) = self.sessions.session_for(&addr) {
                    self.drop_session(session, DisconnectReason::Graceful);
                }
            }
            other => debug!("ignored {other:?} from {addr}"),
        }

        if let Some(session) = self.sessions.session_for(&addr) {
            if let Some(peer) = self.sessions.get_mut(session) {
                peer.touch();
            }
        }

        Ok(())
    }

    fn handle_connection_request(
        &mut self,
        addr: SocketAddr,
        player_name: &str,
        blueprint: &str,
    ) -> Result<()> {
        self.pending_events
            .push_back(ServerEvent::ClientConnecting { addr });

        let (session, new) = match self.sessions.admit(addr, player_name, blueprint) {
            Ok(admitted) => admitted,
            Err(reason) => {
                self.endpoint.send_payload(
                    PacketType::ConnectionDenied {
                        reason: reason.to_string(),
                    },
                    addr,
                )?;
                self.pending_events.push_back(ServerEvent::ConnectionDenied {
                    addr,
                    reason: reason.to_string(),
                });
                return Ok(());
            }
        };

        // Accepted goes out ahead of the catch-up burst.
        self.endpoint.send_payload(
            PacketType::ConnectionAccepted {
                session_id: session,
                faction_count: self.config.faction_count,
            },
            addr,
        )?;
        if !new {
            // The first reply may have been lost; resend the catch-up.
            debug!("session {session} repeated its connection request");
            self.replicator.session_joined(session, None)?;
            return Ok(());
        }

        let blueprint = if self.replicator.blueprints().contains(blueprint) {
            blueprint
        } else {
            debug!("session {session} asked for unknown blueprint `{blueprint}`");
            self.config.default_blueprint.as_str()
        };
        let spec = SpawnSpec::player(
            blueprint,
            player_name,
            Vec3::from(self.config.spawn_point),
        );
        let player = self.replicator.session_joined(session, Some(spec))?;
        if let Some(peer) = self.sessions.get_mut(session) {
            peer.player = player;
        }
        self.pending_events.push_back(ServerEvent::ClientConnected {
            session,
            addr,
            player,
        });
        Ok(())
    }

    fn handle_sync(&mut self, addr: SocketAddr, sequence: u32, message: SyncMessage) {
        let Some(session) = self.sessions.session_for(&addr) else {
            trace!("sync message from unknown peer {addr}");
            return;
        };
        let fresh = self
            .sessions
            .get_mut(session)
            .is_some_and(|peer| peer.accept_sequence(sequence));
        if !fresh {
            trace!("stale sequence {sequence} from session {session}");
            return;
        }
        self.replicator.receive(session, message);
    }

    fn drop_session(&mut self, session: SessionId, reason: DisconnectReason) {
        if self.sessions.remove(session).is_some() {
            self.release(session, reason);
        }
    }

    fn release(&mut self, session: SessionId, reason: DisconnectReason) {
        match self.replicator.session_left(session) {
            Ok(released) => self.pending_events.push_back(ServerEvent::ClientDisconnected {
                session,
                reason,
                released,
            }),
            Err(e) => self.pending_events.push_back(ServerEvent::Error {
                message: format!("Failed to release session {session}: {e}"),
            }),
        }
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            tick: self.replicator.tick_count(),
            session_count: self.sessions.len(),
            max_sessions: self.config.max_sessions,
            adapter_count: self.replicator.adapter_count(),
            entity_count: self.replicator.world().entity_count(),
            network_stats: self.endpoint.stats().clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub tick: u64,
    pub session_count: usize,
    pub max_sessions: usize,
    pub adapter_count: usize,
    pub entity_count: usize,
    pub network_stats: NetworkStats,
}

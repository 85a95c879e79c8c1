use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use glam::Vec3;
use log::{debug, info, trace, warn};

use shellnet::net::{NetworkStats, PacketType, UdpEndpoint};
use shellnet::sync::Route;
use shellnet::{BlueprintRegistry, NetworkMode, Replicator, SERVER_SESSION, Session};

use crate::config::ObserverConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct ObserverClient {
    endpoint: UdpEndpoint,
    config: ObserverConfig,
    blueprints: BlueprintRegistry,
    state: ConnectionState,
    replicator: Option<Replicator>,
    started: Instant,
    connection_start_time: Option<Instant>,
    last_request_time: Instant,
    last_receive_time: Instant,
    last_ping_time: Instant,
    last_tick_time: Instant,
    accumulator: Duration,
    tick_duration: Duration,
    steered: bool,
}

impl ObserverClient {
    pub fn new(config: ObserverConfig, blueprints: BlueprintRegistry) -> io::Result<Self> {
        let endpoint = UdpEndpoint::bind("0.0.0.0:0")?;
        let tick_duration = Duration::from_secs_f64(1.0 / config.sync.tick_rate.max(1) as f64);
        let now = Instant::now();

        Ok(Self {
            endpoint,
            config,
            blueprints,
            state: ConnectionState::Disconnected,
            replicator: None,
            started: now,
            connection_start_time: None,
            last_request_time: now,
            last_receive_time: now,
            last_ping_time: now,
            last_tick_time: now,
            accumulator: Duration::ZERO,
            tick_duration,
            steered: false,
        })
    }

    pub fn connect(&mut self) -> io::Result<()> {
        info!("Connecting to {}", self.config.server);
        self.state = ConnectionState::Connecting;
        self.connection_start_time = Some(Instant::now());
        self.send_connection_request()
    }

    pub fn disconnect(&mut self) -> io::Result<()> {
        if self.state == ConnectionState::Connected {
            self.endpoint
                .send_payload(PacketType::Disconnect, self.config.server)?;
        }
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    fn send_connection_request(&mut self) -> io::Result<()> {
        self.last_request_time = Instant::now();
        self.endpoint.send_payload(
            PacketType::ConnectionRequest {
                player_name: self.config.player_name.clone(),
                blueprint: self.config.blueprint.clone(),
            },
            self.config.server,
        )?;
        Ok(())
    }

    pub fn update(&mut self) -> io::Result<()> {
        self.process_network()?;

        match self.state {
            ConnectionState::Connecting => {
                if let Some(start) = self.connection_start_time {
                    if start.elapsed() > self.config.connection_timeout {
                        warn!("Connection timeout");
                        self.state = ConnectionState::Disconnected;
                        return Ok(());
                    }
                }
                if self.last_request_time.elapsed() >= self.config.request_interval {
                    self.send_connection_request()?;
                }
            }
            ConnectionState::Connected => {
                let now = Instant::now();
                self.accumulator += now - self.last_tick_time;
                self.last_tick_time = now;
                while self.accumulator >= self.tick_duration {
                    self.accumulator -= self.tick_duration;
                    if let Some(replicator) = self.replicator.as_mut() {
                        replicator.tick();
                    }
                }
                self.steer();
                self.flush_outbox()?;

                if self.last_ping_time.elapsed() >= self.config.ping_interval {
                    self.send_ping()?;
                }
                if self.last_receive_time.elapsed() > self.config.connection_timeout {
                    warn!("Server connection lost");
                    self.state = ConnectionState::Disconnected;
                }
            }
            ConnectionState::Disconnected => {}
        }

        Ok(())
    }

    fn steer(&mut self) {
        let Some(degrees) = self.config.heading else {
            return;
        };
        if self.steered {
            return;
        }
        let Some(replicator) = self.replicator.as_mut() else {
            return;
        };
        let Some(player) = replicator.player_of(replicator.local_session_id()) else {
            return;
        };
        if replicator.adapter(player).and_then(|a| a.husk()).is_none() {
            return;
        }
        let radians = degrees.to_radians();
        let direction = Vec3::new(radians.cos(), radians.sin(), 0.0);
        if replicator.request_direction(player, direction).is_ok() {
            info!("Steering net id {player} toward {degrees} degrees");
            self.steered = true;
        }
    }

    fn flush_outbox(&mut self) -> io::Result<()> {
        let Some(replicator) = self.replicator.as_mut() else {
            return Ok(());
        };
        for (route, message) in replicator.drain_outbox() {
            if route != Route::Authority {
                trace!("observer dropped {route:?} message {message:?}");
                continue;
            }
            self.endpoint
                .send_payload(PacketType::Sync(message), self.config.server)?;
        }
        Ok(())
    }

    fn timestamp_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn send_ping(&mut self) -> io::Result<()> {
        self.last_ping_time = Instant::now();
        let timestamp = self.timestamp_ms();
        self.endpoint
            .send_payload(PacketType::Ping { timestamp }, self.config.server)?;
        Ok(())
    }

    fn process_network(&mut self) -> io::Result<()> {
        let packets = self.endpoint.receive()?;

        for (packet, addr) in packets {
            if addr != self.config.server {
                trace!("ignored packet from {addr}");
                continue;
            }
            self.last_receive_time = Instant::now();
            self.handle_payload(packet.payload);
        }

        Ok(())
    }

    fn handle_payload(&mut self, payload: PacketType) {
        match payload {
            PacketType::ConnectionAccepted {
                session_id,
                faction_count,
            } => self.handle_connection_accepted(session_id, faction_count),
            PacketType::ConnectionDenied { reason } => {
                warn!("Connection denied: {reason}");
                self.state = ConnectionState::Disconnected;
            }
            PacketType::Sync(message) => match self.replicator.as_mut() {
                Some(replicator) => replicator.receive(SERVER_SESSION, message),
                None => trace!("sync message before handshake: {message:?}"),
            },
            PacketType::Pong { timestamp } => {
                let rtt = self.timestamp_ms().saturating_sub(timestamp);
                debug!("Ping RTT: {rtt} ms");
                self.endpoint.stats_mut().record_rtt(rtt as f32);
            }
            PacketType::Disconnect => {
                info!("Disconnected by server");
                self.state = ConnectionState::Disconnected;
            }
            other => debug!("ignored {other:?}"),
        }
    }

    fn handle_connection_accepted(&mut self, session_id: u64, faction_count: i32) {
        if self.state == ConnectionState::Connected {
            return;
        }
        info!("Connected to server as session {session_id}");
        self.replicator = Some(Replicator::new(
            Session::new(NetworkMode::Client, session_id, faction_count),
            self.blueprints.clone(),
            self.config.sync.clone(),
        ));
        self.state = ConnectionState::Connected;
        self.last_tick_time = Instant::now();
        self.accumulator = Duration::ZERO;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn replicator(&self) -> Option<&Replicator> {
        self.replicator.as_ref()
    }

    pub fn stats(&self) -> &NetworkStats {
        self.endpoint.stats()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }
}

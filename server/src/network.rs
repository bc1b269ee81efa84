//! Server network layer handling UDP communications and tick coordination

use crate::client_manager::{ClientManager, InputState};
use crate::game::{World, SPAWN_LAYER};
use crate::snapshot::build_snapshot;
use crate::streamer::sweep_unobserved;
use crate::world::WorldStore;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use rand::Rng;
use shared::{now_millis, Packet, SNAPSHOT_EVERY_TICKS};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Protocol version clients must present on connect.
pub const PROTOCOL_VERSION: u32 = 1;

/// Inactivity window after which a client is dropped server-side.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Period of the chunk unload sweep. Deliberately much slower than the tick
/// so chunks are not churned when a player walks along a chunk border.
const SWEEP_PERIOD: Duration = Duration::from_secs(5);

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    /// A client the timeout checker already removed; the main loop still
    /// owns despawning its player object.
    ClientTimeout {
        client_id: u32,
        object_id: u64,
        layer: i32,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from the tick loop to the network sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// Main server coordinating networking, simulation and world streaming
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    world: World,
    tick_duration: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        data_dir: &Path,
        seed: u64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", addr);

        let store = WorldStore::new(data_dir)?;
        let world = World::new(store, seed);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            world,
            tick_duration,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 65536];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    async fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(CLIENT_TIMEOUT)
                };

                for client in timed_out {
                    warn!("Client {} timed out", client.id);
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout {
                        client_id: client.id,
                        object_id: client.object_id,
                        layer: client.layer,
                    }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn queue_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Processes incoming packets, updating clients and the world
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect {
                client_version,
                username,
            } => {
                info!(
                    "Client '{}' connecting from {} (version: {})",
                    username, addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    let response = Packet::Disconnected {
                        reason: "Protocol version mismatch".to_string(),
                    };
                    self.queue_packet(response, addr);
                    return;
                }

                // Remove existing connection if present (reconnect case)
                let existing = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };
                if let Some(existing_id) = existing {
                    info!("Removing existing client {} from {}", existing_id, addr);
                    let removed = {
                        let mut clients = self.clients.write().await;
                        clients.remove_client(&existing_id)
                    };
                    if let Some(client) = removed {
                        self.world.despawn_player(client.layer, client.object_id);
                    }
                }

                // Register first so the id exists, then spawn the object and
                // patch the registration with the spawned id.
                let client_id = {
                    let mut clients = self.clients.write().await;
                    clients.add_client(addr, 0, SPAWN_LAYER)
                };

                match client_id {
                    Some(client_id) => {
                        let color = rand::thread_rng().gen_range(0..0x00ff_ffff);
                        let (object_id, x, y) = self.world.spawn_player(client_id, username, color);

                        let mut clients = self.clients.write().await;
                        if let Some(client) = clients.get_mut(client_id) {
                            client.object_id = object_id;
                        }

                        let response = Packet::Connected {
                            client_id,
                            object_id,
                            layer: SPAWN_LAYER,
                            x,
                            y,
                        };
                        self.queue_packet(response, addr);
                    }
                    None => {
                        let response = Packet::Disconnected {
                            reason: "Server full".to_string(),
                        };
                        self.queue_packet(response, addr);
                    }
                }
            }

            Packet::Input {
                sequence,
                timestamp,
                dir,
                dx,
                dy,
                last_snapshot_ack,
            } => {
                let client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };

                if let Some(client_id) = client_id {
                    let input = InputState {
                        sequence,
                        timestamp,
                        dir,
                        dx,
                        dy,
                        last_snapshot_ack,
                    };

                    let mut clients = self.clients.write().await;
                    clients.add_input(client_id, input);
                }
            }

            Packet::Disconnect => {
                let client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };

                if let Some(client_id) = client_id {
                    let removed = {
                        let mut clients = self.clients.write().await;
                        clients.remove_client(&client_id)
                    };
                    if let Some(client) = removed {
                        self.world.despawn_player(client.layer, client.object_id);
                    }
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Applies all buffered inputs across clients in timestamp order
    async fn process_inputs(&mut self) {
        let all_inputs = {
            let clients = self.clients.read().await;
            clients.get_chronological_inputs()
        };

        if all_inputs.is_empty() {
            return;
        }

        let now = now_millis();
        let mut clients = self.clients.write().await;
        for (client_id, input) in all_inputs {
            if let Some(client) = clients.get_mut(client_id) {
                self.world.apply_input(client, &input, now);
            }
            clients.mark_input_processed(client_id, input.sequence, input.timestamp);
        }
        clients.cleanup_processed_inputs();
    }

    /// Builds and queues one snapshot per connected client, then performs
    /// the single per-tick mutation reset.
    async fn send_snapshots(&mut self) {
        let mut clients = self.clients.write().await;
        if clients.is_empty() {
            return;
        }

        // Take the timestamp as close to transmission as possible.
        let now = now_millis();

        for client_id in clients.client_ids() {
            if let Some(client) = clients.get_mut(client_id) {
                let addr = client.addr;
                if let Some(snapshot) = build_snapshot(&mut self.world, client, now) {
                    self.queue_packet(Packet::Snapshot(Box::new(snapshot)), addr);
                }
            }
        }
        drop(clients);

        // Every observer has consumed this tick's cell deltas by now.
        self.world.reset_mutations();
    }

    /// Evicts chunks no observer window covers. Runs between ticks on its
    /// own timer, never interleaved with snapshot building.
    async fn sweep_chunks(&mut self) {
        let clients = self.clients.read().await;
        let store = self.world.store.clone();
        for layer in self.world.layers.values_mut() {
            let observers = clients.observer_windows(layer.z);
            sweep_unobserved(layer, &store, &observers);
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut tick_interval = interval(self.tick_duration);
        let mut sweep_interval = interval(SWEEP_PERIOD);
        let mut last_tick = Instant::now();

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id, object_id, layer }) => {
                            info!("Despawning player of timed-out client {}", client_id);
                            self.world.despawn_player(layer, object_id);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            break;
                        }
                    }
                },

                // Handle server tick events
                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    self.process_inputs().await;
                    self.world.step(dt);

                    if self.world.tick % SNAPSHOT_EVERY_TICKS == 0 {
                        self.send_snapshots().await;
                    }

                    // Periodic health logging
                    if self.world.tick % 600 == 0 {
                        let client_count = {
                            let clients = self.clients.read().await;
                            clients.len()
                        };
                        let resident: usize =
                            self.world.layers.values().map(|l| l.loaded_count()).sum();
                        debug!(
                            "Tick {}: {} clients, {} resident chunks, {:.1}Hz",
                            self.world.tick, client_count, resident, 1.0 / dt
                        );
                    }
                },

                // Unload sweep, strictly between ticks
                _ = sweep_interval.tick() => {
                    self.sweep_chunks().await;
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, shutting down");
                    break;
                },
            }
        }

        info!("Persisting world before exit");
        self.world.save_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    #[test]
    fn test_server_message_creation() {
        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
            username: "ada".to_string(),
        };
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);

        let msg = ServerMessage::PacketReceived {
            packet: packet.clone(),
            addr,
        };

        match msg {
            ServerMessage::PacketReceived { packet: p, addr: a } => {
                assert_eq!(a, addr);
                match p {
                    Packet::Connect { username, .. } => assert_eq!(username, "ada"),
                    _ => panic!("Unexpected packet type"),
                }
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_timeout_message_carries_despawn_info() {
        let msg = ServerMessage::ClientTimeout {
            client_id: 42,
            object_id: 7,
            layer: -1,
        };

        match msg {
            ServerMessage::ClientTimeout {
                client_id,
                object_id,
                layer,
            } => {
                assert_eq!(client_id, 42);
                assert_eq!(object_id, 7);
                assert_eq!(layer, -1);
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_channel_communication() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

        let packet = Packet::Disconnect;
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);
        assert!(tx
            .send(ServerMessage::PacketReceived { packet, addr })
            .is_ok());

        match rx.try_recv() {
            Ok(ServerMessage::PacketReceived { packet: p, addr: a }) => {
                assert_eq!(a, addr);
                assert!(matches!(p, Packet::Disconnect));
            }
            _ => panic!("Unexpected message"),
        }
    }

    #[test]
    fn test_packet_serialization_roundtrip() {
        let test_packets = vec![
            Packet::Connect {
                client_version: PROTOCOL_VERSION,
                username: "ada".to_string(),
            },
            Packet::Connected {
                client_id: 42,
                object_id: 7,
                layer: 0,
                x: 4.0,
                y: 9.0,
            },
            Packet::Disconnect,
            Packet::Disconnected {
                reason: "Test".to_string(),
            },
            Packet::Input {
                sequence: 100,
                timestamp: 1234567890,
                dir: 1.5,
                dx: 0.2,
                dy: -0.1,
                last_snapshot_ack: 99,
            },
        ];

        for packet in test_packets {
            let serialized = serialize(&packet).unwrap();
            let deserialized: Packet = deserialize(&serialized).unwrap();
            assert_eq!(deserialized, packet);
        }
    }

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let dir = TempDir::new().unwrap();
        let server = Server::new(
            "127.0.0.1:0",
            Duration::from_millis(50),
            8,
            dir.path(),
            1,
        )
        .await;
        assert!(server.is_ok());
    }

    #[test]
    fn test_address_validation() {
        let valid_addrs = vec!["127.0.0.1:8080", "0.0.0.0:0", "[::1]:8080"];
        for addr_str in valid_addrs {
            assert!(addr_str.parse::<SocketAddr>().is_ok());
        }

        let invalid_addrs = vec!["invalid", "127.0.0.1:99999", ""];
        for addr_str in invalid_addrs {
            assert!(addr_str.parse::<SocketAddr>().is_err());
        }
    }
}

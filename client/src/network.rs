//! Client network loop: connect, send inputs, fold in snapshots.

use crate::game::{ClientGameState, PendingInput};
use crate::input::InputGenerator;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{now_millis, Packet};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    username: String,
    game_state: Option<ClientGameState>,
    input_generator: InputGenerator,

    /// Artificial one-way latency added to every send and receive, for
    /// exercising prediction and playback under lab conditions.
    fake_ping_ms: u64,
    render_delay_ms: u64,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        username: String,
        fake_ping_ms: u64,
        render_delay_ms: u64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            username,
            game_state: None,
            input_generator: InputGenerator::new(),
            fake_ping_ms,
            render_delay_ms,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.game_state.is_some()
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to {} as '{}'", self.server_addr, self.username);

        let packet = Packet::Connect {
            client_version: 1,
            username: self.username.clone(),
        };
        self.send_packet(&packet).await
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Connected {
                client_id,
                object_id,
                layer,
                x,
                y,
            } => {
                info!(
                    "Connected as client {} (object {}) at ({:.1}, {:.1}) on layer {}",
                    client_id, object_id, x, y, layer
                );
                self.game_state = Some(ClientGameState::new(
                    client_id,
                    object_id,
                    layer,
                    x,
                    y,
                    self.render_delay_ms,
                ));
            }

            Packet::Snapshot(snapshot) => {
                if let Some(game_state) = &mut self.game_state {
                    game_state.apply_snapshot(&snapshot, now_millis());
                } else {
                    warn!("Snapshot before Connected, ignoring");
                }
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected by server: {}", reason);
                self.game_state = None;
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }
    }

    async fn send_pending_input(&mut self) {
        let Some(input) = self.input_generator.poll() else {
            return;
        };
        let Some(game_state) = &mut self.game_state else {
            return;
        };

        let packet = Packet::Input {
            sequence: input.sequence,
            timestamp: input.timestamp,
            dir: input.dir,
            dx: input.dx,
            dy: input.dy,
            last_snapshot_ack: game_state.last_snapshot_tick,
        };

        game_state.predict(PendingInput {
            sequence: input.sequence,
            dx: input.dx,
            dy: input.dy,
            dir: input.dir,
        });

        if let Err(e) = self.send_packet(&packet).await {
            error!("Error sending input: {}", e);
        }
    }

    /// Render-tick stand-in: samples the interpolated scene and logs it.
    fn log_status(&self) {
        let Some(game_state) = &self.game_state else {
            return;
        };
        let now = now_millis();
        let players = game_state.render_players(now);
        let entities = game_state.render_entities(now);
        let lost = if game_state.connection_lost(now) {
            " [CONNECTION LOST]"
        } else {
            ""
        };
        info!(
            "pos ({:.1}, {:.1}) ping {}ms, {} chunks, {} players, {} entities, {} pending inputs{}",
            game_state.predicted.x,
            game_state.predicted.y,
            game_state.ping_ms,
            game_state.world.loaded_count(),
            players.len(),
            entities.len(),
            game_state.pending_input_count(),
            lost
        );
        for player in &players {
            debug!(
                "  {} at ({:.1}, {:.1}) heading {:.2}",
                player.username, player.state.x, player.state.y, player.state.dir
            );
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut input_interval = interval(Duration::from_millis(10));
        let mut status_interval = interval(Duration::from_secs(2));
        let mut buffer = vec![0u8; 65536];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match deserialize::<Packet>(&buffer[0..len]) {
                                Ok(packet) => self.handle_packet(packet).await,
                                Err(e) => warn!("Malformed packet from server: {}", e),
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = input_interval.tick() => {
                    self.send_pending_input().await;
                },

                _ = status_interval.tick() => {
                    self.log_status();
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, disconnecting");
                    break;
                },
            }
        }

        if self.is_connected() {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_binds_and_targets_server() {
        let client = Client::new("127.0.0.1:8080", "ada".to_string(), 0, 100).await;
        assert!(client.is_ok());
        assert!(!client.unwrap().is_connected());
    }

    #[tokio::test]
    async fn test_bad_address_rejected() {
        let client = Client::new("not-an-address", "ada".to_string(), 0, 100).await;
        assert!(client.is_err());
    }

    #[tokio::test]
    async fn test_connected_packet_initializes_state() {
        let mut client = Client::new("127.0.0.1:8080", "ada".to_string(), 0, 100)
            .await
            .unwrap();

        client
            .handle_packet(Packet::Connected {
                client_id: 3,
                object_id: 12,
                layer: 0,
                x: 4.0,
                y: 9.0,
            })
            .await;

        assert!(client.is_connected());
        let state = client.game_state.as_ref().unwrap();
        assert_eq!(state.client_id, 3);
        assert_eq!(state.object_id, 12);
        assert_eq!(state.predicted.x, 4.0);
    }

    #[tokio::test]
    async fn test_disconnected_packet_clears_state() {
        let mut client = Client::new("127.0.0.1:8080", "ada".to_string(), 0, 100)
            .await
            .unwrap();
        client
            .handle_packet(Packet::Connected {
                client_id: 3,
                object_id: 12,
                layer: 0,
                x: 0.0,
                y: 0.0,
            })
            .await;
        client
            .handle_packet(Packet::Disconnected {
                reason: "Server full".to_string(),
            })
            .await;
        assert!(!client.is_connected());
    }
}

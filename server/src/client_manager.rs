//! Client connection management and input queuing for the streaming server
//!
//! This module handles the server-side management of connected clients,
//! including:
//! - Client connection lifecycle (connect, disconnect, timeout)
//! - Input buffering and chronological ordering for deterministic simulation
//! - Per-client streaming state: the chunk window sent last snapshot and the
//!   queue of pending one-time corrections
//! - Connection health monitoring and automatic cleanup
//!
//! The client manager ensures reliable input processing and maintains
//! authoritative control over which clients are allowed to participate.

use log::info;
use shared::{Correction, PlayerMode};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// One reported displacement for one input tick.
#[derive(Debug, Clone)]
pub struct InputState {
    pub sequence: u32,
    pub timestamp: u64,
    pub dir: f32,
    pub dx: f32,
    pub dy: f32,
    pub last_snapshot_ack: u32,
}

/// Represents a connected client and their streaming/input state
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// Highest input sequence number we've processed
    pub last_processed_input: u32,
    /// Timestamp of the last applied input, for displacement validation
    pub last_input_timestamp: u64,
    /// Server time the first input was applied; baseline of the time credit
    pub input_credit_start: Option<u64>,
    /// Total milliseconds of movement time credited so far
    pub credited_input_ms: u64,
    /// Buffered inputs waiting to be processed
    pub pending_inputs: Vec<InputState>,
    /// Id of the player's simulated object
    pub object_id: u64,
    /// Layer the player currently occupies
    pub layer: i32,
    /// Chunk window center sent with the previous snapshot, if any
    pub last_window: Option<(i32, i32)>,
    /// Newest snapshot tick the client has acknowledged
    pub last_snapshot_ack: u32,
    /// Pending one-time corrections, drained into the next snapshot
    corrections: Vec<Correction>,
    /// Monotone sequence for corrections on this connection
    next_correction_seq: u64,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr, object_id: u64, layer: i32) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            last_processed_input: 0,
            last_input_timestamp: 0,
            input_credit_start: None,
            credited_input_ms: 0,
            pending_inputs: Vec::new(),
            object_id,
            layer,
            last_window: None,
            last_snapshot_ack: 0,
            corrections: Vec::new(),
            next_correction_seq: 1,
        }
    }

    /// Adds a new input to the client's pending queue
    ///
    /// Updates the client's last seen time and keeps the buffer in sequence
    /// order, so inputs are processed chronologically even if datagrams
    /// arrive out of order.
    pub fn add_input(&mut self, input: InputState) {
        self.last_seen = Instant::now();
        self.last_snapshot_ack = self.last_snapshot_ack.max(input.last_snapshot_ack);
        self.pending_inputs.push(input);
        self.pending_inputs.sort_by_key(|i| i.sequence);
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_correction_seq;
        self.next_correction_seq += 1;
        seq
    }

    /// Queues an authoritative position snap.
    pub fn queue_set_position(&mut self, x: f32, y: f32) {
        let seq = self.next_seq();
        self.corrections.push(Correction::SetPosition { seq, x, y });
    }

    /// Queues a physics push vector (produced by the out-of-scope collision
    /// resolver, consumed here as opaque).
    pub fn queue_push(&mut self, dx: f32, dy: f32) {
        let seq = self.next_seq();
        self.corrections.push(Correction::Push { seq, dx, dy });
    }

    pub fn queue_set_color(&mut self, color: u32) {
        let seq = self.next_seq();
        self.corrections.push(Correction::SetColor { seq, color });
    }

    pub fn queue_set_mode(&mut self, mode: PlayerMode) {
        let seq = self.next_seq();
        self.corrections.push(Correction::SetMode { seq, mode });
    }

    /// Drains the correction queue into the outgoing snapshot. Each
    /// correction leaves the queue exactly once.
    pub fn drain_corrections(&mut self) -> Vec<Correction> {
        std::mem::take(&mut self.corrections)
    }

    pub fn pending_correction_count(&self) -> usize {
        self.corrections.len()
    }
}

/// Manages all connected clients and their input processing
///
/// Enforces server capacity limits and keeps input processing deterministic
/// by merging all clients' inputs into one chronological stream per tick.
pub struct ClientManager {
    clients: HashMap<u32, Client>,
    next_client_id: u32,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Attempts to add a new client connection
    ///
    /// Returns Some(client_id) if successful, None if server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr, object_id: u64, layer: i32) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        let client = Client::new(client_id, addr, object_id, layer);
        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, client);

        Some(client_id)
    }

    /// Removes a client, tearing down its per-tick registration. Returns the
    /// removed entry so the caller can despawn the player object.
    pub fn remove_client(&mut self, client_id: &u32) -> Option<Client> {
        let removed = self.clients.remove(client_id);
        if let Some(client) = &removed {
            info!("Client {} disconnected", client.id);
        }
        removed
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn get(&self, client_id: u32) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: u32) -> Option<&mut Client> {
        self.clients.get_mut(&client_id)
    }

    pub fn add_input(&mut self, client_id: u32, input: InputState) -> bool {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.add_input(input);
            true
        } else {
            false
        }
    }

    /// Gets all unprocessed inputs sorted chronologically
    ///
    /// Merges unprocessed inputs across clients, ordered by client
    /// timestamp, for deterministic application within one tick.
    pub fn get_chronological_inputs(&self) -> Vec<(u32, InputState)> {
        let mut all_inputs: Vec<(u32, InputState)> = Vec::new();

        for (client_id, client) in &self.clients {
            for input in &client.pending_inputs {
                if input.sequence > client.last_processed_input {
                    all_inputs.push((*client_id, input.clone()));
                }
            }
        }

        all_inputs.sort_by_key(|(_, input)| input.timestamp);
        all_inputs
    }

    pub fn mark_input_processed(&mut self, client_id: u32, sequence: u32, timestamp: u64) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_processed_input = client.last_processed_input.max(sequence);
            client.last_input_timestamp = client.last_input_timestamp.max(timestamp);
        }
    }

    /// Removes inputs that have been processed from all client buffers
    pub fn cleanup_processed_inputs(&mut self) {
        for client in self.clients.values_mut() {
            client
                .pending_inputs
                .retain(|input| input.sequence > client.last_processed_input);
        }
    }

    /// Checks for and removes timed-out clients, returning the removed
    /// entries so the caller can despawn their player objects.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<Client> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        timed_out
            .iter()
            .filter_map(|id| self.remove_client(id))
            .collect()
    }

    pub fn client_ids(&self) -> Vec<u32> {
        self.clients.keys().copied().collect()
    }

    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    /// Window centers of every client on the given layer, for the unload
    /// sweep's union computation. Clients without a sent window yet do not
    /// pin any chunks.
    pub fn observer_windows(&self, layer: i32) -> Vec<(i32, i32)> {
        self.clients
            .values()
            .filter(|c| c.layer == layer)
            .filter_map(|c| c.last_window)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

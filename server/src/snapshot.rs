//! Per-player snapshot composition.
//!
//! Once per send tick, each connected player gets one self-contained
//! `Snapshot`: their own state, the drained one-time corrections, every
//! player and entity within the view rectangle, and the chunk window diff.

use crate::client_manager::Client;
use crate::entity_index::{ObjectKind, SimObject};
use crate::game::World;
use crate::streamer::stream_world;
use log::debug;
use shared::{chunk_of, PlayerState, Snapshot, VIEW_HALF_HEIGHT, VIEW_HALF_WIDTH};

fn player_state(object: &SimObject) -> Option<PlayerState> {
    match &object.kind {
        ObjectKind::Player {
            client_id,
            username,
            color,
            ..
        } => Some(PlayerState {
            id: *client_id,
            username: username.clone(),
            color: *color,
            dynamic: object.dynamic(),
        }),
        _ => None,
    }
}

/// Builds the snapshot for one player, advancing their streaming window.
///
/// Returns `None` when the player's object is gone (despawned mid-tick);
/// the caller skips the send and the disconnect path cleans up.
pub fn build_snapshot(world: &mut World, client: &mut Client, now: u64) -> Option<Snapshot> {
    let store = world.store.clone();
    let layer = world.layers.get_mut(&client.layer)?;
    let me_object = layer.objects.get(client.object_id)?.clone();
    let me = player_state(&me_object)?;

    let center = chunk_of(me_object.x, me_object.y);
    let world_load = stream_world(layer, &store, client.last_window, center);
    client.last_window = Some(center);

    let mut others = Vec::new();
    let mut entities = Vec::new();
    for object in layer
        .objects
        .nearby(me_object.x, me_object.y, VIEW_HALF_WIDTH, VIEW_HALF_HEIGHT)
    {
        if object.id == client.object_id {
            continue;
        }
        if let Some(state) = player_state(object) {
            others.push(state);
        } else if let Some(state) = object.entity_state() {
            entities.push(state);
        }
    }

    let corrections = client.drain_corrections();
    if !corrections.is_empty() {
        debug!(
            "Snapshot for client {} carries {} corrections",
            client.id,
            corrections.len()
        );
    }

    Some(Snapshot {
        t: now,
        tick: world.tick,
        last_processed_input: client.last_processed_input,
        me,
        corrections,
        others,
        entities,
        world: world_load,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::WorldStore;
    use shared::PlayerMode;
    use std::net::SocketAddr;
    use tempfile::TempDir;

    fn setup() -> (TempDir, World, Client) {
        let dir = TempDir::new().unwrap();
        let store = WorldStore::new(dir.path()).unwrap();
        let mut world = World::new(store, 5);
        let (object_id, _, _) = world.spawn_player(1, "ada".to_string(), 0xff);
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        (dir, world, Client::new(1, addr, object_id, 0))
    }

    #[test]
    fn test_first_snapshot_has_full_window_and_self() {
        let (_dir, mut world, mut client) = setup();
        let snapshot = build_snapshot(&mut world, &mut client, 1000).unwrap();

        assert_eq!(snapshot.t, 1000);
        assert_eq!(snapshot.me.id, 1);
        assert_eq!(snapshot.me.username, "ada");
        assert_eq!(snapshot.world.load_chunks.len(), 9);
        assert_eq!(client.last_window, Some((0, 0)));
    }

    #[test]
    fn test_stationary_second_snapshot_is_light() {
        let (_dir, mut world, mut client) = setup();
        build_snapshot(&mut world, &mut client, 1000).unwrap();
        let second = build_snapshot(&mut world, &mut client, 1050).unwrap();
        assert!(second.world.is_empty());
    }

    #[test]
    fn test_nearby_entities_included_far_ones_excluded() {
        let (_dir, mut world, mut client) = setup();
        let me = {
            let layer = world.layer_mut(0).unwrap();
            let me = layer.objects.get(client.object_id).unwrap();
            (me.x, me.y)
        };
        let layer = world.layer_mut(0).unwrap();
        let near = layer
            .objects
            .spawn(ObjectKind::Npc { asset: 2 }, me.0 + 1.0, me.1);
        layer.objects.spawn(
            ObjectKind::Npc { asset: 2 },
            me.0 + VIEW_HALF_WIDTH + 1.0,
            me.1,
        );

        let snapshot = build_snapshot(&mut world, &mut client, 1000).unwrap();
        assert_eq!(snapshot.entities.len(), 1);
        assert_eq!(snapshot.entities[0].id, near);
        assert!(snapshot.others.is_empty());
    }

    #[test]
    fn test_other_players_split_from_entities() {
        let (_dir, mut world, mut client) = setup();
        world.spawn_player(2, "bob".to_string(), 0);

        let snapshot = build_snapshot(&mut world, &mut client, 1000).unwrap();
        assert_eq!(snapshot.others.len(), 1);
        assert_eq!(snapshot.others[0].username, "bob");
        // The snapshot owner never appears in their own `others` list.
        assert!(snapshot.others.iter().all(|p| p.id != 1));
    }

    #[test]
    fn test_corrections_drained_into_snapshot_once() {
        let (_dir, mut world, mut client) = setup();
        client.queue_push(1.0, 0.0);
        client.queue_set_mode(PlayerMode::Spectator);

        let first = build_snapshot(&mut world, &mut client, 1000).unwrap();
        assert_eq!(first.corrections.len(), 2);

        let second = build_snapshot(&mut world, &mut client, 1050).unwrap();
        assert!(second.corrections.is_empty());
    }

    #[test]
    fn test_missing_object_yields_none() {
        let (_dir, mut world, mut client) = setup();
        world.despawn_player(0, client.object_id);
        assert!(build_snapshot(&mut world, &mut client, 1000).is_none());
    }
}

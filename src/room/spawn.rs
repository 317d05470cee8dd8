//! Hand-off from a started room to the gameplay spawner

use super::session::SessionState;
use tracing::debug;

/// Opaque handle the gameplay layer returns for a spawned entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle(pub u64);

pub trait Spawner {
    fn spawn_entity(&mut self, session_ordinal: u32, slot_index: u32) -> EntityHandle;
}

/// Spawn one entity per local player, by session ordinal then slot index.
///
/// Returns `(session_ordinal, slot_index, handle)` for every spawn.
pub fn spawn_local_players<S: Spawner + ?Sized>(
    sessions: &[SessionState],
    spawner: &mut S,
) -> Vec<(u32, u32, EntityHandle)> {
    let mut ordered: Vec<&SessionState> = sessions.iter().collect();
    ordered.sort_by_key(|s| s.client_ordinal);

    let mut spawned = Vec::new();
    for session in ordered {
        for slot in session.slots() {
            let handle = spawner.spawn_entity(session.client_ordinal, slot.index);
            debug!(ordinal = session.client_ordinal, slot = slot.index, ?handle, "spawned local player");
            spawned.push((session.client_ordinal, slot.index, handle));
        }
    }
    spawned
}

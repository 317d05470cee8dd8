//! Ready aggregation

use super::session::SessionState;
use crate::config::ReadyMode;

/// Computes the global "begin game" signal from the full session set.
///
/// Always recomputed from scratch; there is no cached partial result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyAggregator {
    mode: ReadyMode,
}

impl ReadyAggregator {
    pub fn new(mode: ReadyMode) -> Self {
        Self { mode }
    }

    /// Whether one session counts as ready.
    ///
    /// A session without slots is never ready.
    pub fn session_ready(&self, session: &SessionState) -> bool {
        let slots_ready =
            !session.slots().is_empty() && session.slots().iter().all(|slot| slot.ready);
        match self.mode {
            ReadyMode::SlotsOnly => slots_ready,
            ReadyMode::SessionAndSlots => slots_ready && session.session_ready == Some(true),
        }
    }

    /// AND over every session. An empty room is not ready.
    pub fn all_ready<'a, I>(&self, sessions: I) -> bool
    where
        I: IntoIterator<Item = &'a SessionState>,
    {
        let mut any = false;
        for session in sessions {
            if !self.session_ready(session) {
                return false;
            }
            any = true;
        }
        any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ConnectionId;
    use crate::room::session::SessionId;

    fn session(id: u64, mode: ReadyMode, slots: u32) -> SessionState {
        let mut s = SessionState::new(SessionId(id), ConnectionId(id), 0, mode);
        for _ in 0..slots {
            s.add_local_player(4, 24).unwrap();
        }
        s
    }

    #[test]
    fn test_single_session_two_slots() {
        let agg = ReadyAggregator::new(ReadyMode::SlotsOnly);
        let mut s = session(1, ReadyMode::SlotsOnly, 2);

        s.set_ready(1, true).unwrap();
        assert!(!agg.all_ready([&s]));

        s.set_ready(2, true).unwrap();
        assert!(agg.all_ready([&s]));

        s.add_local_player(4, 24).unwrap();
        assert!(!s.slot(3).unwrap().ready);
        assert!(!agg.all_ready([&s]));
    }

    #[test]
    fn test_empty_room_and_empty_session() {
        let agg = ReadyAggregator::new(ReadyMode::SlotsOnly);
        assert!(!agg.all_ready(std::iter::empty()));

        let empty = session(1, ReadyMode::SlotsOnly, 0);
        assert!(!agg.session_ready(&empty));
        assert!(!agg.all_ready([&empty]));
    }

    #[test]
    fn test_session_flag_gates_in_session_mode() {
        let agg = ReadyAggregator::new(ReadyMode::SessionAndSlots);
        let mut s = session(1, ReadyMode::SessionAndSlots, 1);
        s.set_ready(1, true).unwrap();
        assert!(!agg.all_ready([&s]));

        s.set_session_ready(true).unwrap();
        assert!(agg.all_ready([&s]));
    }

    #[test]
    fn test_idempotent() {
        let agg = ReadyAggregator::new(ReadyMode::SlotsOnly);
        let mut a = session(1, ReadyMode::SlotsOnly, 1);
        let b = session(2, ReadyMode::SlotsOnly, 1);
        a.set_ready(1, true).unwrap();

        let first = agg.all_ready([&a, &b]);
        let second = agg.all_ready([&a, &b]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_set_ready_commutes() {
        let agg = ReadyAggregator::new(ReadyMode::SlotsOnly);

        let mut a1 = session(1, ReadyMode::SlotsOnly, 1);
        let mut b1 = session(2, ReadyMode::SlotsOnly, 2);
        b1.set_ready(2, true).unwrap();
        let mut a2 = a1.clone();
        let mut b2 = b1.clone();

        a1.set_ready(1, true).unwrap();
        b1.set_ready(1, true).unwrap();

        b2.set_ready(1, true).unwrap();
        a2.set_ready(1, true).unwrap();

        assert_eq!(agg.all_ready([&a1, &b1]), agg.all_ready([&a2, &b2]));
        assert!(agg.all_ready([&a1, &b1]));
    }
}

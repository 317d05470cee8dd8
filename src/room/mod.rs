//! Room state: sessions, local player slots, readiness and replication
//!
//! Handles:
//! - The authoritative session registry and its command path (`RoomCoordinator`)
//! - Slot and session records replicated to every client
//! - The global "all ready" aggregate and the debounced game start
//! - Client-side shadow copies and late-join reconciliation (`ShadowRoom`)
//! - Push-based change notification for presentation layers
//! - Handing frozen sessions to a spawner once play begins

pub mod aggregate;
pub mod command;
pub mod coordinator;
pub mod error;
pub mod notify;
pub mod session;
pub mod shadow;
pub mod slot;
pub mod spawn;

pub use aggregate::ReadyAggregator;
pub use command::{Command, Invoker};
pub use coordinator::{Applied, GameplayHooks, NoopHooks, RoomCoordinator};
pub use error::{CommandError, DenyReason};
pub use notify::{ChangeField, ChangeNotice, FieldValue, RoomObserver};
pub use session::{SessionHeader, SessionId, SessionPhase, SessionState};
pub use shadow::ShadowRoom;
pub use slot::LocalPlayerSlot;
pub use spawn::{spawn_local_players, EntityHandle, Spawner};

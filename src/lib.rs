//! couchroom - split-screen multiplayer lobbies
//!
//! Every connection is a session with one or more local players. The host
//! validates every change, replicates snapshots to all clients and starts
//! the game once every local player in the room is ready.

pub mod config;
pub mod lobby;
pub mod network;
pub mod room;

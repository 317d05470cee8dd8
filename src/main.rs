//! couchroom - headless split-screen lobby host and client
//!
//! Gather the couch. Ready up. Play.

use clap::{Parser, Subcommand, ValueEnum};
use couchroom::config::{ConfigError, ReadyMode, RoomConfig};
use couchroom::lobby::{JoinedRoom, LobbyEvent, RoomHost};
use couchroom::network::{Client, TransportError};
use couchroom::room::{
    spawn_local_players, EntityHandle, GameplayHooks, SessionId, SessionState, Spawner,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// How often the host and client loops poll their transport
const TICK: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "couchroom", version, about = "Split-screen multiplayer lobby")]
struct Cli {
    /// Read room settings from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Host a room and wait until everyone is ready
    Host {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        max_local_players: Option<u32>,
        #[arg(long, value_enum)]
        ready_mode: Option<ModeArg>,
    },
    /// Join a room, set up local players and wait for the game to start
    Join {
        /// Host address, with or without a port
        addr: String,
        /// Local players on this machine
        #[arg(long, default_value_t = 1)]
        local_players: u32,
        /// Name for the first local player
        #[arg(long)]
        name: Option<String>,
        /// Mark every local player ready once joined
        #[arg(long)]
        ready: bool,
    },
}

#[derive(Copy, Clone, ValueEnum)]
enum ModeArg {
    SlotsOnly,
    SessionAndSlots,
}

impl From<ModeArg> for ReadyMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::SlotsOnly => ReadyMode::SlotsOnly,
            ModeArg::SessionAndSlots => ReadyMode::SessionAndSlots,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Logs lifecycle and spawns one entity per local player at game start
struct HeadlessGameplay;

impl GameplayHooks for HeadlessGameplay {
    fn on_all_ready(&self, sessions: &[SessionState]) {
        let mut spawner = LogSpawner::default();
        let spawned = spawn_local_players(sessions, &mut spawner);
        info!(entities = spawned.len(), "local players spawned");
    }

    fn on_session_joined(&self, session: SessionId) {
        info!(%session, "gameplay notified of join");
    }

    fn on_session_left(&self, session: SessionId) {
        info!(%session, "gameplay notified of leave");
    }
}

#[derive(Default)]
struct LogSpawner {
    next: u64,
}

impl Spawner for LogSpawner {
    fn spawn_entity(&mut self, session_ordinal: u32, slot_index: u32) -> EntityHandle {
        self.next += 1;
        info!(session_ordinal, slot_index, entity = self.next, "spawn");
        EntityHandle(self.next)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        tracing::error!(error = %e, "couchroom failed");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => RoomConfig::load_from(path)?,
        None => RoomConfig::load()?,
    };

    match cli.cmd {
        Cmd::Host {
            port,
            max_local_players,
            ready_mode,
        } => {
            let mut config = config;
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(max) = max_local_players {
                config.max_local_players = max;
            }
            if let Some(mode) = ready_mode {
                config.ready_mode = mode.into();
            }
            config.validate()?;
            host(config)
        }
        Cmd::Join {
            addr,
            local_players,
            name,
            ready,
        } => join(&addr, local_players, name.as_deref(), ready),
    }
}

fn host(config: RoomConfig) -> Result<(), CliError> {
    let mut host = RoomHost::start(config, Arc::new(HeadlessGameplay))?;
    info!(room = %host.room_name, port = host.port(), "waiting for players");

    loop {
        for event in host.poll() {
            match event {
                LobbyEvent::SessionJoined { connection, session } => {
                    info!(%connection, %session, "player joined");
                }
                LobbyEvent::SessionLeft { session } => info!(%session, "player left"),
                LobbyEvent::CommandRejected {
                    connection,
                    command,
                    reason,
                } => {
                    warn!(?connection, ?command, %reason, "rejected command");
                }
                LobbyEvent::AllReadyChanged(all_ready) => info!(all_ready, "ready state changed"),
                LobbyEvent::GameStarting { sessions } => {
                    info!(sessions = sessions.len(), "game starting");
                    // Let writer threads flush the start broadcast
                    thread::sleep(Duration::from_millis(500));
                    return Ok(());
                }
                other => debug!(?other, "lobby event"),
            }
        }
        thread::sleep(TICK);
    }
}

fn join(addr: &str, local_players: u32, name: Option<&str>, ready: bool) -> Result<(), CliError> {
    let mut room: JoinedRoom<Client> = JoinedRoom::join(addr)?;
    let mut configured = false;

    loop {
        for event in room.poll() {
            match event {
                LobbyEvent::Reconciled if !configured => {
                    configured = true;
                    set_up_local_players(&mut room, local_players, name, ready)?;
                }
                LobbyEvent::CommandRejected { command, reason, .. } => {
                    warn!(?command, %reason, "host rejected command");
                }
                LobbyEvent::AllReadyChanged(all_ready) => info!(all_ready, "ready state changed"),
                LobbyEvent::GameStarting { sessions } => {
                    for session in &sessions {
                        info!(
                            ordinal = session.client_ordinal,
                            players = session.count(),
                            "in game"
                        );
                    }
                    room.leave();
                    return Ok(());
                }
                LobbyEvent::Disconnected => {
                    warn!("host closed the connection");
                    return Ok(());
                }
                other => debug!(?other, "lobby event"),
            }
        }
        thread::sleep(TICK);
    }
}

fn set_up_local_players(
    room: &mut JoinedRoom<Client>,
    local_players: u32,
    name: Option<&str>,
    ready: bool,
) -> Result<(), CliError> {
    let Some(session) = room.shadow().local_session() else {
        return Ok(());
    };

    let mut count = session.count();
    while count < local_players {
        room.add_local_player()?;
        count += 1;
    }
    while count > local_players {
        room.remove_last_local_player()?;
        count -= 1;
    }
    if let Some(name) = name {
        if local_players > 0 {
            room.rename(1, name)?;
        }
    }
    if ready {
        for slot in 1..=local_players {
            room.set_ready(slot, true)?;
        }
        if session.session_ready.is_some() {
            room.set_session_ready(true)?;
        }
    }
    info!(local_players, ready, "local players set up");
    Ok(())
}

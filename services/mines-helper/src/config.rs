use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use mines_types::mines::{DEFAULT_OFFER_TIMEOUT_MS, DEFAULT_TURN_TIMEOUT_MS, PICKUP_CHANNEL};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::coordinator::CoordinatorConfig;
use crate::pickup::validate_channel;

const DEFAULT_CHANNEL_BUFFER: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Memory,
    Sqlite,
    Postgres,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PickupKind {
    Redis,
    Postgres,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host interface for the gateway.
    #[arg(long, env = "MINES_HELPER_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[arg(short, long, env = "MINES_HELPER_PORT", default_value_t = 9124)]
    pub port: u16,

    /// Worker id recorded on claimed sessions (random UUID when omitted).
    #[arg(long, env = "MINES_HELPER_WORKER_ID")]
    pub worker_id: Option<String>,

    /// Time a player has to pick a difficulty.
    #[arg(long, env = "UNIFIED_OFFER_TIMEOUT_MS", default_value_t = DEFAULT_OFFER_TIMEOUT_MS)]
    pub offer_timeout_ms: u64,

    /// Time allowed between moves of a running game.
    #[arg(long, env = "ACTIVE_GAME_TURN_TIMEOUT_MS", default_value_t = DEFAULT_TURN_TIMEOUT_MS)]
    pub turn_timeout_ms: u64,

    #[arg(long, value_enum, env = "MINES_HELPER_STORE", default_value = "memory")]
    pub store: StoreKind,

    /// SQLite database file (required for `--store sqlite`).
    #[arg(long, env = "MINES_HELPER_SQLITE_PATH")]
    pub sqlite_path: Option<PathBuf>,

    /// Postgres connection string for the store and the LISTEN pickup source.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Where pickup notices come from (none: gateway-only local run).
    #[arg(long, value_enum, env = "MINES_HELPER_PICKUP")]
    pub pickup: Option<PickupKind>,

    #[arg(long, env = "MINES_HELPER_REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "MINES_HELPER_PICKUP_CHANNEL", default_value = PICKUP_CHANNEL)]
    pub pickup_channel: String,

    /// Seed for reproducible boards (optional).
    #[arg(long, env = "MINES_HELPER_RNG_SEED")]
    pub rng_seed: Option<u64>,

    /// Capacity of the pickup and action queues (0 uses default).
    #[arg(long, env = "MINES_HELPER_CHANNEL_BUFFER")]
    pub channel_buffer: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreConfig {
    Memory,
    Sqlite(PathBuf),
    Postgres(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PickupConfig {
    Disabled,
    Redis { url: String, channel: String },
    Postgres { url: String, channel: String },
}

#[derive(Clone, Debug)]
pub struct HelperConfig {
    pub listen: SocketAddr,
    pub coordinator: CoordinatorConfig,
    pub store: StoreConfig,
    pub pickup: PickupConfig,
    pub channel_buffer: usize,
}

pub fn build_config(args: &Args) -> Result<HelperConfig> {
    if args.offer_timeout_ms == 0 {
        bail!("offer_timeout_ms must be > 0");
    }
    if args.turn_timeout_ms == 0 {
        bail!("turn_timeout_ms must be > 0");
    }

    let store = match args.store {
        StoreKind::Memory => StoreConfig::Memory,
        StoreKind::Sqlite => StoreConfig::Sqlite(
            args.sqlite_path
                .clone()
                .context("--sqlite-path is required for the sqlite store")?,
        ),
        StoreKind::Postgres => StoreConfig::Postgres(
            args.database_url
                .clone()
                .context("DATABASE_URL is required for the postgres store")?,
        ),
    };

    let channel = args.pickup_channel.clone();
    let pickup = match args.pickup {
        None => PickupConfig::Disabled,
        Some(PickupKind::Redis) => PickupConfig::Redis {
            url: args
                .redis_url
                .clone()
                .context("--redis-url is required for redis pickup")?,
            channel,
        },
        Some(PickupKind::Postgres) => {
            validate_channel(&channel)?;
            PickupConfig::Postgres {
                url: args
                    .database_url
                    .clone()
                    .context("DATABASE_URL is required for postgres pickup")?,
                channel,
            }
        }
    };

    let worker_id = match args.worker_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    };

    Ok(HelperConfig {
        listen: SocketAddr::new(args.host, args.port),
        coordinator: CoordinatorConfig {
            worker_id,
            offer_timeout: Duration::from_millis(args.offer_timeout_ms),
            turn_timeout: Duration::from_millis(args.turn_timeout_ms),
            rng_seed: args.rng_seed,
        },
        store,
        pickup,
        channel_buffer: match args.channel_buffer {
            Some(0) | None => DEFAULT_CHANNEL_BUFFER,
            Some(value) => value,
        },
    })
}

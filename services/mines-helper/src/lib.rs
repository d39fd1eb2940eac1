//! Mines helper service.
//!
//! A satellite worker that picks up wagers announced by the upstream service, claims them through
//! the shared store, runs the game with the owning player, and records exactly one outcome per
//! session. Several helper processes can run against the same store; the claim decides which one
//! owns a session.

pub mod config;
pub mod coordinator;
pub mod gateway;
pub mod pickup;
pub mod presenter;
pub mod registry;
pub mod store;
pub mod timeout;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

#[cfg(test)]
mod tests;

pub use config::{build_config, Args, HelperConfig, PickupConfig, StoreConfig};
pub use coordinator::{CoordinatorConfig, PlayerAction, SessionCoordinator};
pub use gateway::{GatewayEvent, WsGateway};
pub use pickup::{PickupError, PickupNotice, PostgresPickupSource, RedisPickupSource};
pub use presenter::{
    AckToken, Acknowledgement, Annotation, Presenter, PresenterError, SessionView, TileView,
    TitleSeverity,
};
pub use registry::SessionRegistry;
pub use store::{
    MemoryStore, NewSession, PostgresStore, SessionStore, SqliteStore, StoreError,
};
pub use timeout::{Expiry, TimeoutPhase, TimeoutScheduler, TimerHandle};

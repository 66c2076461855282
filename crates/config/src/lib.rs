//! Configuration schema, discovery, and loading for mirrelay.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{discover_and_load, load_config},
    schema::{
        BackendConfig, BrowserConfig, HeartbeatConfig, RelayConfig, SenderConfig, WatcherConfig,
    },
};

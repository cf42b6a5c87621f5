//! Configuration loading, env substitution, and schema types.
//!
//! Config files: `murmur.toml`, `murmur.yaml`, or `murmur.json`
//! Searched in `./` then `~/.config/murmur/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        apply_env_overrides, clear_config_dir, config_dir, discover_and_load, load_config,
        set_config_dir,
    },
    schema::{
        AuthConfig, MurmurConfig, PresenceConfig, ServerConfig, StorageBackend, StorageConfig,
        TypingConfig,
    },
};

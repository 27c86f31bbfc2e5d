//! Default constants for engine configuration.
//!
//! Centralizes values shared by config.rs, the collector and the uninstall
//! coordinator.

/// Default number of allocations between automatic collections.
pub const DEFAULT_GC_THRESHOLD_OBJECTS: usize = 4096;

/// Default live-object limit (0 = unlimited).
pub const DEFAULT_MAX_OBJECTS: usize = 0;

/// Run the advisory reachability sweep when a bundle is uninstalled.
pub const DEFAULT_SWEEP_ON_UNINSTALL: bool = true;

/// Largest heap (in live objects) the uninstall sweep will scan (0 = unlimited).
pub const DEFAULT_MAX_SWEEP_OBJECTS: usize = 0;

/// Collect immediately after an uninstall.
pub const DEFAULT_COLLECT_ON_UNINSTALL: bool = false;

/// Config file looked up by the CLI when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "ember.toml";

//! Application-wide constants for tuning and configuration
//!
//! Centralizes magic numbers to make them discoverable and configurable.

/// Capacity of the store actor's command channel.
/// Navigation issues at most a handful of requests at a time.
pub const STORE_COMMAND_CAPACITY: usize = 32;

/// Log file written in the config directory.
pub const LOG_FILE_NAME: &str = "msgcursor.log";

/// Filter used when neither RUST_LOG nor the config sets one.
pub const DEFAULT_LOG_FILTER: &str = "info,msgcursor=debug";

/// Window id the replay tool gives its single window.
pub const REPLAY_WINDOW_ID: u64 = 1;

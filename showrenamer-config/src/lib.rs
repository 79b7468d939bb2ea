//! On-disk configuration for showrenamer.
//!
//! A config directory holds three JSON documents that can be edited while the
//! renamer runs (`name_patterns.json`, `series_mapping.json`,
//! `show_directories.json`), the startup-only `settings.toml`, and the cache
//! and operation log files. [`ConfigStore`] owns the current snapshots and
//! [`ConfigWatcher`] reloads them on change.

pub mod settings;
pub mod store;
pub mod watcher;

pub use settings::{load_or_create_settings, parse_settings};
pub use store::{ConfigStore, kind_for_file};
pub use watcher::{ConfigWatcher, DEFAULT_RELOAD_DEBOUNCE, reload_and_notify};

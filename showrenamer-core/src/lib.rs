//! Core of showrenamer: turns loosely named TV episode files into
//! `"{Show} - SxxEyy - {Title}.ext"` and files them into a per-show,
//! per-season library.
//!
//! The flow for one file is [`tv_parser::PatternEngine`] (show, season,
//! episode from the file name) → [`matcher::SeriesMatcher`] (catalog lookup
//! through [`cache::MetadataCache`]) → [`library::FileExecutor`] (rename, then
//! move). [`pipeline::Pipeline`] strings these together and
//! [`fs_watch::FileCoalescer`] feeds it from filesystem events.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fs_watch;
pub mod library;
pub mod matcher;
pub mod oplog;
pub mod pipeline;
pub mod tv_parser;

pub use cache::MetadataCache;
pub use catalog::{CatalogClient, EpisodeRecord, SeriesRecord, TvdbClient};
pub use config::{
    ConfigKind, ConfigObserver, ConfigUpdate, NamePatternConfig, OperatingMode, RenamerSettings,
    SeriesNameMapping, ShowDirectories, WatchConfig,
};
pub use error::{CacheError, CatalogError, ExecutorError, PipelineError, Result, WatchError};
pub use fs_watch::{FileCoalescer, WatchService};
pub use library::{FileExecutor, ShowDirectoryResolver, UndoReport, UndoStep, plan_undo};
pub use matcher::{MatchConfirmer, SeriesMatcher};
pub use oplog::{JsonLinesOperationLog, MemoryOperationLog, OperationLog, OperationRecord};
pub use pipeline::{DeferReason, FileProcessor, Pipeline, ProcessOutcome};
pub use tv_parser::{ParsedEpisode, PatternEngine};

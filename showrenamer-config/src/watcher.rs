//! Hot reload of the JSON documents.
//!
//! notify events for the config directory are funnelled into one reload
//! task. Each changed document waits for a trailing debounce window so an
//! editor's write-rename-chmod burst produces a single reload.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use showrenamer_core::{ConfigKind, ConfigObserver};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::store::{ConfigStore, kind_for_file};

/// Quiet period after the last change before a document is reloaded.
pub const DEFAULT_RELOAD_DEBOUNCE: Duration = Duration::from_secs(1);

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Reloads `kind` and fans the new snapshot out. Returns whether the swap
/// happened.
pub fn reload_and_notify(
    store: &ConfigStore,
    observers: &[Arc<dyn ConfigObserver>],
    kind: ConfigKind,
) -> bool {
    match store.reload(kind) {
        Ok(update) => {
            for observer in observers {
                observer.on_config_changed(&update);
            }
            true
        }
        Err(err) => {
            warn!(?kind, error = %err, "config reload failed; keeping previous version");
            false
        }
    }
}

/// Document kinds touched by a notify event.
fn changed_kinds(event: &Event) -> Vec<ConfigKind> {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter_map(|path| path.file_name()?.to_str())
        .filter_map(kind_for_file)
        .collect()
}

/// Watches the config directory and pushes reloaded documents to observers.
pub struct ConfigWatcher {
    watcher: Option<RecommendedWatcher>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("active", &self.watcher.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ConfigWatcher {
    /// Starts watching with [`DEFAULT_RELOAD_DEBOUNCE`]. Must be called from
    /// within a Tokio runtime.
    pub fn start(
        store: Arc<ConfigStore>,
        observers: Vec<Arc<dyn ConfigObserver>>,
    ) -> anyhow::Result<Self> {
        Self::with_debounce(store, observers, DEFAULT_RELOAD_DEBOUNCE)
    }

    /// Starts watching with a custom debounce window.
    pub fn with_debounce(
        store: Arc<ConfigStore>,
        observers: Vec<Arc<dyn ConfigObserver>>,
        debounce: Duration,
    ) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for kind in changed_kinds(&event) {
                        let _ = tx.send(kind);
                    }
                }
                Err(err) => error!(error = %err, "config watcher error"),
            },
            NotifyConfig::default(),
        )
        .context("failed to create config watcher")?;
        watcher
            .watch(store.dir(), RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", store.dir().display()))?;

        let cancel = CancellationToken::new();
        let worker = spawn_reload_loop(store, observers, rx, debounce, cancel.clone());

        Ok(Self {
            watcher: Some(watcher),
            cancel,
            worker: Some(worker),
        })
    }

    /// Detaches from the directory and waits for the reload task.
    pub async fn stop(mut self) {
        self.watcher.take();
        self.cancel.cancel();

        if let Some(mut worker) = self.worker.take() {
            match timeout(STOP_TIMEOUT, &mut worker).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(error = %err, "config reload task failed"),
                Err(_) => {
                    warn!("config reload task did not stop in time; aborting");
                    worker.abort();
                }
            }
        }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_reload_loop(
    store: Arc<ConfigStore>,
    observers: Vec<Arc<dyn ConfigObserver>>,
    mut rx: mpsc::UnboundedReceiver<ConfigKind>,
    debounce: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut dirty = BTreeSet::new();

        loop {
            let received = if dirty.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    kind = rx.recv() => kind,
                }
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    waited = timeout(debounce, rx.recv()) => match waited {
                        Ok(kind) => kind,
                        Err(_) => {
                            for kind in std::mem::take(&mut dirty) {
                                reload_and_notify(&store, &observers, kind);
                            }
                            continue;
                        }
                    },
                }
            };

            let Some(kind) = received else {
                break;
            };
            debug!(?kind, "config file changed");
            dirty.insert(kind);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use std::path::PathBuf;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn only_writes_to_known_documents_count() {
        assert_eq!(
            changed_kinds(&event(EventKind::Create(CreateKind::File), "/cfg/name_patterns.json")),
            vec![ConfigKind::Patterns]
        );
        assert_eq!(
            changed_kinds(&event(EventKind::Modify(ModifyKind::Any), "/cfg/series_mapping.json")),
            vec![ConfigKind::Mapping]
        );
        assert!(changed_kinds(&event(EventKind::Modify(ModifyKind::Any), "/cfg/show_cache.json")).is_empty());
        assert!(
            changed_kinds(&event(EventKind::Access(AccessKind::Any), "/cfg/name_patterns.json")).is_empty()
        );
    }
}

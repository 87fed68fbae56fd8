//! Watch streams over the objects the controller consumes.
//!
//! `MemorySource` is the in-process source: a sequence-numbered event log
//! over an object store, seeded from YAML manifests. Status written by the
//! controller lands in the same store and is observed back through the
//! watch like any other change.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use pkg_cache::{StatusSink, StatusUpdate};
use pkg_types::{Kind, NamespacedName, Object};
use serde::Deserialize;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handler::EventHandler;

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(Object),
    Modified { previous: Object, current: Object },
    Deleted(Object),
    /// Every object of the kind that existed when the watch started has
    /// been delivered.
    Synced(Kind),
}

impl WatchEvent {
    pub fn kind(&self) -> Kind {
        match self {
            WatchEvent::Added(o) | WatchEvent::Deleted(o) => o.kind(),
            WatchEvent::Modified { current, .. } => current.kind(),
            WatchEvent::Synced(kind) => *kind,
        }
    }
}

#[async_trait]
pub trait WatchSource: Send + Sync {
    /// Current objects of `kind` as `Added`, then `Synced(kind)`, then live
    /// changes.
    async fn watch(&self, kind: Kind) -> anyhow::Result<BoxStream<'static, WatchEvent>>;

    async fn get(&self, kind: Kind, key: &NamespacedName) -> anyhow::Result<Option<Object>>;
}

/// One entry of the event log.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub seq: u64,
    pub event: WatchEvent,
}

type ObjectKey = (Kind, NamespacedName);

struct Inner {
    seq: u64,
    objects: BTreeMap<ObjectKey, Object>,
    /// Ring buffer of recent events
    events: VecDeque<LogEntry>,
    max_events: usize,
}

impl Inner {
    fn emit(&mut self, sender: &broadcast::Sender<LogEntry>, event: WatchEvent) {
        let entry = LogEntry {
            seq: self.seq,
            event,
        };
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(entry.clone());
        // No receivers is fine.
        let _ = sender.send(entry);
    }
}

#[derive(Clone)]
pub struct MemorySource {
    inner: Arc<RwLock<Inner>>,
    sender: broadcast::Sender<LogEntry>,
}

impl MemorySource {
    pub fn new(max_events: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                seq: 0,
                objects: BTreeMap::new(),
                events: VecDeque::with_capacity(max_events),
                max_events,
            })),
            sender,
        }
    }

    /// Create or replace an object. Returns false when nothing changed.
    pub async fn apply(&self, mut object: Object) -> bool {
        let mut inner = self.inner.write().await;
        let key = (object.kind(), object.key());
        let previous = inner.objects.get(&key).cloned();
        if let Some(prev) = &previous {
            object.meta_mut().resource_version = prev.meta().resource_version.clone();
            if prev == &object {
                return false;
            }
        }
        inner.seq += 1;
        object.meta_mut().resource_version = inner.seq.to_string();
        inner.objects.insert(key, object.clone());
        let event = match previous {
            Some(previous) => WatchEvent::Modified {
                previous,
                current: object,
            },
            None => WatchEvent::Added(object),
        };
        inner.emit(&self.sender, event);
        true
    }

    pub async fn remove(&self, kind: Kind, key: &NamespacedName) -> Option<Object> {
        let mut inner = self.inner.write().await;
        let removed = inner.objects.remove(&(kind, key.clone()))?;
        inner.seq += 1;
        inner.emit(&self.sender, WatchEvent::Deleted(removed.clone()));
        Some(removed)
    }

    pub async fn current_seq(&self) -> u64 {
        self.inner.read().await.seq
    }

    /// Events after `from_seq` still held in the ring buffer.
    pub async fn events_since(&self, from_seq: u64) -> Vec<LogEntry> {
        let inner = self.inner.read().await;
        inner
            .events
            .iter()
            .filter(|e| e.seq > from_seq)
            .cloned()
            .collect()
    }

    /// Apply every object of every `.yaml`/`.yml` file in `dir`, in file
    /// name order. A file may hold several documents.
    pub async fn load_manifests(&self, dir: &Path) -> anyhow::Result<usize> {
        let mut files: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("reading manifest dir {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == "yaml" || e == "yml")
            })
            .collect();
        files.sort();

        let mut count = 0;
        for file in files {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            for object in parse_manifests(&content)
                .with_context(|| format!("parsing {}", file.display()))?
            {
                self.apply(object).await;
                count += 1;
            }
        }
        info!("Loaded {} object(s) from {}", count, dir.display());
        Ok(count)
    }
}

/// Objects of a multi-document YAML string. Empty documents are skipped.
pub fn parse_manifests(content: &str) -> anyhow::Result<Vec<Object>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        objects.push(serde_yaml::from_value(value)?);
    }
    Ok(objects)
}

#[async_trait]
impl WatchSource for MemorySource {
    async fn watch(&self, kind: Kind) -> anyhow::Result<BoxStream<'static, WatchEvent>> {
        // Subscribe under the lock so no event falls between the listing
        // and the live stream.
        let inner = self.inner.read().await;
        let rx = self.sender.subscribe();
        let from_seq = inner.seq;
        let mut initial: Vec<WatchEvent> = inner
            .objects
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, o)| WatchEvent::Added(o.clone()))
            .collect();
        drop(inner);
        initial.push(WatchEvent::Synced(kind));

        // A receiver that fell behind has lost events for good, so the
        // stream ends there and the watcher re-lists.
        let live = BroadcastStream::new(rx)
            .map_while(move |result| match result {
                Ok(entry) => Some(
                    (entry.seq > from_seq && entry.event.kind() == kind).then_some(entry.event),
                ),
                Err(e) => {
                    warn!("Watch on {} fell behind: {}", kind, e);
                    None
                }
            })
            .filter_map(|event| event);
        Ok(Box::pin(tokio_stream::iter(initial).chain(live)))
    }

    async fn get(&self, kind: Kind, key: &NamespacedName) -> anyhow::Result<Option<Object>> {
        Ok(self.inner.read().await.objects.get(&(kind, key.clone())).cloned())
    }
}

#[async_trait]
impl StatusSink for MemorySource {
    async fn write_status(&self, update: &StatusUpdate) -> anyhow::Result<()> {
        let Some(mut object) = self.get(update.kind, &update.key).await? else {
            bail!("{} not found", update.reference());
        };
        if update.patch.apply_to(&mut object) {
            self.apply(object).await;
        }
        Ok(())
    }
}

/// Feed one watch into the handler until the stream ends. Returns false
/// when cancelled.
///
/// Objects added before `Synced` make up the listing; cached objects of
/// the kind missing from it were deleted while no watch was running.
async fn follow(
    kind: Kind,
    mut stream: BoxStream<'static, WatchEvent>,
    handler: &EventHandler,
    cancel: &CancellationToken,
) -> bool {
    let mut listed = Some(BTreeSet::new());
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return false,
            event = stream.next() => event,
        };
        let Some(event) = event else {
            return true;
        };
        if let Some(keys) = listed.as_mut() {
            match &event {
                WatchEvent::Added(object) => {
                    keys.insert(object.key());
                }
                WatchEvent::Synced(_) => {
                    handler.on_relist(kind, keys);
                    listed = None;
                }
                _ => {}
            }
        }
        handler.handle(event);
    }
}

/// One task per kind, feeding events into the handler until cancelled. A
/// failed or ended watch is restarted after a pause.
pub fn run_watchers(
    source: Arc<dyn WatchSource>,
    handler: Arc<EventHandler>,
    cancel: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    Kind::ALL
        .into_iter()
        .map(|kind| {
            let source = source.clone();
            let handler = handler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                debug!("Watching {}", kind);
                loop {
                    match source.watch(kind).await {
                        Ok(stream) => {
                            if !follow(kind, stream, &handler, &cancel).await {
                                return;
                            }
                            debug!("Watch on {} ended, re-listing", kind);
                        }
                        Err(e) => warn!("Watch on {} failed: {}", kind, e),
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            })
        })
        .collect()
}

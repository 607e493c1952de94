/// Session coordinator
///
/// One task owns the decision store, the navigator and the prefetch cache.
/// Everything that mutates them arrives as a message:
/// - Commands from `SessionHandle` (decide, navigate, filter, purge, ...)
/// - Fetch completions from the prefetch cache
/// - Kept-storage totals from the background scan
/// - Change notifications from the asset source
///
/// Each message is handled to completion before the next is looked at, so
/// store, navigation and cache always agree when a snapshot is published.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::navigation::{Direction, Navigator};
use super::snapshot::SessionSnapshot;
use crate::cache::prefetch::{FetchEvent, PrefetchCache};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::source::traits::{AssetSource, Content};
use crate::state::data::{AssetId, Decision, DecisionLookup, ReviewSequence};
use crate::state::decisions::{DecisionStore, ReconcileReport};

const COMMAND_BUFFER: usize = 64;

/// What a confirmed purge removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PurgeReport {
    pub items_purged: u64,
    pub bytes_freed: u64,
}

enum Command {
    /// `id: None` decides whatever is current when the command is handled
    Decide {
        id: Option<AssetId>,
        decision: Decision,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Navigate {
        direction: Direction,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    SetHideDecided {
        hide_decided: bool,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Restart(oneshot::Sender<SessionSnapshot>),
    RetryCurrent(oneshot::Sender<SessionSnapshot>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Reconcile(oneshot::Sender<ReconcileReport>),
    PurgeDeleted(oneshot::Sender<Result<PurgeReport>>),
    Preview {
        id: AssetId,
        reply: oneshot::Sender<Option<Content>>,
    },
    Close(oneshot::Sender<DecisionStore>),
}

struct StorageTotal {
    generation: u64,
    bytes: u64,
}

// ========== Handle ==========

/// Cheap, cloneable front door to a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Record a decision for `id`. Keeping or deleting the current item
    /// moves the session on; clearing it stays put.
    pub async fn decide(&self, id: &str, decision: Decision) -> Result<SessionSnapshot> {
        let id = Some(id.to_string());
        self.request(|reply| Command::Decide { id, decision, reply }).await
    }

    /// Record a decision for whatever item is current
    pub async fn decide_current(&self, decision: Decision) -> Result<SessionSnapshot> {
        self.request(|reply| Command::Decide {
            id: None,
            decision,
            reply,
        })
        .await
    }

    pub async fn navigate(&self, direction: Direction) -> Result<SessionSnapshot> {
        self.request(|reply| Command::Navigate { direction, reply })
            .await
    }

    pub async fn set_hide_decided(&self, hide_decided: bool) -> Result<SessionSnapshot> {
        self.request(|reply| Command::SetHideDecided { hide_decided, reply })
            .await
    }

    /// Go back to the first undecided item
    pub async fn restart(&self) -> Result<SessionSnapshot> {
        self.request(Command::Restart).await
    }

    /// Fetch the current item again after a failure or timeout
    pub async fn retry_current(&self) -> Result<SessionSnapshot> {
        self.request(Command::RetryCurrent).await
    }

    /// Current snapshot, after every command sent before it was handled
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(Command::Snapshot).await
    }

    /// Drop decisions for items the source no longer has
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.request(Command::Reconcile).await
    }

    /// Permanently remove every item marked deleted
    pub async fn purge_deleted(&self) -> Result<PurgeReport> {
        self.request(Command::PurgeDeleted).await?
    }

    /// Cached preview for `id`, starting a fetch if there is none yet
    pub async fn preview(&self, id: &str) -> Result<Option<Content>> {
        let id = id.to_string();
        self.request(|reply| Command::Preview { id, reply }).await
    }

    /// Latest published snapshot without a round trip
    pub fn latest(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that sees every snapshot published from now on
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Stop the session and hand back its store
    pub async fn close(self) -> Result<DecisionStore> {
        self.request(Command::Close).await
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::SessionClosed)?;
        response.await.map_err(|_| Error::SessionClosed)
    }
}

// ========== Actor ==========

/// Start a review session on the current tokio runtime.
///
/// The first thing the session does is reconcile stored decisions against
/// the source; commands sent meanwhile queue up behind it.
pub fn open(
    store: DecisionStore,
    sequence: ReviewSequence,
    source: Arc<dyn AssetSource>,
    config: CacheConfig,
    hide_decided: bool,
) -> (SessionHandle, JoinHandle<()>) {
    let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
    let (fetch_tx, fetch_events) = mpsc::unbounded_channel();
    let (storage_tx, storage_totals) = mpsc::unbounded_channel();

    let navigator = Navigator::open(sequence, hide_decided, &store);
    let cache = PrefetchCache::new(config, source.clone(), fetch_tx);
    let changes = source.subscribe_changes();

    let (snapshots, snapshot_rx) = watch::channel(build_snapshot(&store, &navigator, &cache));

    info!(
        total = navigator.sequence().len(),
        hide_decided, "📂 Review session opened"
    );
    let actor = SessionActor {
        store,
        navigator,
        cache,
        source,
        commands,
        fetch_events,
        storage_tx,
        storage_totals,
        scan_running: false,
        changes,
        snapshots,
    };
    let task = tokio::spawn(actor.run());

    (
        SessionHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        },
        task,
    )
}

struct SessionActor {
    store: DecisionStore,
    navigator: Navigator,
    cache: PrefetchCache,
    source: Arc<dyn AssetSource>,
    commands: mpsc::Receiver<Command>,
    fetch_events: mpsc::UnboundedReceiver<FetchEvent>,
    storage_tx: mpsc::UnboundedSender<StorageTotal>,
    storage_totals: mpsc::UnboundedReceiver<StorageTotal>,
    scan_running: bool,
    changes: Option<broadcast::Receiver<()>>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl SessionActor {
    async fn run(mut self) {
        self.reconcile().await;
        self.refresh_cache();
        self.start_kept_storage_scan();
        self.publish();

        let mut closing = None;
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Close(reply)) => {
                            closing = Some(reply);
                            break;
                        }
                        Some(command) => self.handle(command).await,
                        // Every handle is gone
                        None => break,
                    }
                }
                Some(event) = self.fetch_events.recv() => {
                    if self.cache.handle_event(event) {
                        self.publish();
                    }
                }
                Some(total) = self.storage_totals.recv() => {
                    self.on_kept_storage_total(total);
                }
                alive = next_change(&mut self.changes) => {
                    if alive {
                        self.on_source_changed().await;
                    } else {
                        debug!("Source change notifications closed");
                        self.changes = None;
                    }
                }
            }
        }

        self.cache.clear();
        if self.store.has_unsaved_changes() {
            // One last attempt; a failure is already logged
            self.store.save().ok();
        }
        info!("👋 Review session closed");

        if let Some(reply) = closing {
            if reply.send(self.store).is_err() {
                warn!("Session closed but nobody took the store");
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Decide { id, decision, reply } => {
                let id = id.or_else(|| self.navigator.current_id().map(str::to_owned));
                let snapshot = match id {
                    Some(id) => self.decide(&id, decision),
                    None => self.snapshot(),
                };
                reply.send(snapshot).ok();
            }
            Command::Navigate { direction, reply } => {
                self.navigator.advance(direction, &self.store);
                self.refresh_cache();
                reply.send(self.publish()).ok();
            }
            Command::SetHideDecided { hide_decided, reply } => {
                self.navigator.on_filter_toggled(hide_decided, &self.store);
                self.refresh_cache();
                reply.send(self.publish()).ok();
            }
            Command::Restart(reply) => {
                self.navigator.restart(&self.store);
                self.refresh_cache();
                reply.send(self.publish()).ok();
            }
            Command::RetryCurrent(reply) => {
                self.cache.retry_current();
                reply.send(self.publish()).ok();
            }
            Command::Snapshot(reply) => {
                reply.send(self.snapshot()).ok();
            }
            Command::Reconcile(reply) => {
                let report = self.reconcile().await;
                self.refresh_cache();
                self.start_kept_storage_scan();
                self.publish();
                reply.send(report).ok();
            }
            Command::PurgeDeleted(reply) => {
                let result = self.purge_deleted().await;
                self.publish();
                reply.send(result).ok();
            }
            Command::Preview { id, reply } => {
                reply.send(self.cache.preview(&id)).ok();
            }
            // Handled by the loop, which owns shutdown
            Command::Close(_) => {}
        }
    }

    // ========== Transitions ==========

    /// Store first, then navigation, then the cache window
    fn decide(&mut self, id: &str, decision: Decision) -> SessionSnapshot {
        if let Err(e) = self.store.set_decision(id, decision) {
            // The in-memory decision stands; the next save retries
            warn!(id = %id, error = %e, "Decision not persisted");
        }

        if decision.is_decided() && self.navigator.current_id() == Some(id) {
            self.navigator.advance_after_decision(id, &self.store);
        }

        self.refresh_cache();
        self.start_kept_storage_scan();
        self.publish()
    }

    /// Re-aim the cache at the current item and make sure it is loading
    fn refresh_cache(&mut self) {
        let visible = self.navigator.visible(&self.store);
        let current = self.navigator.current_id().map(str::to_owned);
        self.cache.on_position_changed(current.as_deref(), &visible);
        if let Some(current) = current {
            self.cache.get(&current);
        }
    }

    async fn reconcile(&mut self) -> ReconcileReport {
        let decided = self.store.decided_ids();
        if decided.is_empty() {
            return ReconcileReport::default();
        }

        let existing = self.source.existing(&decided).await;
        let report = self.store.reconcile(|id| existing.contains(id));
        if !report.is_empty() {
            info!(
                kept = report.removed_kept.len(),
                deleted = report.removed_deleted.len(),
                "🧹 Dropped decisions for items that no longer exist"
            );
            self.navigator.retire(report.removed(), &self.store);
        }
        report
    }

    async fn purge_deleted(&mut self) -> Result<PurgeReport> {
        // Only this session's items; the store may hold other folders' decisions
        let sequence = self.navigator.sequence();
        let ids: HashSet<AssetId> = self
            .store
            .deleted_ids()
            .into_iter()
            .filter(|id| sequence.contains(id))
            .collect();
        if ids.is_empty() {
            debug!("Nothing marked deleted, purge skipped");
            return Ok(PurgeReport::default());
        }

        // Files already missing still leave Deleted, but are not counted
        let listed: Vec<AssetId> = ids.iter().cloned().collect();
        let present = self.source.existing(&listed).await;
        let mut bytes = 0;
        for id in &present {
            bytes += self.source.byte_size(id).await.unwrap_or(0);
        }

        info!(
            count = present.len(),
            missing = ids.len() - present.len(),
            bytes,
            "🗑️  Purging deleted items"
        );
        if !present.is_empty() {
            if let Err(e) = self.source.purge(&present).await {
                warn!(error = %e, "Purge not confirmed, decisions left unchanged");
                return Err(match e {
                    Error::Purge(_) => e,
                    other => Error::Purge(other.to_string()),
                });
            }
        }

        let kept = self.store.kept_ids();
        let kept_existing = self.source.existing(&kept).await;
        let report = PurgeReport {
            items_purged: present.len() as u64,
            bytes_freed: bytes,
        };
        let applied = self.store.commit_purge(
            &ids,
            report.items_purged,
            report.bytes_freed,
            |id| kept_existing.contains(id),
        );

        let vanished_kept: HashSet<AssetId> = kept
            .into_iter()
            .filter(|id| !kept_existing.contains(id))
            .collect();
        self.navigator
            .retire(ids.iter().chain(vanished_kept.iter()), &self.store);
        self.refresh_cache();
        self.start_kept_storage_scan();

        if applied {
            Ok(report)
        } else {
            Ok(PurgeReport::default())
        }
    }

    async fn on_source_changed(&mut self) {
        // Coalesce a burst of notifications into one reconcile
        if let Some(changes) = self.changes.as_mut() {
            while changes.try_recv().is_ok() {}
        }

        debug!("Source changed, reconciling");
        let report = self.reconcile().await;
        if !report.is_empty() {
            self.refresh_cache();
            self.start_kept_storage_scan();
            self.publish();
        }
    }

    // ========== Kept storage ==========

    fn start_kept_storage_scan(&mut self) {
        if self.scan_running {
            return;
        }
        let Some(scan) = self.store.begin_kept_storage_scan() else {
            return;
        };

        self.scan_running = true;
        let source = self.source.clone();
        let totals = self.storage_tx.clone();
        tokio::spawn(async move {
            let mut bytes = 0;
            for id in &scan.ids {
                bytes += source.byte_size(id).await.unwrap_or(0);
            }
            // The session may have closed meanwhile
            totals
                .send(StorageTotal {
                    generation: scan.generation,
                    bytes,
                })
                .ok();
        });
    }

    fn on_kept_storage_total(&mut self, total: StorageTotal) {
        self.scan_running = false;
        if self.store.finish_kept_storage_scan(total.generation, total.bytes) {
            self.publish();
        } else {
            // Kept set changed while scanning
            self.start_kept_storage_scan();
        }
    }

    // ========== Snapshots ==========

    fn snapshot(&self) -> SessionSnapshot {
        build_snapshot(&self.store, &self.navigator, &self.cache)
    }

    fn publish(&self) -> SessionSnapshot {
        let snapshot = self.snapshot();
        self.snapshots.send_replace(snapshot.clone());
        snapshot
    }
}

fn build_snapshot(
    store: &DecisionStore,
    navigator: &Navigator,
    cache: &PrefetchCache,
) -> SessionSnapshot {
    let (position, visible_count) = navigator.position(store);
    let current_id = navigator.current_id().map(str::to_owned);
    let current_decision = current_id
        .as_deref()
        .map(|id| store.decision(id))
        .unwrap_or_default();

    SessionSnapshot {
        current_id,
        position,
        visible_count,
        total_count: navigator.sequence().len(),
        current_decision,
        hide_decided: navigator.hide_decided(),
        phase: navigator.phase(),
        content: cache.current_state(),
        stats: store.stats(),
        unsaved_changes: store.has_unsaved_changes(),
    }
}

/// Resolves when the source reports a change: `true` for a change (a
/// lagged receiver missed some, which is still a change), `false` once the
/// sender is gone. Never resolves without a receiver.
async fn next_change(changes: &mut Option<broadcast::Receiver<()>>) -> bool {
    match changes {
        Some(receiver) => match receiver.recv().await {
            Ok(()) | Err(RecvError::Lagged(_)) => true,
            Err(RecvError::Closed) => false,
        },
        None => std::future::pending().await,
    }
}

/// Sliding-window prefetch cache
///
/// Holds full-resolution content for the items around the current one and
/// small previews for a wider range. Fetches run as background tasks and
/// report back through a channel; only the owner of the cache (the session
/// task) ever changes its maps, so a window shift can never interleave
/// with an insert.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::window::CacheWindow;
use crate::config::CacheConfig;
use crate::source::traits::{AssetSource, Content, FullFetch};
use crate::state::data::AssetId;

/// Why a fetch was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// The item on screen; subject to the fetch timeout
    Current,
    /// An item just ahead of the current one
    Speculative,
    /// A small rendition
    Preview,
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Degraded stand-in, the fetch is still running
    Placeholder(Content),
    Loaded(Content),
    Failed(String),
    TimedOut,
}

impl FetchOutcome {
    fn is_terminal(&self) -> bool {
        !matches!(self, FetchOutcome::Placeholder(_))
    }
}

/// Message from a fetch task back to the cache owner
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub ticket: u64,
    pub id: AssetId,
    pub kind: FetchKind,
    pub outcome: FetchOutcome,
}

/// Load state of the current item, as shown to the user
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ContentState {
    /// Nothing is current
    #[default]
    Idle,
    Loading,
    /// Still loading, but a low-fidelity version can be shown
    Placeholder(Content),
    Ready(Content),
    /// Load failed or timed out; the user can skip or retry
    Failed(String),
}

impl ContentState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ContentState::Ready(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ContentState::Failed(_))
    }
}

struct CurrentLoad {
    id: AssetId,
    /// Ticket of the timed fetch started for this item, if any
    ticket: Option<u64>,
    state: ContentState,
}

/// A spawned fetch; aborting it drops the source stream mid-read
struct InFlight {
    id: AssetId,
    kind: FetchKind,
    task: AbortHandle,
}

pub struct PrefetchCache {
    config: CacheConfig,
    source: Arc<dyn AssetSource>,
    events: mpsc::UnboundedSender<FetchEvent>,
    window: Option<CacheWindow>,
    full: HashMap<AssetId, Content>,
    previews: HashMap<AssetId, Content>,
    in_flight: HashMap<u64, InFlight>,
    current: Option<CurrentLoad>,
    next_ticket: u64,
}

impl PrefetchCache {
    /// `events` is where fetch tasks report; its receiver belongs to the owner
    pub fn new(
        config: CacheConfig,
        source: Arc<dyn AssetSource>,
        events: mpsc::UnboundedSender<FetchEvent>,
    ) -> Self {
        Self {
            config,
            source,
            events,
            window: None,
            full: HashMap::new(),
            previews: HashMap::new(),
            in_flight: HashMap::new(),
            current: None,
            next_ticket: 0,
        }
    }

    /// Move the window to `center` within `visible`.
    ///
    /// Everything outside the new window is dropped before this returns.
    /// Then up to `prefetch_ahead` upcoming items that are neither cached
    /// nor already loading get a speculative fetch. A `None` center (or one
    /// that is not visible) empties the cache.
    pub fn on_position_changed(&mut self, center: Option<&str>, visible: &[AssetId]) {
        let window = center.and_then(|c| CacheWindow::around(c, visible, &self.config));
        let Some(window) = window else {
            self.clear();
            return;
        };

        let before = self.full.len() + self.previews.len();
        self.full.retain(|id, _| window.contains_full(id));
        self.previews.retain(|id, _| window.contains_preview(id));
        let evicted = before - self.full.len() - self.previews.len();
        if evicted > 0 {
            debug!(evicted, center = window.center(), "Evicted content outside window");
        }

        if self
            .current
            .as_ref()
            .is_some_and(|current| current.id != window.center())
        {
            // Whatever was loading for the old item is superseded
            if let Some(ticket) = self.current.take().and_then(|c| c.ticket) {
                self.cancel(ticket);
            }
        }

        // Speculative work only ever covers the next few items
        let stale: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, f)| match f.kind {
                FetchKind::Speculative => !window.upcoming().contains(&f.id),
                FetchKind::Preview => !window.contains_preview(&f.id),
                FetchKind::Current => false,
            })
            .map(|(ticket, _)| *ticket)
            .collect();
        if !stale.is_empty() {
            debug!(cancelled = stale.len(), "Cancelled fetches left behind by the window");
        }
        for ticket in stale {
            self.cancel(ticket);
        }

        let upcoming: Vec<AssetId> = window
            .upcoming()
            .iter()
            .filter(|id| !self.full.contains_key(*id) && !self.is_loading_full(id))
            .cloned()
            .collect();
        self.window = Some(window);

        for id in upcoming {
            self.spawn_full(id, FetchKind::Speculative);
        }
    }

    /// Content state for `id`, the item being displayed.
    ///
    /// If it is not cached yet this starts a dedicated fetch bounded by the
    /// fetch timeout, separate from any speculative fetch of the same item.
    pub fn get(&mut self, id: &str) -> ContentState {
        if let Some(current) = self.current.as_mut().filter(|c| c.id == id) {
            if let Some(content) = self.full.get(id) {
                current.state = ContentState::Ready(content.clone());
            }
            return current.state.clone();
        }

        let state = match self.full.get(id) {
            Some(content) => ContentState::Ready(content.clone()),
            None => ContentState::Loading,
        };
        let ticket = match state {
            ContentState::Loading => Some(self.spawn_full(id.to_string(), FetchKind::Current)),
            _ => None,
        };
        self.current = Some(CurrentLoad {
            id: id.to_string(),
            ticket,
            state: state.clone(),
        });
        state
    }

    /// Start over on a current item whose load failed
    pub fn retry_current(&mut self) -> ContentState {
        let Some(current) = self.current.as_ref() else {
            return ContentState::Idle;
        };
        if !current.state.is_failed() {
            return current.state.clone();
        }
        let id = current.id.clone();
        self.current = None;
        self.get(&id)
    }

    /// State of the current item without starting anything
    pub fn current_state(&self) -> ContentState {
        self.current
            .as_ref()
            .map(|c| c.state.clone())
            .unwrap_or_default()
    }

    /// Cached preview for `id`, or start loading one if `id` is in the window
    pub fn preview(&mut self, id: &str) -> Option<Content> {
        if let Some(content) = self.previews.get(id) {
            return Some(content.clone());
        }

        let in_window = self.window.as_ref().is_some_and(|w| w.contains_preview(id));
        let loading = self
            .in_flight
            .values()
            .any(|f| f.id == id && f.kind == FetchKind::Preview);
        if in_window && !loading {
            self.spawn_preview(id.to_string());
        }
        None
    }

    /// Apply a message from a fetch task.
    ///
    /// Returns true when the current item's state changed.
    pub fn handle_event(&mut self, event: FetchEvent) -> bool {
        let live = self
            .in_flight
            .get(&event.ticket)
            .is_some_and(|f| f.id == event.id);
        if !live {
            debug!(id = %event.id, ticket = event.ticket, "Ignoring result of a cancelled fetch");
            return false;
        }
        if event.outcome.is_terminal() {
            self.in_flight.remove(&event.ticket);
        }

        match event.kind {
            FetchKind::Preview => {
                if let FetchOutcome::Loaded(content) = event.outcome {
                    if self.window.as_ref().is_some_and(|w| w.contains_preview(&event.id)) {
                        self.previews.insert(event.id, content);
                    } else {
                        debug!(id = %event.id, "Discarding preview outside window");
                    }
                }
                false
            }
            FetchKind::Current | FetchKind::Speculative => self.handle_full_event(event),
        }
    }

    fn handle_full_event(&mut self, event: FetchEvent) -> bool {
        let FetchEvent {
            ticket,
            id,
            kind,
            outcome,
        } = event;

        match outcome {
            FetchOutcome::Placeholder(content) => match self.current_for(&id) {
                Some(current)
                    if matches!(
                        current.state,
                        ContentState::Loading | ContentState::Placeholder(_)
                    ) =>
                {
                    current.state = ContentState::Placeholder(content);
                    true
                }
                _ => false,
            },
            FetchOutcome::Loaded(content) => {
                if !self.window.as_ref().is_some_and(|w| w.contains_full(&id)) {
                    debug!(id = %id, "Discarding content that scrolled out of range");
                    return false;
                }
                self.full.insert(id.clone(), content.clone());
                match self.current_for(&id) {
                    Some(current) => {
                        current.state = ContentState::Ready(content);
                        true
                    }
                    None => false,
                }
            }
            FetchOutcome::Failed(reason) => self.fail_current(&id, ticket, kind, reason),
            FetchOutcome::TimedOut => {
                let reason = format!(
                    "timed out after {} ms",
                    self.config.fetch_timeout().as_millis()
                );
                self.fail_current(&id, ticket, kind, reason)
            }
        }
    }

    /// Only the timed fetch for the item still on screen can fail it
    fn fail_current(&mut self, id: &str, ticket: u64, kind: FetchKind, reason: String) -> bool {
        if kind != FetchKind::Current {
            debug!(id, reason = %reason, "Speculative fetch failed");
            return false;
        }
        match self.current_for(id) {
            Some(current) if current.ticket == Some(ticket) && !current.state.is_ready() => {
                warn!(id, reason = %reason, "Failed to load current item");
                current.state = ContentState::Failed(reason);
                true
            }
            _ => false,
        }
    }

    fn current_for(&mut self, id: &str) -> Option<&mut CurrentLoad> {
        self.current.as_mut().filter(|c| c.id == id)
    }

    fn is_loading_full(&self, id: &str) -> bool {
        self.in_flight
            .values()
            .any(|f| f.id == id && f.kind != FetchKind::Preview)
    }

    fn take_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    fn track(&mut self, ticket: u64, id: AssetId, kind: FetchKind, task: AbortHandle) {
        self.in_flight.insert(ticket, InFlight { id, kind, task });
    }

    fn cancel(&mut self, ticket: u64) {
        if let Some(fetch) = self.in_flight.remove(&ticket) {
            fetch.task.abort();
        }
    }

    fn spawn_full(&mut self, id: AssetId, kind: FetchKind) -> u64 {
        let ticket = self.take_ticket();
        let stream = self.source.fetch_full(&id);
        let events = self.events.clone();
        let limit = (kind == FetchKind::Current).then(|| self.config.fetch_timeout());
        debug!(id = %id, ?kind, ticket, "Fetching full content");

        let task_id = id.clone();
        let task = tokio::spawn(async move {
            let id = task_id;
            let run = forward_full(stream, ticket, id.clone(), kind, events.clone());
            match limit {
                Some(limit) => {
                    if tokio::time::timeout(limit, run).await.is_err() {
                        let _ = events.send(FetchEvent {
                            ticket,
                            id,
                            kind,
                            outcome: FetchOutcome::TimedOut,
                        });
                    }
                }
                None => run.await,
            }
        });
        self.track(ticket, id, kind, task.abort_handle());
        ticket
    }

    fn spawn_preview(&mut self, id: AssetId) {
        let ticket = self.take_ticket();
        let source = self.source.clone();
        let events = self.events.clone();
        let size = self.config.preview_size;
        let task_id = id.clone();

        let task = tokio::spawn(async move {
            let id = task_id;
            let outcome = match source.fetch_preview(&id, size).await {
                Ok(content) => FetchOutcome::Loaded(content),
                Err(e) => FetchOutcome::Failed(e.to_string()),
            };
            let _ = events.send(FetchEvent {
                ticket,
                id,
                kind: FetchKind::Preview,
                outcome,
            });
        });
        self.track(ticket, id, FetchKind::Preview, task.abort_handle());
    }

    /// Drop everything and stop every fetch; late completions are discarded
    pub fn clear(&mut self) {
        for (_, fetch) in self.in_flight.drain() {
            fetch.task.abort();
        }
        self.window = None;
        self.full.clear();
        self.previews.clear();
        self.current = None;
    }

    // ========== Introspection ==========

    pub fn window(&self) -> Option<&CacheWindow> {
        self.window.as_ref()
    }

    pub fn cached_full(&self, id: &str) -> Option<&Content> {
        self.full.get(id)
    }

    pub fn full_ids(&self) -> impl Iterator<Item = &AssetId> {
        self.full.keys()
    }

    pub fn preview_ids(&self) -> impl Iterator<Item = &AssetId> {
        self.previews.keys()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

/// Relay a full fetch into owner messages until it reaches a final result
async fn forward_full(
    mut stream: BoxStream<'static, FullFetch>,
    ticket: u64,
    id: AssetId,
    kind: FetchKind,
    events: mpsc::UnboundedSender<FetchEvent>,
) {
    let send = |outcome: FetchOutcome| {
        // The owner may be gone already
        let _ = events.send(FetchEvent {
            ticket,
            id: id.clone(),
            kind,
            outcome,
        });
    };

    while let Some(step) = stream.next().await {
        match step {
            FullFetch::Degraded(content) => send(FetchOutcome::Placeholder(content)),
            FullFetch::Final(content) => return send(FetchOutcome::Loaded(content)),
            FullFetch::Failed(reason) => return send(FetchOutcome::Failed(reason)),
        }
    }
    send(FetchOutcome::Failed("fetch ended without a result".to_string()));
}

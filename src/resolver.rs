use crate::debug;
use crate::error::{Result, ShareError};
use crate::values::Pose;
use ahash::AHashMap;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

/// Linger after the last session lock releases before tearing the session
/// down; back-to-back operations reuse the live session instead of
/// thrashing connect/disconnect.
pub const SESSION_LINGER: Duration = Duration::from_secs(3);

/// Delay before an updated pending-id set is applied to the watcher, so a
/// burst of find/detach calls produces one rebuild.
pub const WATCHER_DEBOUNCE: Duration = Duration::from_millis(250);

/// Pending id that means "search near the device" rather than by id.
pub const WILDCARD_ANCHOR_ID: &str = "";

#[derive(Debug, Clone, PartialEq)]
pub struct LocatedAnchor {
    pub anchor_id: String,
    pub pose: Pose,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchCriteria {
    ByIds(Vec<String>),
    NearDevice { max_distance_m: f32, max_results: u32 },
}

/// The anchor provider contract: session lifecycle, anchor CRUD, and a
/// single watcher scoped to one criteria set. Located anchors are fed back
/// through `AnchorResolver::handle_located`.
#[async_trait]
pub trait AnchorProvider: Send + Sync {
    async fn start_session(&self) -> bool;
    async fn stop_session(&self);
    async fn create_anchor(
        &self,
        pose: &Pose,
        properties: &AHashMap<String, String>,
        expiration: Option<Duration>,
    ) -> Result<String>;
    async fn update_anchor(&self, anchor_id: &str, properties: &AHashMap<String, String>) -> Result<()>;
    async fn delete_anchor(&self, anchor_id: &str) -> Result<()>;
    async fn start_watcher(&self, criteria: &SearchCriteria) -> Result<()>;
    async fn stop_watcher(&self);
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Per-call search timeout; `None` waits until located or cancelled.
    pub search_timeout: Option<Duration>,
    pub anchor_expiration: Option<Duration>,
    pub max_distance_m: f32,
    pub max_near_results: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            search_timeout: Some(Duration::from_secs(30)),
            anchor_expiration: Some(Duration::from_secs(7 * 24 * 60 * 60)),
            max_distance_m: 10.0,
            max_near_results: 20,
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.search_timeout = timeout;
        self
    }

    pub fn with_anchor_expiration(mut self, expiration: Option<Duration>) -> Self {
        self.anchor_expiration = expiration;
        self
    }

    pub fn with_near_device_limits(mut self, max_distance_m: f32, max_near_results: u32) -> Self {
        self.max_distance_m = max_distance_m;
        self.max_near_results = max_near_results;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Searching,
    Disconnecting,
}

struct FindEntry {
    ref_count: u32,
    result: watch::Sender<Option<LocatedAnchor>>,
}

struct ResolverInner {
    session: SessionState,
    lock_count: u32,
    activity_generation: u64,
    watcher_generation: u64,
    watcher_active: bool,
    connect_rx: Option<watch::Receiver<Option<bool>>>,
    teardown_rx: Option<watch::Receiver<bool>>,
    pending: AHashMap<String, FindEntry>,
}

/// Coordinates anchor searches against a shared underlying session:
/// multiplexes concurrent finds per id, debounces watcher rebuilds, and
/// reference-counts the session so it lingers across bursts of work.
pub struct AnchorResolver<P: AnchorProvider + 'static> {
    provider: Arc<P>,
    config: ResolverConfig,
    inner: Arc<Mutex<ResolverInner>>,
}

impl<P: AnchorProvider> Clone for AnchorResolver<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: AnchorProvider> AnchorResolver<P> {
    pub fn new(provider: Arc<P>, config: ResolverConfig) -> Self {
        Self {
            provider,
            config,
            inner: Arc::new(Mutex::new(ResolverInner {
                session: SessionState::Disconnected,
                lock_count: 0,
                activity_generation: 0,
                watcher_generation: 0,
                watcher_active: false,
                connect_rx: None,
                teardown_rx: None,
                pending: AHashMap::new(),
            })),
        }
    }

    pub fn state(&self) -> SessionState {
        self.lock().session
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, ResolverInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Waits for the anchor with `anchor_id` to be located.
    ///
    /// Concurrent callers for the same id share one pending entry and one
    /// underlying search. `Ok(None)` means timed out, cancelled, or session
    /// unavailable; callers degrade rather than fail. Dropping the returned
    /// future detaches this caller without disturbing co-waiters.
    pub async fn find(&self, anchor_id: &str) -> Result<Option<LocatedAnchor>> {
        if !self.connect_session().await {
            self.release_session();
            return Ok(None);
        }

        let (rx, is_first) = {
            let mut inner = self.lock();
            let is_first = !inner.pending.contains_key(anchor_id);
            let entry = inner.pending.entry(anchor_id.to_string()).or_insert_with(|| {
                let (tx, _) = watch::channel(None);
                FindEntry { ref_count: 0, result: tx }
            });
            entry.ref_count += 1;
            (entry.result.subscribe(), is_first)
        };

        debug::trace_find(&format!("find '{}' registered (first: {})", anchor_id, is_first));
        if is_first {
            self.schedule_watcher_refresh();
        }

        // Detach on every exit path, including future drop mid-await.
        let _guard = FindGuard {
            resolver: self.clone(),
            anchor_id: anchor_id.to_string(),
        };

        let found = match self.config.search_timeout {
            None => wait_for_result(rx).await,
            Some(timeout) => tokio::time::timeout(timeout, wait_for_result(rx))
                .await
                .ok()
                .flatten(),
        };

        Ok(found)
    }

    /// Shorthand for the near-device wildcard search.
    pub async fn find_nearest(&self) -> Result<Option<LocatedAnchor>> {
        self.find(WILDCARD_ANCHOR_ID).await
    }

    /// Entry point for the provider's located-anchor callback. Completes
    /// every caller waiting on this id and any wildcard waiters.
    pub fn handle_located(&self, anchor: LocatedAnchor) {
        debug::trace_find(&format!("located '{}'", anchor.anchor_id));
        let inner = self.lock();
        if let Some(entry) = inner.pending.get(&anchor.anchor_id) {
            let _ = entry.result.send(Some(anchor.clone()));
        }
        if let Some(entry) = inner.pending.get(WILDCARD_ANCHOR_ID) {
            let _ = entry.result.send(Some(anchor));
        }
    }

    /// Saves a new anchor at `pose`. A non-finite pose is a programming
    /// error and fails fast; provider failures degrade to `Ok(None)`.
    pub async fn save_anchor(
        &self,
        pose: &Pose,
        properties: &AHashMap<String, String>,
    ) -> Result<Option<String>> {
        if !pose.is_finite() {
            return Err(ShareError::InvalidArgument("anchor pose must be finite".to_string()));
        }

        if !self.connect_session().await {
            self.release_session();
            return Ok(None);
        }

        let result = self
            .provider
            .create_anchor(pose, properties, self.config.anchor_expiration)
            .await;
        self.release_session();

        match result {
            Ok(anchor_id) => Ok(Some(anchor_id)),
            Err(e) => {
                debug::trace_find(&format!("create anchor failed: {}", e));
                Ok(None)
            }
        }
    }

    /// Moves an anchor by creating a replacement at `pose` and then deleting
    /// the old one; returns the new id.
    pub async fn move_anchor(
        &self,
        anchor_id: &str,
        pose: &Pose,
        properties: &AHashMap<String, String>,
    ) -> Result<Option<String>> {
        if !pose.is_finite() {
            return Err(ShareError::InvalidArgument("anchor pose must be finite".to_string()));
        }

        // The replacement goes first; a create failure leaves the old anchor
        // in place instead of destroying it with nothing to show for it.
        let new_id = match self.save_anchor(pose, properties).await? {
            Some(id) => id,
            None => return Ok(None),
        };

        if !self.delete_anchor(anchor_id).await? {
            debug::trace_find(&format!("old anchor '{}' not deleted after move", anchor_id));
        }
        Ok(Some(new_id))
    }

    pub async fn update_anchor_properties(
        &self,
        anchor_id: &str,
        properties: &AHashMap<String, String>,
    ) -> Result<bool> {
        if !self.connect_session().await {
            self.release_session();
            return Ok(false);
        }

        let result = self.provider.update_anchor(anchor_id, properties).await;
        self.release_session();

        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                debug::trace_find(&format!("update anchor '{}' failed: {}", anchor_id, e));
                Ok(false)
            }
        }
    }

    pub async fn delete_anchor(&self, anchor_id: &str) -> Result<bool> {
        if !self.connect_session().await {
            self.release_session();
            return Ok(false);
        }

        let result = self.provider.delete_anchor(anchor_id).await;
        self.release_session();

        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                debug::trace_find(&format!("delete anchor '{}' failed: {}", anchor_id, e));
                Ok(false)
            }
        }
    }

    /// Acquires a session lock, sharing a single in-flight connect among
    /// concurrent callers. Returns false when the session is unavailable;
    /// callers treat that as "feature unavailable for this call".
    async fn connect_session(&self) -> bool {
        let shared_connect = {
            let mut inner = self.lock();
            inner.lock_count += 1;
            inner.activity_generation += 1;

            match inner.session {
                SessionState::Connected | SessionState::Searching => None,
                SessionState::Connecting => inner.connect_rx.clone(),
                SessionState::Disconnected | SessionState::Disconnecting => {
                    let teardown = inner.teardown_rx.clone();
                    let (tx, rx) = watch::channel(None);
                    inner.session = SessionState::Connecting;
                    inner.connect_rx = Some(rx.clone());

                    let provider = Arc::clone(&self.provider);
                    let state = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        // An in-flight teardown must finish before the
                        // replacement session starts; start and stop never
                        // run concurrently.
                        if let Some(mut done) = teardown {
                            while !*done.borrow() {
                                if done.changed().await.is_err() {
                                    break;
                                }
                            }
                        }
                        let connected = provider.start_session().await;
                        {
                            let mut inner =
                                state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                            inner.session = if connected {
                                SessionState::Connected
                            } else {
                                SessionState::Disconnected
                            };
                            inner.connect_rx = None;
                        }
                        if !connected {
                            debug::trace_find("session start failed");
                        }
                        let _ = tx.send(Some(connected));
                    });

                    Some(rx)
                }
            }
        };

        match shared_connect {
            None => true,
            Some(mut rx) => loop {
                let outcome = *rx.borrow();
                if let Some(connected) = outcome {
                    return connected;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            },
        }
    }

    /// Releases one session lock. When the count reaches zero the session
    /// is torn down after `SESSION_LINGER`, unless new activity arrives.
    fn release_session(&self) {
        let linger_generation = {
            let mut inner = self.lock();
            inner.lock_count = inner.lock_count.saturating_sub(1);
            if inner.lock_count > 0 {
                return;
            }
            inner.activity_generation += 1;
            inner.activity_generation
        };

        let resolver = self.clone();
        spawn_if_running(async move {
            tokio::time::sleep(SESSION_LINGER).await;
            resolver.teardown_if_idle(linger_generation).await;
        });
    }

    async fn teardown_if_idle(&self, linger_generation: u64) {
        let done_tx = {
            let mut inner = self.lock();
            let idle = inner.lock_count == 0
                && inner.activity_generation == linger_generation
                && matches!(inner.session, SessionState::Connected | SessionState::Searching);
            if !idle {
                return;
            }
            inner.session = SessionState::Disconnecting;
            let (tx, rx) = watch::channel(false);
            inner.teardown_rx = Some(rx);
            tx
        };

        debug::trace_find("session idle, tearing down");
        if self.lock().watcher_active {
            self.provider.stop_watcher().await;
        }
        self.provider.stop_session().await;

        {
            let mut inner = self.lock();
            inner.watcher_active = false;
            inner.teardown_rx = None;
            // A caller may have claimed the session for a reconnect while
            // the stop was in flight; its state advance must stand.
            if inner.session == SessionState::Disconnecting {
                inner.session = SessionState::Disconnected;
            }
        }
        let _ = done_tx.send(true);
    }

    fn detach(&self, anchor_id: &str) {
        let emptied = {
            let mut inner = self.lock();
            match inner.pending.get_mut(anchor_id) {
                Some(entry) => {
                    entry.ref_count -= 1;
                    if entry.ref_count == 0 {
                        inner.pending.remove(anchor_id);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if emptied {
            self.schedule_watcher_refresh();
        }
        self.release_session();
    }

    fn schedule_watcher_refresh(&self) {
        let generation = {
            let mut inner = self.lock();
            inner.watcher_generation += 1;
            inner.watcher_generation
        };

        let resolver = self.clone();
        spawn_if_running(async move {
            tokio::time::sleep(WATCHER_DEBOUNCE).await;
            resolver.apply_watcher(generation).await;
        });
    }

    async fn apply_watcher(&self, generation: u64) {
        let criteria = {
            let inner = self.lock();
            if inner.watcher_generation != generation {
                // Superseded by a newer refresh.
                return;
            }
            build_criteria(&inner.pending, &self.config)
        };

        match criteria {
            None => {
                debug::trace_watcher("stopping watcher, no pending ids");
                self.provider.stop_watcher().await;
                let mut inner = self.lock();
                inner.watcher_active = false;
                if inner.session == SessionState::Searching {
                    inner.session = SessionState::Connected;
                }
            }
            Some(criteria) => {
                debug::trace_watcher(&format!("rebuilding watcher: {:?}", criteria));
                match self.provider.start_watcher(&criteria).await {
                    Ok(()) => {
                        let mut inner = self.lock();
                        inner.watcher_active = true;
                        if inner.session == SessionState::Connected {
                            inner.session = SessionState::Searching;
                        }
                    }
                    Err(e) => debug::trace_watcher(&format!("watcher start failed: {}", e)),
                }
            }
        }
    }
}

/// A wildcard pending id switches the whole pass to near-device mode; the
/// distance/result limits apply only there, by design.
fn build_criteria(
    pending: &AHashMap<String, FindEntry>,
    config: &ResolverConfig,
) -> Option<SearchCriteria> {
    if pending.is_empty() {
        return None;
    }
    if pending.contains_key(WILDCARD_ANCHOR_ID) {
        return Some(SearchCriteria::NearDevice {
            max_distance_m: config.max_distance_m,
            max_results: config.max_near_results,
        });
    }
    let mut ids: Vec<String> = pending.keys().cloned().collect();
    ids.sort();
    Some(SearchCriteria::ByIds(ids))
}

async fn wait_for_result(mut rx: watch::Receiver<Option<LocatedAnchor>>) -> Option<LocatedAnchor> {
    loop {
        let current = rx.borrow().clone();
        if current.is_some() {
            return current;
        }
        if rx.changed().await.is_err() {
            return None;
        }
    }
}

// Guards can drop outside a runtime (e.g. when a caller's task is torn
// down); the refresh is skipped then and happens on the next activity.
fn spawn_if_running<F>(future: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(future);
    }
}

struct FindGuard<P: AnchorProvider + 'static> {
    resolver: AnchorResolver<P>,
    anchor_id: String,
}

impl<P: AnchorProvider> Drop for FindGuard<P> {
    fn drop(&mut self) {
        self.resolver.detach(&self.anchor_id);
    }
}

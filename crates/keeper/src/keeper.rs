//! # Keeper: one supervised task with ordered lifecycle phases.
//!
//! A keeper owns one concurrent task and any number of named child keepers.
//! Its lifetime mirrors a small process:
//!
//! ```text
//! start(parent)
//!   ├─► before handlers ──(ignored / panic)──► exit (no listen, no after)
//!   └─► loop {
//!         derive token from parent
//!         spawn every child bound to token
//!         listen handlers (block until they return)
//!         cancel token
//!         wait until every child reports stopped (backoff poll)
//!         restart requested && parent live ? continue : break
//!       }
//!       after handlers (once)
//!       auto-delete from parent, mark stopped
//! ```
//!
//! ## Rules
//! - A keeper cannot run twice: a second start fails with
//!   [`KeeperError::AlreadyStarted`] while the first is running.
//! - After handlers run only once the listen phase has exited **and** all
//!   children are stopped.
//! - A panic in any handler is caught, routed to the panic handler (or the
//!   `tracing` error sink) and treated as `ignored`; it never crosses into the
//!   parent or siblings.
//! - Children are held by the parent; the child keeps only a weak
//!   back-reference to its parent.
//! - Every parent iteration starts its children, even one cancelled before
//!   they were spawned, so child after handlers always run.
//! - A run whose future is dropped (an aborted task, a `start` raced in
//!   `select!`) still cancels its token, so its children stop too.

use crate::config::KeeperConfig;
use crate::error::KeeperError;
use crate::handler::{boxed, Handler, PanicHandler, PanicPayload, Phase};
use futures::FutureExt;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Observable lifecycle state of a keeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeeperState {
    /// Never started.
    NotStarted,
    /// Inside before/listen phases of the current iteration.
    Running,
    /// Token cancelled, waiting for children or running after handlers.
    Stopping,
    /// Terminated; may be started again.
    Stopped,
}

struct Inner {
    state: KeeperState,
    started: bool,
    restart: bool,
    token: Option<CancellationToken>,
    children: BTreeMap<String, Arc<Keeper>>,
    before: Vec<Handler>,
    listen: Vec<Handler>,
    after: Vec<Handler>,
    panic_handler: Option<PanicHandler>,
    parent: Weak<Keeper>,
    auto_delete: bool,
}

impl Inner {
    fn handlers(&self, phase: Phase) -> Vec<Handler> {
        match phase {
            Phase::Before => self.before.clone(),
            Phase::Listen => self.listen.clone(),
            Phase::After => self.after.clone(),
        }
    }
}

/// A named lifecycle unit in a supervision tree.
///
/// Keepers are always handled through `Arc<Keeper>`; registration methods
/// take `&self` and return `&Self` so they chain:
///
/// ```ignore
/// let keeper = Keeper::new("log-file-manager");
/// keeper
///     .listen(|token| async move { token.cancelled().await; false })
///     .after(|_| async { drain().await; false });
/// ```
pub struct Keeper {
    name: String,
    config: KeeperConfig,
    inner: Mutex<Inner>,
}

impl Keeper {
    /// Creates a keeper with the default [`KeeperConfig`].
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_config(name, KeeperConfig::default())
    }

    /// Creates a keeper with explicit teardown tuning.
    pub fn with_config(name: impl Into<String>, config: KeeperConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: KeeperState::NotStarted,
                started: false,
                restart: false,
                token: None,
                children: BTreeMap::new(),
                before: Vec::new(),
                listen: Vec::new(),
                after: Vec::new(),
                panic_handler: None,
                parent: Weak::new(),
                auto_delete: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Critical sections never leave `Inner` half-updated.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the keeper name (unique among its siblings).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> KeeperState {
        self.lock().state
    }

    /// Returns `true` iff the keeper is not currently started.
    pub fn stopped(&self) -> bool {
        !self.lock().started
    }

    // =========================================================================
    // Handler registration
    // =========================================================================

    /// Registers a before handler.
    ///
    /// Runs once per start. Returning `true` (or panicking) skips the listen
    /// and after phases entirely.
    pub fn before<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.lock().before.push(boxed(f));
        self
    }

    /// Registers a listen handler.
    ///
    /// Runs once per iteration of the run loop, i.e. on start and on every
    /// restart. Should return when its token is cancelled.
    pub fn listen<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.lock().listen.push(boxed(f));
        self
    }

    /// Registers an after handler.
    ///
    /// Runs once, after the run loop exits and every child is stopped.
    pub fn after<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.lock().after.push(boxed(f));
        self
    }

    /// Sets the panic handler, replacing any previous one.
    pub fn on_panic<F>(&self, f: F) -> &Self
    where
        F: Fn(&CancellationToken, &PanicPayload) + Send + Sync + 'static,
    {
        self.lock().panic_handler = Some(Arc::new(f));
        self
    }

    /// When enabled, the keeper removes itself from its parent on exit.
    pub fn auto_delete(&self, enabled: bool) -> &Self {
        self.lock().auto_delete = enabled;
        self
    }

    // =========================================================================
    // Children
    // =========================================================================

    /// Registers `child` under its name.
    ///
    /// Returns `false` if a child with that name already exists. A child added
    /// while this keeper runs is started on the next iteration of the run loop.
    pub fn add(self: &Arc<Self>, child: &Arc<Keeper>) -> bool {
        if Arc::ptr_eq(self, child) {
            return false;
        }

        let mut inner = self.lock();
        if inner.children.contains_key(child.name()) {
            return false;
        }

        child.lock().parent = Arc::downgrade(self);
        inner.children.insert(child.name.clone(), Arc::clone(child));
        true
    }

    /// Removes `child` from the child set.
    ///
    /// Returns `false` if `child` itself is not registered. Another keeper
    /// registered under the same name stays in place.
    pub fn del(&self, child: &Keeper) -> bool {
        let removed = {
            let mut inner = self.lock();
            let registered = inner
                .children
                .get(child.name())
                .is_some_and(|entry| std::ptr::eq(Arc::as_ptr(entry), child));
            if registered {
                inner.children.remove(child.name())
            } else {
                None
            }
        };
        match removed {
            Some(removed) => {
                let mut inner = removed.lock();
                if std::ptr::eq(inner.parent.as_ptr(), self) {
                    inner.parent = Weak::new();
                }
                true
            }
            None => false,
        }
    }

    /// Returns the child registered under `name`.
    pub fn child(&self, name: &str) -> Option<Arc<Keeper>> {
        self.lock().children.get(name).cloned()
    }

    /// Returns the names of all registered children, sorted.
    pub fn children(&self) -> Vec<String> {
        self.lock().children.keys().cloned().collect()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Runs the keeper on the current task until it terminates.
    ///
    /// Fails fast when already running or when `parent` is already cancelled.
    pub async fn start(self: &Arc<Self>, parent: CancellationToken) -> Result<(), KeeperError> {
        let token = self.claim(&parent, false)?;
        Arc::clone(self).run(parent, token).await;
        Ok(())
    }

    /// Claims the keeper synchronously and runs it on a new tokio task.
    ///
    /// Once this returns `Ok`, [`stopped`](Self::stopped) is `false` until
    /// the spawned run finishes its after handlers.
    pub fn spawn(self: &Arc<Self>, parent: &CancellationToken) -> Result<JoinHandle<()>, KeeperError> {
        self.spawn_with(parent, false)
    }

    fn spawn_with(
        self: &Arc<Self>,
        parent: &CancellationToken,
        accept_cancelled: bool,
    ) -> Result<JoinHandle<()>, KeeperError> {
        let token = self.claim(parent, accept_cancelled)?;
        let keeper = Arc::clone(self);
        Ok(tokio::spawn(keeper.run(parent.clone(), token)))
    }

    /// Cancels the current iteration and re-enters the run loop.
    ///
    /// After handlers do not run. No-op when the keeper is not running.
    pub fn restart(&self) {
        let mut inner = self.lock();
        if let Some(token) = inner.token.clone().filter(|t| !t.is_cancelled()) {
            inner.restart = true;
            token.cancel();
        }
    }

    /// Cancels the current iteration and lets the run loop fall through to
    /// the after handlers.
    ///
    /// A pending restart request is dropped, so `stop` wins over a racing
    /// [`restart`](Self::restart).
    pub fn stop(&self) {
        let mut inner = self.lock();
        if !inner.started {
            return;
        }
        inner.restart = false;
        if let Some(token) = &inner.token {
            token.cancel();
        }
    }

    fn claim(
        &self,
        parent: &CancellationToken,
        accept_cancelled: bool,
    ) -> Result<CancellationToken, KeeperError> {
        let mut inner = self.lock();
        if inner.started {
            return Err(KeeperError::AlreadyStarted {
                name: self.name.clone(),
            });
        }
        if parent.is_cancelled() && !accept_cancelled {
            return Err(KeeperError::Cancelled {
                name: self.name.clone(),
            });
        }

        let token = parent.child_token();
        inner.started = true;
        inner.restart = false;
        inner.state = KeeperState::Running;
        inner.token = Some(token.clone());
        Ok(token)
    }

    async fn run(self: Arc<Self>, parent: CancellationToken, first: CancellationToken) {
        // Resets the started flag even if a panic handler unwinds.
        let _finish = FinishGuard(&self);
        debug!(keeper = %self.name, "keeper started");

        if self.run_phase(Phase::Before, &first).await {
            debug!(keeper = %self.name, "keeper start skipped by before handler");
            return;
        }

        let mut token = first;
        loop {
            self.spawn_children(&token);
            self.run_phase(Phase::Listen, &token).await;

            token.cancel();
            self.lock().state = KeeperState::Stopping;
            self.wait_children().await;

            match self.next_iteration(&parent) {
                Some(next) => {
                    debug!(keeper = %self.name, "keeper restarting");
                    token = next;
                }
                None => break,
            }
        }

        self.run_phase(Phase::After, &parent).await;
    }

    /// Consumes a restart request and derives the next iteration's token.
    fn next_iteration(&self, parent: &CancellationToken) -> Option<CancellationToken> {
        let mut inner = self.lock();
        if !std::mem::take(&mut inner.restart) || parent.is_cancelled() {
            return None;
        }

        let token = parent.child_token();
        inner.token = Some(token.clone());
        inner.state = KeeperState::Running;
        Some(token)
    }

    /// Starts every child on `token`.
    ///
    /// An iteration cancelled before its children were spawned still starts
    /// them, so each child runs its after handlers once per parent iteration.
    fn spawn_children(&self, token: &CancellationToken) {
        let children: Vec<Arc<Keeper>> = self.lock().children.values().cloned().collect();
        for child in children {
            if let Err(e) = child.spawn_with(token, true) {
                warn!(keeper = %self.name, child = %child.name, error = %e, "start child failed");
            }
        }
    }

    async fn wait_children(&self) {
        let mut delay = self.config.child_poll_initial;
        loop {
            let children: Vec<Arc<Keeper>> = self.lock().children.values().cloned().collect();
            if children.iter().all(|child| child.stopped()) {
                return;
            }
            tokio::time::sleep(delay).await;
            delay = self.config.next_poll(delay);
        }
    }

    /// Runs one handler list in registration order. Returns `ignored`.
    async fn run_phase(&self, phase: Phase, token: &CancellationToken) -> bool {
        let handlers = self.lock().handlers(phase);

        for handler in handlers {
            let call = async { handler(token.clone()).await };
            match AssertUnwindSafe(call).catch_unwind().await {
                Ok(false) => {}
                Ok(true) => return true,
                Err(panic) => {
                    let payload = PanicPayload::from_any(&*panic);
                    self.report_panic(phase, token, &payload);
                    return true;
                }
            }
        }
        false
    }

    fn report_panic(&self, phase: Phase, token: &CancellationToken, payload: &PanicPayload) {
        let handler = self.lock().panic_handler.clone();
        match handler {
            Some(handler) => handler(token, payload),
            None => error!(
                keeper = %self.name,
                phase = phase.as_str(),
                panic = %payload,
                "keeper runtime fatal"
            ),
        }
    }

    fn finish(&self) {
        let parent = {
            let inner = self.lock();
            if inner.auto_delete {
                inner.parent.upgrade()
            } else {
                None
            }
        };
        if let Some(parent) = parent {
            parent.del(self);
        }

        let mut inner = self.lock();
        // A run dropped mid-iteration leaves its token live; children bound
        // to it must still stop.
        if let Some(token) = inner.token.take() {
            token.cancel();
        }
        inner.started = false;
        inner.restart = false;
        inner.state = KeeperState::Stopped;
        drop(inner);
        debug!(keeper = %self.name, "keeper stopped");
    }
}

impl std::fmt::Debug for Keeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Keeper")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("children", &inner.children.keys().collect::<Vec<_>>())
            .finish()
    }
}

struct FinishGuard<'a>(&'a Keeper);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

//! Conversation engine.
//!
//! Composes the durable session, the item ledger, the lifecycle monitor and
//! the stream controller. Every ledger mutation is followed by a synchronous
//! whole-history snapshot, so a crash at any point loses at most the frame
//! being applied.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};

use crate::assets::{AssetCache, AssetDispatcher};
use crate::config::EngineConfig;
use crate::credentials::{CredentialProvider, Credentials};
use crate::error::{Error, Result};
use crate::ledger::{Item, ItemLedger};
use crate::lifecycle::{LifecycleAction, LifecycleMonitor, LifecyclePolicy, Staleness, Visibility};
use crate::session::{Session, SessionSnapshot};
use crate::storage::SessionStore;
use crate::stream::{PushTransport, StreamController, StreamEndpoints, StreamState, StreamStep};

/// Time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut current) = self.now.lock() {
            *current = now;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut current) = self.now.lock() {
            *current += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
            .lock()
            .map(|now| *now)
            .unwrap_or_else(|_| Utc::now())
    }
}

/// What the engine did in response to a lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// Nothing needed doing.
    Unchanged,
    /// The incomplete tail item was reattached.
    Resumed { item_id: String },
    /// A reattachment was due but could not be attempted.
    ResumeSkipped { reason: String },
    /// History, stage and activity were cleared.
    Reset,
}

/// Which ledger the open connection feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feed {
    Conversation,
    Document,
}

/// One conversation session driven by a push stream.
pub struct ConversationEngine {
    session: Session,
    ledger: ItemLedger,
    documents: ItemLedger,
    monitor: LifecycleMonitor,
    controller: StreamController,
    credentials: Arc<dyn CredentialProvider>,
    assets: Option<AssetDispatcher>,
    clock: Arc<dyn Clock>,
    feed: Feed,
}

impl ConversationEngine {
    /// Open the current session of `store` and restore its history.
    pub fn open(
        config: &EngineConfig,
        store: Arc<dyn SessionStore>,
        transport: Arc<dyn PushTransport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let session = Session::open(store)?;
        Self::with_session(config.lifecycle_policy(), endpoints(config), session, transport, credentials)
    }

    /// Bind to an explicit session.
    pub fn with_session(
        policy: LifecyclePolicy,
        endpoints: StreamEndpoints,
        session: Session,
        transport: Arc<dyn PushTransport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let ledger = ItemLedger::hydrate(session.load_history()?);
        let monitor = LifecycleMonitor::new(policy, session.stage()?, session.last_active_at()?);
        info!(
            "Opened session {} with {} items (stage {})",
            session.id(),
            ledger.len(),
            monitor.stage()
        );
        let controller = StreamController::new(session.id(), transport, endpoints);
        Ok(Self {
            session,
            ledger,
            documents: ItemLedger::new(),
            monitor,
            controller,
            credentials,
            assets: None,
            clock: Arc::new(SystemClock),
            feed: Feed::Conversation,
        })
    }

    /// Fetch assets referenced by incoming items.
    pub fn with_assets(mut self, dispatcher: AssetDispatcher) -> Self {
        self.assets = Some(dispatcher);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The view mounted (process start or page load).
    ///
    /// A stale mount counts as a reattachment. A mount of a session that was
    /// already mounted before is a reload: an interrupted tail item is
    /// resumed without counting a reattachment. The tail is resumed at most
    /// once per mount.
    pub fn mount(&mut self) -> Result<LifecycleOutcome> {
        let now = self.clock.now();
        let previous_mount = self.session.mark_mounted(now)?;
        let has_tail = self.ledger.incomplete_tail().is_some();
        let action = self.monitor.on_mount(now, has_tail);
        debug!(
            "Mounted session {} (reload: {}, action: {:?})",
            self.session.id(),
            previous_mount.is_some(),
            action
        );

        match action {
            LifecycleAction::None if previous_mount.is_some() && has_tail => {
                self.persist_lifecycle()?;
                info!("Reload of session {} with an interrupted item", self.session.id());
                self.lifecycle_resume(now)
            }
            action => self.carry_out(action, now),
        }
    }

    /// The view was hidden or shown again.
    pub fn on_visibility(&mut self, visibility: Visibility) -> Result<LifecycleOutcome> {
        let now = self.clock.now();
        let has_tail = self.ledger.incomplete_tail().is_some();
        let action = self.monitor.on_visibility(visibility, now, has_tail);
        self.carry_out(action, now)
    }

    /// Submit a query: append the user item, create the produced item and
    /// open the stream.
    pub fn send(&mut self, query: &str) -> Result<Item> {
        let credentials = self.require_credentials()?;
        if self.controller.state().is_open() {
            return Err(Error::Busy(format!(
                "session {} is still streaming",
                self.session.id()
            )));
        }
        if let Some(stale) = self.ledger.incomplete_tail().map(|i| i.id.clone()) {
            warn!(
                "Abandoning interrupted item {} in session {}",
                stale,
                self.session.id()
            );
            self.ledger.mark_completed(&stale)?;
        }

        self.ledger.append_user(query);
        self.monitor.on_user_send(self.clock.now());
        self.feed = Feed::Conversation;
        let started = self.controller.start(&mut self.ledger, query, &credentials);
        self.persist_history()?;
        self.persist_lifecycle()?;
        started
    }

    /// Reattach to the interrupted tail item on request.
    pub fn resume(&mut self) -> Result<Item> {
        let credentials = self.require_credentials()?;
        let user = self
            .ledger
            .last_user_item()
            .cloned()
            .ok_or(Error::NothingToResume)?;
        let item = self.controller.resume(&self.ledger, &user, &credentials)?;
        self.feed = Feed::Conversation;
        Ok(item)
    }

    /// Open a document feed. Records land in [`ConversationEngine::documents`],
    /// replacing the previous document.
    pub fn load_document(&mut self, document_id: &str) -> Result<()> {
        let credentials = self.require_credentials()?;
        if self.controller.state().is_open() {
            return Err(Error::Busy(format!(
                "session {} is still streaming",
                self.session.id()
            )));
        }
        self.documents.clear();
        self.feed = Feed::Document;
        self.controller.open_feed(document_id, &credentials)
    }

    /// Read and apply the next frame. `None` when no stream is open.
    pub async fn next_update(&mut self) -> Option<Result<StreamStep>> {
        let ledger = match self.feed {
            Feed::Conversation => &mut self.ledger,
            Feed::Document => &mut self.documents,
        };
        let step = self.controller.next_step(ledger).await?;
        Some(self.after_step(step))
    }

    /// Apply frames until the stream completes or fails.
    pub async fn drive(&mut self) -> Result<()> {
        while let Some(step) = self.next_update().await {
            step?;
        }
        Ok(())
    }

    /// Close the stream. The tail item keeps its completion flag.
    pub fn stop(&mut self) -> Result<()> {
        self.controller.stop();
        self.monitor.settle(self.clock.now());
        self.persist_lifecycle()
    }

    /// Drop the connection and clear history, stage and activity.
    pub fn reset(&mut self) -> Result<()> {
        self.controller.stop();
        self.ledger.clear();
        self.documents.clear();
        self.session.clear()?;
        self.monitor = LifecycleMonitor::new(self.monitor.policy(), 0, None);
        Ok(())
    }

    pub fn items(&self) -> &[Item] {
        self.ledger.items()
    }

    /// Records of the last loaded document.
    pub fn documents(&self) -> &[Item] {
        self.documents.items()
    }

    pub fn state(&self) -> &StreamState {
        self.controller.state()
    }

    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    pub fn stage(&self) -> u32 {
        self.monitor.stage()
    }

    pub fn staleness(&self) -> Staleness {
        self.monitor.state()
    }

    pub fn assets(&self) -> Option<&AssetCache> {
        self.assets.as_ref().map(|d| d.cache())
    }

    pub fn snapshot(&self) -> Result<SessionSnapshot> {
        self.session.snapshot()
    }

    fn after_step(&mut self, step: Result<StreamStep>) -> Result<StreamStep> {
        let now = self.clock.now();
        match step {
            Ok(step) => {
                if self.feed == Feed::Conversation && step.mutated_ledger() {
                    self.persist_history()?;
                }
                self.dispatch_assets(&step);
                if matches!(step, StreamStep::Completed { .. }) {
                    self.monitor.settle(now);
                    self.persist_lifecycle()?;
                }
                Ok(step)
            }
            Err(e) => {
                self.monitor.settle(now);
                self.persist_lifecycle()?;
                Err(e)
            }
        }
    }

    fn dispatch_assets(&self, step: &StreamStep) {
        let (Some(dispatcher), names) = (self.assets.as_ref(), step.assets()) else {
            return;
        };
        if names.is_empty() {
            return;
        }
        match self.credentials.current_credentials() {
            Some(credentials) => {
                dispatcher.dispatch(names, &credentials);
            }
            None => debug!("Skipping {} asset fetches without credentials", names.len()),
        }
    }

    fn carry_out(&mut self, action: LifecycleAction, now: DateTime<Utc>) -> Result<LifecycleOutcome> {
        match action {
            LifecycleAction::None => {
                self.persist_lifecycle()?;
                Ok(LifecycleOutcome::Unchanged)
            }
            LifecycleAction::Resume => {
                self.persist_lifecycle()?;
                self.lifecycle_resume(now)
            }
            LifecycleAction::Reset => {
                self.controller.stop();
                self.ledger.clear();
                self.session.clear()?;
                self.persist_lifecycle()?;
                Ok(LifecycleOutcome::Reset)
            }
        }
    }

    fn lifecycle_resume(&mut self, now: DateTime<Utc>) -> Result<LifecycleOutcome> {
        let Some(credentials) = self.credentials.current_credentials() else {
            return self.skip_resume(now, "no credentials");
        };
        let Some(user) = self.ledger.last_user_item().cloned() else {
            return self.skip_resume(now, "no query to resume");
        };
        if self.controller.state().is_open() {
            // A connection still open into the tail item has stalled; a
            // document feed is left running.
            let stalled_tail = self
                .ledger
                .incomplete_tail()
                .is_some_and(|tail| self.controller.target_item() == Some(tail.id.as_str()));
            if !stalled_tail {
                return self.skip_resume(now, "stream already open");
            }
            info!(
                "Reattaching stalled stream of session {}",
                self.session.id()
            );
            self.controller.stop();
        }

        match self.controller.resume(&self.ledger, &user, &credentials) {
            Ok(item) => {
                self.feed = Feed::Conversation;
                Ok(LifecycleOutcome::Resumed { item_id: item.id })
            }
            Err(e) => {
                self.monitor.settle(now);
                self.persist_lifecycle()?;
                Err(e)
            }
        }
    }

    fn skip_resume(&mut self, now: DateTime<Utc>, reason: &str) -> Result<LifecycleOutcome> {
        debug!("Not resuming session {}: {}", self.session.id(), reason);
        self.monitor.settle(now);
        self.persist_lifecycle()?;
        Ok(LifecycleOutcome::ResumeSkipped {
            reason: reason.to_string(),
        })
    }

    fn require_credentials(&self) -> Result<Credentials> {
        self.credentials
            .current_credentials()
            .ok_or(Error::NotAuthenticated)
    }

    fn persist_history(&self) -> Result<()> {
        self.session.save_history(self.ledger.items())
    }

    fn persist_lifecycle(&self) -> Result<()> {
        self.session.set_stage(self.monitor.stage())?;
        if let Some(at) = self.monitor.last_active_at() {
            self.session.set_last_active_at(at)?;
        }
        Ok(())
    }
}

fn endpoints(config: &EngineConfig) -> StreamEndpoints {
    StreamEndpoints {
        stream: config.stream.endpoint.clone(),
        document: config.stream.document_endpoint.clone(),
    }
}

// Dashboard session - single owner of one dashboard's widget state
//
// All layout math and reducer transitions happen inside the session task, one
// command at a time. Only persistence calls run concurrently; their outcomes
// come back to the task as `Settled` commands.
use crate::application::cache_coordinator::CacheCoordinator;
use crate::application::errors::{SyncError, SyncResult};
use crate::application::widget_repository::WidgetRepository;
use crate::domain::dashboard::DashboardView;
use crate::domain::grid::GridConfiguration;
use crate::domain::mutation_gate::{commit_drag, commit_resizes, GateDecision};
use crate::domain::placement::allocate_among;
use crate::domain::sync::{
    ExpiryCause, LocalMutation, MutationKind, RealtimeEvent, SyncEvent, SyncState,
};
use crate::domain::widget::{
    new_slot_id, new_widget_id, LayoutItem, SizeSpec, Widget, WidgetContent, WidgetKind,
    WidgetPatch,
};
use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Pending mutations older than this are rolled back.
    pub pending_timeout: Duration,
    pub sweep_interval: Duration,
    /// A session with no commands, pending mutations or viewers for this
    /// long stops itself.
    pub idle_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            pending_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Wall clock anchored at session start and advanced by tokio time, so
/// pending deadlines follow a paused or advanced runtime clock.
struct SessionClock {
    wall: DateTime<Utc>,
    started: Instant,
}

impl SessionClock {
    fn start() -> Self {
        Self {
            wall: Utc::now(),
            started: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        TimeDelta::from_std(self.started.elapsed())
            .ok()
            .and_then(|elapsed| self.wall.checked_add_signed(elapsed))
            .unwrap_or_else(Utc::now)
    }
}

enum Persist {
    Create(Widget),
    Update { widget_id: String, patch: WidgetPatch },
    Delete { widget_id: String },
}

impl Persist {
    fn kind(&self) -> MutationKind {
        match self {
            Persist::Create(_) => MutationKind::Create,
            Persist::Update { .. } => MutationKind::Update,
            Persist::Delete { .. } => MutationKind::Delete,
        }
    }

    fn widget_id(&self) -> &str {
        match self {
            Persist::Create(widget) => &widget.id,
            Persist::Update { widget_id, .. } | Persist::Delete { widget_id } => widget_id,
        }
    }
}

struct Settlement {
    kind: MutationKind,
    widget_id: String,
    result: anyhow::Result<Option<Widget>>,
}

async fn persist(
    repository: &dyn WidgetRepository,
    dashboard_id: &str,
    op: Persist,
) -> anyhow::Result<Option<Widget>> {
    match op {
        Persist::Create(widget) => repository.create_widget(dashboard_id, &widget).await.map(Some),
        Persist::Update { widget_id, patch } => repository
            .update_widget(dashboard_id, &widget_id, &patch)
            .await
            .map(Some),
        Persist::Delete { widget_id } => repository
            .delete_widget(dashboard_id, &widget_id)
            .await
            .map(|_| None),
    }
}

/// Immediate (optimistic) result of a command plus the persistence outcome.
struct Submission<T> {
    value: T,
    settled: Option<oneshot::Receiver<SyncResult<()>>>,
}

type Reply<T> = oneshot::Sender<SyncResult<Submission<T>>>;

enum Command {
    AddWidget {
        kind: WidgetKind,
        reply: Reply<Widget>,
    },
    CommitDrag {
        layout: Vec<LayoutItem>,
        reply: Reply<Vec<(String, GateDecision)>>,
    },
    CommitResize {
        requests: Vec<(String, u32, u32)>,
        reply: Reply<GateDecision>,
    },
    UpdateContent {
        widget_id: String,
        content: WidgetContent,
        reply: Reply<Widget>,
    },
    DeleteWidget {
        widget_id: String,
        reply: Reply<()>,
    },
    Settled {
        settlements: Vec<Settlement>,
        done: oneshot::Sender<SyncResult<()>>,
    },
}

/// Command channel into a running session.
#[derive(Clone)]
pub struct DashboardHandle {
    dashboard_id: String,
    commands: mpsc::Sender<Command>,
    view: Arc<watch::Sender<DashboardView>>,
}

impl DashboardHandle {
    pub fn dashboard_id(&self) -> &str {
        &self.dashboard_id
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Latest reconciled view, optimistic edits included.
    pub fn snapshot(&self) -> DashboardView {
        self.view.borrow().clone()
    }

    /// Watch the view. Open subscriptions keep an idle session alive.
    pub fn subscribe(&self) -> watch::Receiver<DashboardView> {
        self.view.subscribe()
    }

    /// Place a new widget of `kind` in the first free cell.
    pub async fn add_widget(&self, kind: WidgetKind) -> SyncResult<Widget> {
        self.request(|reply| Command::AddWidget { kind, reply }).await
    }

    pub async fn commit_drag(
        &self,
        layout: Vec<LayoutItem>,
    ) -> SyncResult<Vec<(String, GateDecision)>> {
        self.request(|reply| Command::CommitDrag { layout, reply }).await
    }

    pub async fn commit_resize(&self, slot: &str, w: u32, h: u32) -> SyncResult<GateDecision> {
        self.commit_resizes(vec![(slot.to_string(), w, h)]).await
    }

    /// Resize several slots, each checked against the result of the previous one.
    pub async fn commit_resizes(
        &self,
        requests: Vec<(String, u32, u32)>,
    ) -> SyncResult<GateDecision> {
        self.request(|reply| Command::CommitResize { requests, reply }).await
    }

    pub async fn update_content(
        &self,
        widget_id: &str,
        content: WidgetContent,
    ) -> SyncResult<Widget> {
        let widget_id = widget_id.to_string();
        self.request(|reply| Command::UpdateContent {
            widget_id,
            content,
            reply,
        })
        .await
    }

    pub async fn delete_widget(&self, widget_id: &str) -> SyncResult<()> {
        let widget_id = widget_id.to_string();
        self.request(|reply| Command::DeleteWidget { widget_id, reply }).await
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> SyncResult<T> {
        let closed = || SyncError::SessionClosed(self.dashboard_id.clone());
        let (reply, response) = oneshot::channel();
        self.commands.send(make(reply)).await.map_err(|_| closed())?;
        let submission = response.await.map_err(|_| closed())??;
        if let Some(settled) = submission.settled {
            settled.await.map_err(|_| closed())??;
        }
        Ok(submission.value)
    }
}

pub struct DashboardSession {
    dashboard_id: String,
    user_id: String,
    state: SyncState,
    grid: GridConfiguration,
    settings: SessionSettings,
    repository: Arc<dyn WidgetRepository>,
    cache: CacheCoordinator,
    view: Arc<watch::Sender<DashboardView>>,
    // Weak so in-flight persistence does not keep the command channel open.
    commands: mpsc::WeakSender<Command>,
    clock: SessionClock,
    last_activity: Instant,
}

impl DashboardSession {
    /// Start a session task over `widgets` and return its handle.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        dashboard_id: String,
        user_id: String,
        widgets: Vec<Widget>,
        events: BoxStream<'static, RealtimeEvent>,
        grid: GridConfiguration,
        settings: SessionSettings,
        repository: Arc<dyn WidgetRepository>,
        cache: CacheCoordinator,
    ) -> DashboardHandle {
        let state = SyncState::new(widgets, grid.primary_columns());
        let initial = DashboardView::new(dashboard_id.clone(), state.widgets().to_vec(), &grid, 0);
        let (view, _) = watch::channel(initial);
        let view = Arc::new(view);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);

        let session = DashboardSession {
            dashboard_id: dashboard_id.clone(),
            user_id,
            state,
            grid,
            settings,
            repository,
            cache,
            view: view.clone(),
            commands: command_tx.downgrade(),
            clock: SessionClock::start(),
            last_activity: Instant::now(),
        };
        tokio::spawn(session.run(command_rx, events));

        DashboardHandle {
            dashboard_id,
            commands: command_tx,
            view,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: BoxStream<'static, RealtimeEvent>,
    ) {
        let mut sweep = tokio::time::interval(self.settings.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut realtime_open = true;

        tracing::info!(
            dashboard_id = %self.dashboard_id,
            widgets = self.state.widgets().len(),
            "session started"
        );

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        self.last_activity = Instant::now();
                        self.handle(command).await;
                    }
                    None => break,
                },
                event = events.next(), if realtime_open => match event {
                    Some(event) => self.on_remote(event).await,
                    None => {
                        tracing::warn!(dashboard_id = %self.dashboard_id, "realtime stream ended");
                        realtime_open = false;
                    }
                },
                _ = sweep.tick() => {
                    self.sweep();
                    if self.is_idle() {
                        tracing::info!(dashboard_id = %self.dashboard_id, "session idle");
                        break;
                    }
                }
            }
        }

        tracing::info!(dashboard_id = %self.dashboard_id, "session stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::AddWidget { kind, reply } => {
                let widget = self.place_new(kind);
                let settled = self.submit(vec![(
                    LocalMutation::Create(widget.clone()),
                    Persist::Create(widget.clone()),
                )]);
                let _ = reply.send(Ok(Submission { value: widget, settled }));
            }
            Command::CommitDrag { layout, reply } => {
                let cols = self.state.columns();
                let outcome = commit_drag(self.state.widgets(), &layout, cols);
                let batch = self.updates_for(outcome.changed().cloned().collect());
                let settled = self.submit(batch);
                let _ = reply.send(Ok(Submission {
                    value: outcome.decisions,
                    settled,
                }));
            }
            Command::CommitResize { requests, reply } => {
                let cols = self.state.columns();
                let outcome = commit_resizes(self.state.widgets(), &requests, cols);
                let changed: Vec<Widget> = outcome
                    .widgets
                    .into_iter()
                    .zip(self.state.widgets())
                    .filter(|(next, before)| next != *before)
                    .map(|(next, _)| next)
                    .collect();
                let batch = self.updates_for(changed);
                let settled = self.submit(batch);
                let _ = reply.send(Ok(Submission {
                    value: outcome.decision,
                    settled,
                }));
            }
            Command::UpdateContent {
                widget_id,
                content,
                reply,
            } => {
                let result = match self.state.find(&widget_id) {
                    Some(current) if current.kind() == content.kind() => {
                        let updated = Widget {
                            content,
                            ..current.clone()
                        };
                        let batch = self.updates_for(vec![updated.clone()]);
                        let settled = self.submit(batch);
                        Ok(Submission { value: updated, settled })
                    }
                    Some(_) => Err(SyncError::KindChange(widget_id)),
                    None => Err(SyncError::UnknownWidget(widget_id)),
                };
                let _ = reply.send(result);
            }
            Command::DeleteWidget { widget_id, reply } => {
                let result = if self.state.find(&widget_id).is_some() {
                    let settled = self.submit(vec![(
                        LocalMutation::Delete {
                            widget_id: widget_id.clone(),
                        },
                        Persist::Delete { widget_id },
                    )]);
                    Ok(Submission { value: (), settled })
                } else {
                    Err(SyncError::UnknownWidget(widget_id))
                };
                let _ = reply.send(result);
            }
            Command::Settled { settlements, done } => {
                let result = self.settle(settlements).await;
                let _ = done.send(result);
            }
        }
    }

    fn place_new(&self, kind: WidgetKind) -> Widget {
        let cols = self.state.columns();
        let size = SizeSpec::for_kind(kind, cols);
        let rect = allocate_among(self.state.widgets(), size.w, size.h, kind, cols);
        tracing::debug!(
            ?kind,
            x = rect.x,
            y = rect.y,
            w = rect.w,
            h = rect.h,
            "placed new widget"
        );

        let layout = LayoutItem {
            i: new_slot_id(),
            x: rect.x,
            y: rect.y,
            w: rect.w,
            h: rect.h,
            min_w: size.min_w,
            max_w: None,
            min_h: size.min_h,
            max_h: None,
            is_resizable: true,
        };
        Widget::new(new_widget_id(), layout, WidgetContent::placeholder(kind))
    }

    fn updates_for(&self, changed: Vec<Widget>) -> Vec<(LocalMutation, Persist)> {
        changed
            .into_iter()
            .filter_map(|next| {
                let before = self.state.find(&next.id)?;
                let patch = WidgetPatch::between(before, &next);
                let persist = Persist::Update {
                    widget_id: next.id.clone(),
                    patch,
                };
                Some((LocalMutation::Update(next), persist))
            })
            .collect()
    }

    /// Apply mutations optimistically, publish, then persist in the background.
    fn submit(
        &mut self,
        batch: Vec<(LocalMutation, Persist)>,
    ) -> Option<oneshot::Receiver<SyncResult<()>>> {
        if batch.is_empty() {
            return None;
        }

        let Some(commands) = self.commands.upgrade() else {
            tracing::warn!(dashboard_id = %self.dashboard_id, "session closing, mutation dropped");
            return None;
        };

        let now = self.clock.now();
        let mut ops = Vec::with_capacity(batch.len());
        for (mutation, persist) in batch {
            self.state.reduce(SyncEvent::LocalMutationSubmitted { mutation, at: now });
            ops.push(persist);
        }
        self.publish();

        let (done, settled) = oneshot::channel();
        let repository = self.repository.clone();
        let dashboard_id = self.dashboard_id.clone();
        let deadline = self.settings.pending_timeout;

        tokio::spawn(async move {
            let settlements = futures::future::join_all(ops.into_iter().map(|op| {
                let repository = repository.clone();
                let dashboard_id = dashboard_id.clone();
                async move {
                    let kind = op.kind();
                    let widget_id = op.widget_id().to_string();
                    let persisted = persist(&*repository, &dashboard_id, op);
                    let result = match tokio::time::timeout(deadline, persisted).await {
                        Ok(result) => result,
                        Err(_) => Err(anyhow::anyhow!("persistence timed out after {deadline:?}")),
                    };
                    Settlement {
                        kind,
                        widget_id,
                        result,
                    }
                }
            }))
            .await;

            if commands.send(Command::Settled { settlements, done }).await.is_err() {
                tracing::warn!(%dashboard_id, "session closed before persistence settled");
            }
        });

        Some(settled)
    }

    async fn settle(&mut self, settlements: Vec<Settlement>) -> SyncResult<()> {
        let mut failure = None;
        let mut confirmed_any = false;

        for settlement in settlements {
            match settlement.result {
                Ok(record) => {
                    confirmed_any = true;
                    self.state.reduce(SyncEvent::LocalMutationConfirmed {
                        kind: settlement.kind,
                        widget_id: settlement.widget_id,
                        record,
                    });
                }
                Err(e) => {
                    tracing::error!(
                        dashboard_id = %self.dashboard_id,
                        widget_id = %settlement.widget_id,
                        kind = ?settlement.kind,
                        error = %e,
                        "persistence failed"
                    );
                    self.state.reduce(SyncEvent::LocalMutationExpired {
                        kind: settlement.kind,
                        widget_id: settlement.widget_id,
                        cause: ExpiryCause::PersistenceFailed,
                    });
                    failure.get_or_insert(e);
                }
            }
        }
        self.publish();

        if confirmed_any {
            self.cache.invalidate_scope(&self.dashboard_id, &self.user_id).await;
        }

        match failure {
            Some(e) => Err(SyncError::Persistence(e)),
            None => Ok(()),
        }
    }

    async fn on_remote(&mut self, event: RealtimeEvent) {
        if event.dashboard_id != self.dashboard_id {
            return;
        }
        tracing::debug!(
            dashboard_id = %self.dashboard_id,
            widget_id = %event.widget.id,
            op = ?event.op,
            "realtime event"
        );
        if self.state.reduce(SyncEvent::RemoteEventReceived(event)) {
            self.cache.invalidate_scope(&self.dashboard_id, &self.user_id).await;
        }
        self.publish();
    }

    fn sweep(&mut self) {
        let timeout = TimeDelta::from_std(self.settings.pending_timeout).unwrap_or(TimeDelta::MAX);
        let expired = self.state.expire_stale(self.clock.now(), timeout);
        if !expired.is_empty() {
            tracing::warn!(
                dashboard_id = %self.dashboard_id,
                count = expired.len(),
                "pending mutations timed out"
            );
            self.publish();
        }
    }

    fn is_idle(&self) -> bool {
        self.state.pending().is_empty()
            && self.view.receiver_count() == 0
            && self.last_activity.elapsed() >= self.settings.idle_timeout
    }

    fn publish(&self) {
        let next = DashboardView::new(
            self.dashboard_id.clone(),
            self.state.widgets().to_vec(),
            &self.grid,
            self.state.pending().len(),
        );
        self.view.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

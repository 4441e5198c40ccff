// Optimistic update tracking and realtime reconciliation as an explicit reducer
use super::collision::collides_with_widgets;
use super::placement::allocate;
use super::widget::{new_slot_id, Rect, Widget, WidgetKind};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeOp {
    Insert,
    Update,
    Delete,
}

impl From<RealtimeOp> for MutationKind {
    fn from(op: RealtimeOp) -> Self {
        match op {
            RealtimeOp::Insert => MutationKind::Create,
            RealtimeOp::Update => MutationKind::Update,
            RealtimeOp::Delete => MutationKind::Delete,
        }
    }
}

/// Backend-originated change, delivered at least once and possibly out of order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeEvent {
    pub op: RealtimeOp,
    pub dashboard_id: String,
    pub widget: Widget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    pub kind: MutationKind,
    pub widget_id: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocalMutation {
    Create(Widget),
    Update(Widget),
    Delete { widget_id: String },
}

impl LocalMutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            LocalMutation::Create(_) => MutationKind::Create,
            LocalMutation::Update(_) => MutationKind::Update,
            LocalMutation::Delete { .. } => MutationKind::Delete,
        }
    }

    pub fn widget_id(&self) -> &str {
        match self {
            LocalMutation::Create(widget) | LocalMutation::Update(widget) => &widget.id,
            LocalMutation::Delete { widget_id } => widget_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryCause {
    Timeout,
    PersistenceFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    LocalMutationSubmitted {
        mutation: LocalMutation,
        at: DateTime<Utc>,
    },
    LocalMutationConfirmed {
        kind: MutationKind,
        widget_id: String,
        record: Option<Widget>,
    },
    LocalMutationExpired {
        kind: MutationKind,
        widget_id: String,
        cause: ExpiryCause,
    },
    RemoteEventReceived(RealtimeEvent),
}

/// One dashboard's widget state as seen by a single client.
///
/// `view` is what gets rendered, optimistic edits included. `confirmed` is the
/// last state known to be persisted and is the rollback target for expired
/// mutations.
#[derive(Debug, Clone)]
pub struct SyncState {
    view: Vec<Widget>,
    confirmed: Vec<Widget>,
    pending: Vec<PendingMutation>,
    cols: u32,
}

impl SyncState {
    pub fn new(widgets: Vec<Widget>, cols: u32) -> Self {
        let mut state = Self {
            view: Vec::with_capacity(widgets.len()),
            confirmed: Vec::with_capacity(widgets.len()),
            pending: Vec::new(),
            cols,
        };
        for widget in widgets {
            let placed = state.place_in_view(widget);
            upsert(&mut state.confirmed, placed);
        }
        state
    }

    pub fn widgets(&self) -> &[Widget] {
        &self.view
    }

    #[cfg(test)]
    pub fn confirmed(&self) -> &[Widget] {
        &self.confirmed
    }

    pub fn pending(&self) -> &[PendingMutation] {
        &self.pending
    }

    pub fn columns(&self) -> u32 {
        self.cols
    }

    pub fn find(&self, widget_id: &str) -> Option<&Widget> {
        self.view.iter().find(|w| w.id == widget_id)
    }

    /// Apply one event. Returns whether the rendered view changed.
    pub fn reduce(&mut self, event: SyncEvent) -> bool {
        let before = self.view.clone();
        match event {
            SyncEvent::LocalMutationSubmitted { mutation, at } => self.submit(mutation, at),
            SyncEvent::LocalMutationConfirmed {
                kind,
                widget_id,
                record,
            } => self.confirm(kind, &widget_id, record),
            SyncEvent::LocalMutationExpired {
                kind,
                widget_id,
                cause,
            } => self.expire(kind, &widget_id, cause),
            SyncEvent::RemoteEventReceived(event) => self.receive(event),
        }
        self.view != before
    }

    /// Expire every pending mutation submitted at or before `now - timeout`.
    pub fn expire_stale(&mut self, now: DateTime<Utc>, timeout: TimeDelta) -> Vec<PendingMutation> {
        let stale: Vec<PendingMutation> = self
            .pending
            .iter()
            .filter(|p| {
                p.submitted_at
                    .checked_add_signed(timeout)
                    .is_some_and(|deadline| deadline <= now)
            })
            .cloned()
            .collect();
        for mutation in &stale {
            self.reduce(SyncEvent::LocalMutationExpired {
                kind: mutation.kind,
                widget_id: mutation.widget_id.clone(),
                cause: ExpiryCause::Timeout,
            });
        }
        stale
    }

    fn submit(&mut self, mutation: LocalMutation, at: DateTime<Utc>) {
        let kind = mutation.kind();
        let widget_id = mutation.widget_id().to_string();
        match mutation {
            LocalMutation::Create(widget) => upsert(&mut self.view, widget),
            LocalMutation::Update(widget) => {
                if !replace(&mut self.view, widget) {
                    tracing::debug!(widget_id = %widget_id, "update for unknown widget ignored");
                    return;
                }
            }
            LocalMutation::Delete { widget_id } => {
                if !remove(&mut self.view, &widget_id) {
                    return;
                }
            }
        }
        self.pending.push(PendingMutation {
            kind,
            widget_id,
            submitted_at: at,
        });
    }

    fn take_pending(&mut self, kind: MutationKind, widget_id: &str) -> Option<PendingMutation> {
        let index = self
            .pending
            .iter()
            .position(|p| p.kind == kind && p.widget_id == widget_id)?;
        Some(self.pending.remove(index))
    }

    fn has_pending(&self, widget_id: &str) -> bool {
        self.pending.iter().any(|p| p.widget_id == widget_id)
    }

    fn confirm(&mut self, kind: MutationKind, widget_id: &str, record: Option<Widget>) {
        if self.take_pending(kind, widget_id).is_none() {
            // Nothing in flight (already expired or never ours): the record is
            // simply the backend's current truth.
            match (kind, record) {
                (MutationKind::Delete, _) => self.apply_external_delete(widget_id),
                (_, Some(record)) => self.apply_external_upsert(record),
                (_, None) => {}
            }
            return;
        }

        match kind {
            MutationKind::Delete => {
                remove(&mut self.confirmed, widget_id);
            }
            MutationKind::Create | MutationKind::Update => {
                let record = record.or_else(|| self.find(widget_id).cloned());
                let Some(record) = record else { return };
                if self.has_pending(widget_id) {
                    let slot = resolve_slot(&self.confirmed, &record);
                    upsert(&mut self.confirmed, Widget {
                        layout: record.layout.clone().with_slot(slot),
                        ..record
                    });
                } else {
                    let placed = self.place_in_view(record);
                    upsert(&mut self.confirmed, placed);
                }
            }
        }
    }

    fn expire(&mut self, kind: MutationKind, widget_id: &str, cause: ExpiryCause) {
        if self.take_pending(kind, widget_id).is_none() {
            return;
        }
        tracing::warn!(widget_id, ?kind, ?cause, "rolling back optimistic mutation");

        match self.confirmed.iter().find(|w| w.id == widget_id).cloned() {
            Some(snapshot) => {
                let exists = self.view.iter().any(|w| w.id == widget_id);
                let placed = self.place_in_view(snapshot);
                if !exists {
                    self.restore_order(&placed.id);
                }
            }
            None => {
                remove(&mut self.view, widget_id);
            }
        }
    }

    fn receive(&mut self, event: RealtimeEvent) {
        let kind = MutationKind::from(event.op);
        if self.pending.iter().any(|p| p.kind == kind && p.widget_id == event.widget.id) {
            let widget_id = event.widget.id.clone();
            self.confirm(kind, &widget_id, Some(event.widget));
            return;
        }

        match event.op {
            RealtimeOp::Delete => self.apply_external_delete(&event.widget.id),
            RealtimeOp::Insert | RealtimeOp::Update => self.apply_external_upsert(event.widget),
        }
    }

    fn apply_external_upsert(&mut self, record: Widget) {
        if self.has_pending(&record.id) {
            // A local edit is in flight; keep it on screen and only move the
            // rollback target.
            let slot = resolve_slot(&self.confirmed, &record);
            upsert(&mut self.confirmed, Widget {
                layout: record.layout.clone().with_slot(slot),
                ..record
            });
            return;
        }
        let placed = self.place_in_view(record);
        upsert(&mut self.confirmed, placed);
    }

    fn apply_external_delete(&mut self, widget_id: &str) {
        remove(&mut self.view, widget_id);
        remove(&mut self.confirmed, widget_id);
        self.pending.retain(|p| p.widget_id != widget_id);
    }

    /// Insert or replace `record` in the view, keeping slot ids unique and the
    /// view collision-free. Returns the widget as placed.
    fn place_in_view(&mut self, record: Widget) -> Widget {
        let slot = resolve_slot(&self.view, &record);
        let mut widget = Widget {
            layout: record.layout.clone().with_slot(slot),
            ..record
        };

        let others: Vec<Widget> = self
            .view
            .iter()
            .filter(|w| w.id != widget.id)
            .cloned()
            .collect();
        let kind = widget.kind();
        let rect = widget.rect();
        let misaligned_text = kind.is_text() && (rect.x != 0 || rect.w != self.cols);
        let clashes = collides_with_widgets(&rect, kind, &others, None);
        if !rect.fits(self.cols) || misaligned_text || clashes {
            let occupied: Vec<(Rect, WidgetKind)> =
                others.iter().map(|w| (w.rect(), w.kind())).collect();
            let placed = allocate(&occupied, rect.w, rect.h, kind, self.cols);
            tracing::debug!(
                widget_id = %widget.id,
                x = placed.x,
                y = placed.y,
                "relocated incoming widget"
            );
            widget.layout = widget.layout.with_rect(placed);
        }

        upsert(&mut self.view, widget.clone());
        widget
    }

    /// Move a re-inserted widget back to its position relative to the confirmed order.
    fn restore_order(&mut self, widget_id: &str) {
        let rank = |id: &str| self.confirmed.iter().position(|w| w.id == id);
        let Some(target) = rank(widget_id) else { return };
        let Some(current) = self.view.iter().position(|w| w.id == widget_id) else { return };

        let widget = self.view.remove(current);
        let index = self
            .view
            .iter()
            .position(|w| rank(&w.id).is_some_and(|r| r > target))
            .unwrap_or(self.view.len());
        self.view.insert(index, widget);
    }
}

/// Slot id for `record` within `list`: its own unless another widget holds it.
fn resolve_slot(list: &[Widget], record: &Widget) -> String {
    let taken = list
        .iter()
        .any(|w| w.id != record.id && w.layout.i == record.layout.i);
    if !taken {
        return record.layout.i.clone();
    }
    match list.iter().find(|w| w.id == record.id) {
        Some(existing) => existing.layout.i.clone(),
        None => {
            let slot = new_slot_id();
            tracing::debug!(
                widget_id = %record.id,
                from = %record.layout.i,
                to = %slot,
                "re-keyed layout slot"
            );
            slot
        }
    }
}

fn upsert(list: &mut Vec<Widget>, widget: Widget) {
    if !replace(list, widget.clone()) {
        list.push(widget);
    }
}

fn replace(list: &mut [Widget], widget: Widget) -> bool {
    match list.iter_mut().find(|w| w.id == widget.id) {
        Some(slot) => {
            if *slot != widget {
                *slot = widget;
            }
            true
        }
        None => false,
    }
}

fn remove(list: &mut Vec<Widget>, widget_id: &str) -> bool {
    let before = list.len();
    list.retain(|w| w.id != widget_id);
    list.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::collision::conflicts;
    use crate::domain::placement::MAX_SCAN_ROWS;
    use crate::domain::widget::{KpiData, LayoutItem, WidgetContent};

    fn widget(id: &str, kind: WidgetKind, rect: Rect) -> Widget {
        let layout = LayoutItem {
            i: format!("slot-{}", id),
            x: rect.x,
            y: rect.y,
            w: rect.w,
            h: rect.h,
            min_w: None,
            max_w: None,
            min_h: None,
            max_h: None,
            is_resizable: true,
        };
        Widget::new(id.to_string(), layout, WidgetContent::placeholder(kind))
    }

    fn event(op: RealtimeOp, widget: Widget) -> SyncEvent {
        SyncEvent::RemoteEventReceived(RealtimeEvent {
            op,
            dashboard_id: "dash".to_string(),
            widget,
        })
    }

    fn submitted(mutation: LocalMutation) -> SyncEvent {
        SyncEvent::LocalMutationSubmitted {
            mutation,
            at: Utc::now(),
        }
    }

    fn assert_collision_free(state: &SyncState) {
        let widgets = state.widgets();
        for (n, a) in widgets.iter().enumerate() {
            for b in widgets.iter().skip(n + 1) {
                assert!(
                    !conflicts(&a.rect(), a.kind(), &b.rect(), b.kind()),
                    "{} overlaps {}",
                    a.id,
                    b.id
                );
                assert_ne!(a.layout.i, b.layout.i);
            }
        }
    }

    #[test]
    fn test_remote_insert_with_overflowing_geometry_is_placed_on_grid() {
        let first = widget("a", WidgetKind::Kpi, Rect::new(0, 0, 3, 2));
        let mut state = SyncState::new(vec![first], 12);

        let incoming = [
            widget("far", WidgetKind::Kpi, Rect::new(u32::MAX, 0, 3, 2)),
            widget("wide", WidgetKind::Table, Rect::new(3, 0, u32::MAX, 3)),
            widget("deep", WidgetKind::Chart, Rect::new(0, u32::MAX, 6, 4)),
            widget("tall", WidgetKind::Kpi, Rect::new(0, 9, 3, u32::MAX)),
        ];
        for record in incoming {
            state.reduce(event(RealtimeOp::Insert, record));
        }

        assert_eq!(state.widgets().len(), 5);
        for placed in state.widgets() {
            assert!(placed.rect().fits(12), "{} left the grid", placed.id);
        }
        let tall = state.find("tall").unwrap();
        assert_eq!(tall.rect().h, MAX_SCAN_ROWS);
        assert_collision_free(&state);
    }

    #[test]
    fn test_failed_create_restores_previous_list() {
        let mut state =
            SyncState::new(vec![widget("a", WidgetKind::Chart, Rect::new(0, 0, 6, 4))], 12);
        let before = state.widgets().to_vec();

        let created = widget("b", WidgetKind::Chart, Rect::new(6, 0, 6, 4));
        assert!(state.reduce(submitted(LocalMutation::Create(created))));
        assert_eq!(state.widgets().len(), 2);
        assert_eq!(state.pending().len(), 1);

        assert!(state.reduce(SyncEvent::LocalMutationExpired {
            kind: MutationKind::Create,
            widget_id: "b".to_string(),
            cause: ExpiryCause::PersistenceFailed,
        }));
        assert_eq!(state.widgets(), before.as_slice());
        assert!(state.pending().is_empty());
    }

    #[test]
    fn test_failed_delete_restores_widget_in_place() {
        let mut state = SyncState::new(
            vec![
                widget("a", WidgetKind::Kpi, Rect::new(0, 0, 3, 2)),
                widget("b", WidgetKind::Kpi, Rect::new(3, 0, 3, 2)),
                widget("c", WidgetKind::Kpi, Rect::new(6, 0, 3, 2)),
            ],
            12,
        );
        let before = state.widgets().to_vec();

        state.reduce(submitted(LocalMutation::Delete { widget_id: "b".to_string() }));
        assert!(state.find("b").is_none());

        state.reduce(SyncEvent::LocalMutationExpired {
            kind: MutationKind::Delete,
            widget_id: "b".to_string(),
            cause: ExpiryCause::PersistenceFailed,
        });
        assert_eq!(state.widgets(), before.as_slice());
    }

    #[test]
    fn test_echo_confirms_without_rerender() {
        let mut state =
            SyncState::new(vec![widget("a", WidgetKind::Chart, Rect::new(0, 0, 6, 4))], 12);
        let mut moved = state.widgets()[0].clone();
        moved.layout.y = 4;

        state.reduce(submitted(LocalMutation::Update(moved.clone())));
        assert_eq!(state.widgets()[0], moved);

        let changed = state.reduce(event(RealtimeOp::Update, moved.clone()));
        assert!(!changed);
        assert!(state.pending().is_empty());
        assert_eq!(state.confirmed()[0], moved);
    }

    #[test]
    fn test_remote_events_are_idempotent() {
        let mut state =
            SyncState::new(vec![widget("a", WidgetKind::Chart, Rect::new(0, 0, 6, 4))], 12);
        let incoming = widget("b", WidgetKind::Chart, Rect::new(6, 0, 6, 4));

        assert!(state.reduce(event(RealtimeOp::Insert, incoming.clone())));
        let once = state.widgets().to_vec();
        assert!(!state.reduce(event(RealtimeOp::Insert, incoming.clone())));
        assert_eq!(state.widgets(), once.as_slice());

        assert!(state.reduce(event(RealtimeOp::Delete, incoming.clone())));
        let deleted = state.widgets().to_vec();
        assert!(!state.reduce(event(RealtimeOp::Delete, incoming)));
        assert_eq!(state.widgets(), deleted.as_slice());
    }

    #[test]
    fn test_colliding_remote_insert_is_relocated() {
        let mut state =
            SyncState::new(vec![widget("a", WidgetKind::Chart, Rect::new(0, 0, 6, 4))], 12);
        let incoming = widget("b", WidgetKind::Chart, Rect::new(2, 0, 6, 4));

        state.reduce(event(RealtimeOp::Insert, incoming.clone()));
        assert_eq!(state.find("b").unwrap().rect(), Rect::new(6, 0, 6, 4));
        assert!(!state.reduce(event(RealtimeOp::Insert, incoming)));
        assert_collision_free(&state);
    }

    #[test]
    fn test_text_band_holds_after_remote_insert() {
        let mut state =
            SyncState::new(vec![widget("t", WidgetKind::Text, Rect::new(0, 0, 12, 2))], 12);
        let kpi = widget("k", WidgetKind::Kpi, Rect::new(9, 1, 3, 2));
        state.reduce(event(RealtimeOp::Insert, kpi));
        assert_eq!(state.find("k").unwrap().rect(), Rect::new(0, 2, 3, 2));
        assert_collision_free(&state);
    }

    #[test]
    fn test_duplicate_slot_is_rekeyed() {
        let mut state =
            SyncState::new(vec![widget("a", WidgetKind::Kpi, Rect::new(0, 0, 3, 2))], 12);
        let mut incoming = widget("b", WidgetKind::Kpi, Rect::new(3, 0, 3, 2));
        incoming.layout.i = "slot-a".to_string();

        state.reduce(event(RealtimeOp::Insert, incoming.clone()));
        let slot = state.find("b").unwrap().layout.i.clone();
        assert_ne!(slot, "slot-a");

        state.reduce(event(RealtimeOp::Insert, incoming));
        assert_eq!(state.find("b").unwrap().layout.i, slot);
        assert_collision_free(&state);
    }

    #[test]
    fn test_remote_update_while_delete_pending_moves_rollback_target() {
        let mut state =
            SyncState::new(vec![widget("a", WidgetKind::Kpi, Rect::new(0, 0, 3, 2))], 12);
        state.reduce(submitted(LocalMutation::Delete { widget_id: "a".to_string() }));

        let mut computed = widget("a", WidgetKind::Kpi, Rect::new(0, 0, 3, 2));
        computed.content = WidgetContent::Kpi {
            config: match &computed.content {
                WidgetContent::Kpi { config, .. } => config.clone(),
                _ => unreachable!(),
            },
            data: Some(KpiData {
                value: 42.0,
                previous: None,
            }),
        };
        assert!(!state.reduce(event(RealtimeOp::Update, computed.clone())));
        assert!(state.find("a").is_none());

        state.reduce(SyncEvent::LocalMutationExpired {
            kind: MutationKind::Delete,
            widget_id: "a".to_string(),
            cause: ExpiryCause::Timeout,
        });
        assert_eq!(state.find("a"), Some(&computed));
    }

    #[test]
    fn test_remote_delete_drops_pending_edits() {
        let mut state =
            SyncState::new(vec![widget("a", WidgetKind::Kpi, Rect::new(0, 0, 3, 2))], 12);
        let mut moved = state.widgets()[0].clone();
        moved.layout.x = 3;
        state.reduce(submitted(LocalMutation::Update(moved.clone())));

        state.reduce(event(RealtimeOp::Delete, moved));
        assert!(state.widgets().is_empty());
        assert!(state.pending().is_empty());
    }

    #[test]
    fn test_late_confirmation_after_expiry_converges() {
        let mut state = SyncState::new(Vec::new(), 12);
        let created = widget("a", WidgetKind::Chart, Rect::new(0, 0, 6, 4));
        state.reduce(submitted(LocalMutation::Create(created.clone())));
        state.reduce(SyncEvent::LocalMutationExpired {
            kind: MutationKind::Create,
            widget_id: "a".to_string(),
            cause: ExpiryCause::Timeout,
        });
        assert!(state.widgets().is_empty());

        state.reduce(SyncEvent::LocalMutationConfirmed {
            kind: MutationKind::Create,
            widget_id: "a".to_string(),
            record: Some(created.clone()),
        });
        assert_eq!(state.widgets(), &[created.clone()]);
        assert_eq!(state.confirmed(), &[created]);
    }

    #[test]
    fn test_expire_stale_only_touches_old_entries() {
        let mut state = SyncState::new(Vec::new(), 12);
        let now = Utc::now();
        state.reduce(SyncEvent::LocalMutationSubmitted {
            mutation: LocalMutation::Create(widget("old", WidgetKind::Kpi, Rect::new(0, 0, 3, 2))),
            at: now - TimeDelta::seconds(30),
        });
        state.reduce(SyncEvent::LocalMutationSubmitted {
            mutation: LocalMutation::Create(widget("new", WidgetKind::Kpi, Rect::new(3, 0, 3, 2))),
            at: now,
        });

        let expired = state.expire_stale(now, TimeDelta::seconds(10));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].widget_id, "old");
        assert!(state.find("old").is_none());
        assert!(state.find("new").is_some());
        assert_eq!(state.pending().len(), 1);
    }

    #[test]
    fn test_unmatched_expiry_is_ignored() {
        let mut state =
            SyncState::new(vec![widget("a", WidgetKind::Kpi, Rect::new(0, 0, 3, 2))], 12);
        assert!(!state.reduce(SyncEvent::LocalMutationExpired {
            kind: MutationKind::Update,
            widget_id: "a".to_string(),
            cause: ExpiryCause::Timeout,
        }));
    }
}

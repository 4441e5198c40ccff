// Layout mutation gate - accept or snap back drag/resize results
use super::collision::{collides, conflicts};
use super::widget::{LayoutItem, Rect, Widget, WidgetKind};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Rejection {
    Collision,
    OutOfBounds,
    NotResizable,
    UnknownSlot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "camelCase")]
pub enum GateDecision {
    Unchanged,
    Accepted,
    Rejected(Rejection),
}

#[derive(Debug, Clone)]
pub struct DragOutcome {
    pub widgets: Vec<Widget>,
    /// Per-slot decision, in widget order.
    pub decisions: Vec<(String, GateDecision)>,
}

impl DragOutcome {
    pub fn changed(&self) -> impl Iterator<Item = &Widget> {
        self.widgets.iter().zip(&self.decisions).filter_map(|(widget, (_, decision))| {
            (*decision == GateDecision::Accepted).then_some(widget)
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResizeOutcome {
    pub widgets: Vec<Widget>,
    pub decision: GateDecision,
}

fn pinned(rect: Rect, kind: WidgetKind, cols: u32) -> Rect {
    if kind.is_text() {
        Rect::new(0, rect.y, cols, rect.h)
    } else {
        rect
    }
}

/// Validate a completed drag.
///
/// Each moved widget is tested against the pre-drag rectangles of every other
/// widget, so the outcome does not depend on the order widgets are visited.
/// Moved widgets whose accepted proposals still collide with each other snap
/// back together.
pub fn commit_drag(current: &[Widget], proposed: &[LayoutItem], cols: u32) -> DragOutcome {
    let mut candidates: Vec<Option<Rect>> = Vec::with_capacity(current.len());
    let mut decisions: Vec<(String, GateDecision)> = Vec::with_capacity(current.len());

    for widget in current {
        let original = widget.rect();
        let proposal = proposed
            .iter()
            .find(|item| item.i == widget.layout.i)
            .map(|item| pinned(item.rect(), widget.kind(), cols));

        let decision = match proposal {
            None => GateDecision::Unchanged,
            Some(rect) if rect == original => GateDecision::Unchanged,
            Some(rect) if !rect.fits(cols) => GateDecision::Rejected(Rejection::OutOfBounds),
            Some(rect) => {
                let others = current
                    .iter()
                    .filter(|other| other.layout.i != widget.layout.i)
                    .map(|other| (other.rect(), other.kind()));
                if collides(&rect, widget.kind(), others) {
                    GateDecision::Rejected(Rejection::Collision)
                } else {
                    GateDecision::Accepted
                }
            }
        };

        candidates.push(match decision {
            GateDecision::Accepted => proposal,
            _ => None,
        });
        decisions.push((widget.layout.i.clone(), decision));
    }

    let mut clashing = HashSet::new();
    for a in 0..current.len() {
        for b in (a + 1)..current.len() {
            if let (Some(ra), Some(rb)) = (candidates[a], candidates[b]) {
                if conflicts(&ra, current[a].kind(), &rb, current[b].kind()) {
                    clashing.insert(a);
                    clashing.insert(b);
                }
            }
        }
    }
    for index in clashing {
        candidates[index] = None;
        decisions[index].1 = GateDecision::Rejected(Rejection::Collision);
    }

    let widgets = current
        .iter()
        .zip(&candidates)
        .map(|(widget, candidate)| match candidate {
            Some(rect) => Widget {
                layout: widget.layout.with_rect(*rect),
                ..widget.clone()
            },
            None => widget.clone(),
        })
        .collect();

    for (slot, decision) in &decisions {
        if let GateDecision::Rejected(reason) = decision {
            tracing::debug!(slot = %slot, ?reason, "drag reverted");
        }
    }

    DragOutcome { widgets, decisions }
}

/// Validate a completed resize of one widget at its current position.
pub fn commit_resize(current: &[Widget], slot: &str, w: u32, h: u32, cols: u32) -> ResizeOutcome {
    let decision = match current.iter().find(|widget| widget.layout.i == slot) {
        None => GateDecision::Rejected(Rejection::UnknownSlot),
        Some(widget) if !widget.layout.is_resizable => {
            GateDecision::Rejected(Rejection::NotResizable)
        }
        Some(widget) => {
            let (w, h) = widget.layout.clamp_size(w, h, cols);
            let requested = Rect::new(widget.layout.x, widget.layout.y, w, h);
            let rect = pinned(requested, widget.kind(), cols);
            if rect == widget.rect() {
                GateDecision::Unchanged
            } else if !rect.fits(cols) {
                GateDecision::Rejected(Rejection::OutOfBounds)
            } else if collides(
                &rect,
                widget.kind(),
                current
                    .iter()
                    .filter(|other| other.layout.i != slot)
                    .map(|other| (other.rect(), other.kind())),
            ) {
                GateDecision::Rejected(Rejection::Collision)
            } else {
                let widgets = current
                    .iter()
                    .map(|other| {
                        if other.layout.i == slot {
                            Widget {
                                layout: other.layout.with_rect(rect),
                                ..other.clone()
                            }
                        } else {
                            other.clone()
                        }
                    })
                    .collect();
                return ResizeOutcome {
                    widgets,
                    decision: GateDecision::Accepted,
                };
            }
        }
    };

    if let GateDecision::Rejected(reason) = decision {
        tracing::debug!(slot, ?reason, "resize rejected");
    }
    ResizeOutcome {
        widgets: current.to_vec(),
        decision,
    }
}

/// Apply several resizes one at a time, each validated against the state left
/// by the previous one. There is no all-or-nothing rollback across widgets.
pub fn commit_resizes(
    current: &[Widget],
    requests: &[(String, u32, u32)],
    cols: u32,
) -> ResizeOutcome {
    let mut widgets = current.to_vec();
    let mut decision = GateDecision::Unchanged;
    for (slot, w, h) in requests {
        let outcome = commit_resize(&widgets, slot, *w, *h, cols);
        if outcome.decision == GateDecision::Accepted {
            decision = GateDecision::Accepted;
        } else if decision == GateDecision::Unchanged {
            decision = outcome.decision;
        }
        widgets = outcome.widgets;
    }
    ResizeOutcome { widgets, decision }
}

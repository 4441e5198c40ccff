// Collision validation between widget rectangles
use super::widget::{Rect, Widget, WidgetKind};

/// Half-open interval overlap on both axes.
pub fn overlaps(a: &Rect, b: &Rect) -> bool {
    !(a.right() <= b.x || a.x >= b.right() || a.bottom() <= b.y || a.y >= b.bottom())
}

fn rows_overlap(a: &Rect, b: &Rect) -> bool {
    !(a.bottom() <= b.y || a.y >= b.bottom())
}

/// Whether two placed widgets conflict.
///
/// Text widgets claim their whole row band: when either side is text,
/// any vertical overlap counts, whatever the horizontal positions are.
pub fn conflicts(a: &Rect, a_kind: WidgetKind, b: &Rect, b_kind: WidgetKind) -> bool {
    if a_kind.is_text() || b_kind.is_text() {
        rows_overlap(a, b)
    } else {
        overlaps(a, b)
    }
}

/// Does `candidate` collide with any of `others`?
pub fn collides<I>(candidate: &Rect, candidate_kind: WidgetKind, others: I) -> bool
where
    I: IntoIterator<Item = (Rect, WidgetKind)>,
{
    others
        .into_iter()
        .any(|(rect, kind)| conflicts(candidate, candidate_kind, &rect, kind))
}

/// Collision test against a widget list, ignoring the widget occupying `skip_slot`.
pub fn collides_with_widgets(
    candidate: &Rect,
    candidate_kind: WidgetKind,
    widgets: &[Widget],
    skip_slot: Option<&str>,
) -> bool {
    collides(
        candidate,
        candidate_kind,
        widgets
            .iter()
            .filter(|w| skip_slot != Some(w.slot()))
            .map(|w| (w.rect(), w.kind())),
    )
}

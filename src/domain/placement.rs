// Position allocation - deterministic first-fit placement on the grid
use super::collision::collides;
use super::grid::{Breakpoint, GridConfiguration};
use super::widget::{LayoutItem, Rect, Widget, WidgetKind};
use std::collections::BTreeMap;

/// Rows scanned before giving up and appending below everything.
pub const MAX_SCAN_ROWS: u32 = 256;

/// Find the first free rectangle of size `w × h` for a widget of `kind`.
///
/// Scans row-major (`y` then `x`). Text widgets are pinned to `x = 0` at full
/// width and only scan `y`. Never fails: when the bounded scan finds nothing,
/// the widget goes one row below the lowest existing bottom edge. Heights are
/// capped at the scan window so every result stays on the grid.
pub fn allocate(
    occupied: &[(Rect, WidgetKind)],
    w: u32,
    h: u32,
    kind: WidgetKind,
    cols: u32,
) -> Rect {
    let cols = cols.max(1);
    let w = if kind.is_text() { cols } else { w.clamp(1, cols) };
    let h = h.min(MAX_SCAN_ROWS);

    for y in 0..MAX_SCAN_ROWS {
        for x in 0..=(cols - w) {
            let candidate = Rect::new(x, y, w, h);
            if !collides(&candidate, kind, occupied.iter().copied()) {
                return candidate;
            }
        }
    }

    let bottom = occupied.iter().map(|(rect, _)| rect.bottom()).max().unwrap_or(0);
    tracing::debug!(bottom, "placement scan exhausted, appending below existing widgets");
    Rect::new(0, bottom.saturating_add(1), w, h)
}

/// [`allocate`] against a widget list.
pub fn allocate_among(widgets: &[Widget], w: u32, h: u32, kind: WidgetKind, cols: u32) -> Rect {
    let occupied: Vec<(Rect, WidgetKind)> = widgets.iter().map(|w| (w.rect(), w.kind())).collect();
    allocate(&occupied, w, h, kind, cols)
}

/// Per-breakpoint layout maps for a collision-free widget list.
///
/// The widest breakpoint reuses stored rectangles. Narrower breakpoints keep a
/// rectangle when it still fits and is free, otherwise re-allocate it.
pub fn responsive_layouts(
    widgets: &[Widget],
    grid: &GridConfiguration,
) -> BTreeMap<Breakpoint, Vec<LayoutItem>> {
    let mut ordered: Vec<&Widget> = widgets.iter().collect();
    ordered.sort_by(|a, b| {
        (a.layout.y, a.layout.x, a.slot()).cmp(&(b.layout.y, b.layout.x, b.slot()))
    });

    let mut maps = BTreeMap::new();
    for breakpoint in Breakpoint::ALL {
        let cols = grid.columns_for(breakpoint);
        let mut placed: Vec<(Rect, WidgetKind)> = Vec::with_capacity(ordered.len());
        let mut items = Vec::with_capacity(ordered.len());

        for widget in &ordered {
            let kind = widget.kind();
            let stored = widget.rect();
            let w = if kind.is_text() { cols } else { stored.w.clamp(1, cols) };
            let x = if kind.is_text() { 0 } else { stored.x };
            let kept = Rect::new(x, stored.y, w, stored.h);

            let free = !collides(&kept, kind, placed.iter().copied());
            let rect = if kept.fits(cols) && free {
                kept
            } else {
                allocate(&placed, w, stored.h, kind, cols)
            };

            placed.push((rect, kind));
            items.push(widget.layout.with_rect(rect));
        }

        maps.insert(breakpoint, items);
    }

    maps
}

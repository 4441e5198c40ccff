// Widget domain model
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetKind {
    Text,
    Chart,
    Kpi,
    Table,
}

impl WidgetKind {
    pub fn is_text(self) -> bool {
        self == WidgetKind::Text
    }
}

/// Rows at or past this edge are off the grid.
pub const ROW_LIMIT: u32 = 1 << 16;

/// Grid footprint in column/row units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Auto-sizing text blocks declare a zero height; they still take one row.
    pub fn effective_h(&self) -> u32 {
        self.h.max(1)
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.w)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.effective_h())
    }

    /// Whether the rectangle is non-empty, lies inside `cols` columns and ends
    /// above [`ROW_LIMIT`].
    pub fn fits(&self, cols: u32) -> bool {
        let inside = self.x.checked_add(self.w).is_some_and(|right| right <= cols);
        let bounded = self
            .y
            .checked_add(self.effective_h())
            .is_some_and(|bottom| bottom <= ROW_LIMIT);
        self.w > 0 && inside && bounded
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutItem {
    /// Layout slot identifier, unique per dashboard and distinct from the widget id.
    pub i: String,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_h: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_h: Option<u32>,
    #[serde(default = "default_resizable")]
    pub is_resizable: bool,
}

fn default_resizable() -> bool {
    true
}

impl LayoutItem {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.w, self.h)
    }

    pub fn with_rect(&self, rect: Rect) -> Self {
        Self {
            x: rect.x,
            y: rect.y,
            w: rect.w,
            h: rect.h,
            ..self.clone()
        }
    }

    pub fn with_slot(self, i: String) -> Self {
        Self { i, ..self }
    }

    /// Clamp a requested size into the item's min/max bounds and the grid width.
    pub fn clamp_size(&self, w: u32, h: u32, cols: u32) -> (u32, u32) {
        let w = w
            .max(self.min_w.unwrap_or(1))
            .min(self.max_w.unwrap_or(u32::MAX))
            .min(cols);
        let h = h
            .max(self.min_h.unwrap_or(0))
            .min(self.max_h.unwrap_or(u32::MAX));
        (w, h)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Line,
    Bar,
    Area,
    Pie,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextConfig {
    #[serde(default)]
    pub markdown: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    pub title: String,
    pub chart_type: ChartType,
    pub x_key: String,
    #[serde(default)]
    pub y_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesData {
    pub name: String,
    pub points: Vec<DataPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub series: Vec<SeriesData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiConfig {
    pub title: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub precision: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiData {
    pub value: f64,
    #[serde(default)]
    pub previous: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    pub title: String,
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Type-specific payload. The `type` tag doubles as the widget kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WidgetContent {
    Text {
        config: TextConfig,
    },
    Chart {
        config: ChartConfig,
        #[serde(default)]
        data: Option<ChartData>,
    },
    Kpi {
        config: KpiConfig,
        #[serde(default)]
        data: Option<KpiData>,
    },
    Table {
        config: TableConfig,
        #[serde(default)]
        data: Option<TableData>,
    },
}

impl WidgetContent {
    pub fn kind(&self) -> WidgetKind {
        match self {
            WidgetContent::Text { .. } => WidgetKind::Text,
            WidgetContent::Chart { .. } => WidgetKind::Chart,
            WidgetContent::Kpi { .. } => WidgetKind::Kpi,
            WidgetContent::Table { .. } => WidgetKind::Table,
        }
    }

    /// Empty payload for a freshly added widget of `kind`.
    pub fn placeholder(kind: WidgetKind) -> Self {
        match kind {
            WidgetKind::Text => WidgetContent::Text {
                config: TextConfig {
                    markdown: String::new(),
                },
            },
            WidgetKind::Chart => WidgetContent::Chart {
                config: ChartConfig {
                    title: "New chart".to_string(),
                    chart_type: ChartType::Bar,
                    x_key: "label".to_string(),
                    y_keys: vec!["value".to_string()],
                },
                data: None,
            },
            WidgetKind::Kpi => WidgetContent::Kpi {
                config: KpiConfig {
                    title: "New KPI".to_string(),
                    unit: None,
                    precision: 0,
                },
                data: None,
            },
            WidgetKind::Table => WidgetContent::Table {
                config: TableConfig {
                    title: "New table".to_string(),
                    columns: Vec::new(),
                },
                data: None,
            },
        }
    }
}

/// Default footprint and constraints for a new widget of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeSpec {
    pub w: u32,
    pub h: u32,
    pub min_w: Option<u32>,
    pub min_h: Option<u32>,
}

impl SizeSpec {
    pub fn for_kind(kind: WidgetKind, cols: u32) -> Self {
        match kind {
            WidgetKind::Text => SizeSpec {
                w: cols,
                h: 1,
                min_w: None,
                min_h: Some(1),
            },
            WidgetKind::Chart => SizeSpec {
                w: 6,
                h: 4,
                min_w: Some(3),
                min_h: Some(3),
            },
            WidgetKind::Kpi => SizeSpec {
                w: 3,
                h: 2,
                min_w: Some(2),
                min_h: Some(2),
            },
            WidgetKind::Table => SizeSpec {
                w: 6,
                h: 4,
                min_w: Some(4),
                min_h: Some(3),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    pub id: String,
    pub layout: LayoutItem,
    #[serde(flatten)]
    pub content: WidgetContent,
    #[serde(default)]
    pub cache_key: Option<String>,
    #[serde(default)]
    pub last_data_fetch: Option<DateTime<Utc>>,
}

impl Widget {
    pub fn new(id: String, layout: LayoutItem, content: WidgetContent) -> Self {
        Self {
            id,
            layout,
            content,
            cache_key: None,
            last_data_fetch: None,
        }
    }

    pub fn kind(&self) -> WidgetKind {
        self.content.kind()
    }

    pub fn rect(&self) -> Rect {
        self.layout.rect()
    }

    pub fn slot(&self) -> &str {
        &self.layout.i
    }
}

/// Partial update sent to the persistence collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WidgetPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<LayoutItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<WidgetContent>,
}

impl WidgetPatch {
    pub fn between(before: &Widget, after: &Widget) -> Self {
        Self {
            layout: (before.layout != after.layout).then(|| after.layout.clone()),
            content: (before.content != after.content).then(|| after.content.clone()),
        }
    }

    pub fn apply(&self, widget: &Widget) -> Widget {
        let mut next = widget.clone();
        if let Some(layout) = &self.layout {
            next.layout = layout.clone();
        }
        if let Some(content) = &self.content {
            next.content = content.clone();
        }
        next
    }
}

pub fn new_widget_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn new_slot_id() -> String {
    format!("slot-{}", Uuid::new_v4().simple())
}

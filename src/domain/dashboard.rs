// Dashboard view model - what the presentation layer renders
use super::grid::{Breakpoint, GridConfiguration};
use super::placement::responsive_layouts;
use super::widget::{LayoutItem, Widget};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub dashboard_id: String,
    pub widgets: Vec<Widget>,
    pub layouts: BTreeMap<Breakpoint, Vec<LayoutItem>>,
    pub row_height: u32,
    pub margin: [u32; 2],
    pub pending_mutations: usize,
}

impl DashboardView {
    pub fn new(
        dashboard_id: String,
        widgets: Vec<Widget>,
        grid: &GridConfiguration,
        pending_mutations: usize,
    ) -> Self {
        let layouts = responsive_layouts(&widgets, grid);
        Self {
            dashboard_id,
            widgets,
            layouts,
            row_height: grid.row_height(),
            margin: grid.margin(),
            pending_mutations,
        }
    }

    pub fn empty(dashboard_id: String, grid: &GridConfiguration) -> Self {
        Self::new(dashboard_id, Vec::new(), grid, 0)
    }
}

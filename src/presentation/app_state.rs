// Application state for HTTP handlers
use crate::application::dashboard_service::DashboardService;
use crate::infrastructure::realtime::RealtimeHub;

#[derive(Clone)]
pub struct AppState {
    pub dashboards: DashboardService,
    /// Fan-out point for change events pushed by the persistence backend.
    pub hub: RealtimeHub,
}

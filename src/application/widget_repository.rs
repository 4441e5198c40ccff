// Collaborator traits: persistence, realtime delivery and cache backend
use crate::application::errors::CacheError;
use crate::domain::sync::RealtimeEvent;
use crate::domain::widget::{Widget, WidgetPatch};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

/// Source of truth for a dashboard's widgets.
#[async_trait]
pub trait WidgetRepository: Send + Sync {
    async fn list_widgets(&self, dashboard_id: &str) -> anyhow::Result<Vec<Widget>>;

    /// Persist a new widget, returning the stored record
    async fn create_widget(&self, dashboard_id: &str, widget: &Widget) -> anyhow::Result<Widget>;

    async fn update_widget(
        &self,
        dashboard_id: &str,
        widget_id: &str,
        patch: &WidgetPatch,
    ) -> anyhow::Result<Widget>;

    async fn delete_widget(&self, dashboard_id: &str, widget_id: &str) -> anyhow::Result<()>;
}

/// Backend-originated widget change events, scoped to one dashboard.
pub trait RealtimeSource: Send + Sync {
    fn subscribe(&self, dashboard_id: &str) -> BoxStream<'static, RealtimeEvent>;
}

/// Key/value cache with backend-controlled expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn invalidate(&self, key: &str) -> Result<(), CacheError>;
}

// In-process widget store that emits realtime events for every write
use crate::application::widget_repository::WidgetRepository;
use crate::domain::sync::{RealtimeEvent, RealtimeOp};
use crate::domain::widget::{Widget, WidgetPatch};
use crate::infrastructure::realtime::RealtimeHub;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

pub struct MemoryWidgetRepository {
    dashboards: RwLock<HashMap<String, Vec<Widget>>>,
    hub: RealtimeHub,
}

impl MemoryWidgetRepository {
    pub fn new(hub: RealtimeHub) -> Self {
        Self {
            dashboards: RwLock::new(HashMap::new()),
            hub,
        }
    }

    fn notify(&self, op: RealtimeOp, dashboard_id: &str, widget: Widget) {
        let delivered = self.hub.publish(RealtimeEvent {
            op,
            dashboard_id: dashboard_id.to_string(),
            widget,
        });
        tracing::debug!(dashboard_id, ?op, delivered, "published widget change");
    }
}

#[async_trait]
impl WidgetRepository for MemoryWidgetRepository {
    async fn list_widgets(&self, dashboard_id: &str) -> Result<Vec<Widget>> {
        Ok(self
            .dashboards
            .read()
            .await
            .get(dashboard_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_widget(&self, dashboard_id: &str, widget: &Widget) -> Result<Widget> {
        let record = {
            let mut dashboards = self.dashboards.write().await;
            let widgets = dashboards.entry(dashboard_id.to_string()).or_default();
            if widgets.iter().any(|w| w.id == widget.id) {
                anyhow::bail!("widget {} already exists", widget.id);
            }
            widgets.push(widget.clone());
            widget.clone()
        };
        self.notify(RealtimeOp::Insert, dashboard_id, record.clone());
        Ok(record)
    }

    async fn update_widget(
        &self,
        dashboard_id: &str,
        widget_id: &str,
        patch: &WidgetPatch,
    ) -> Result<Widget> {
        let record = {
            let mut dashboards = self.dashboards.write().await;
            let stored = dashboards
                .get_mut(dashboard_id)
                .and_then(|widgets| widgets.iter_mut().find(|w| w.id == widget_id));
            let Some(stored) = stored else {
                anyhow::bail!("widget {} not found in dashboard {}", widget_id, dashboard_id);
            };
            *stored = patch.apply(stored);
            stored.clone()
        };
        self.notify(RealtimeOp::Update, dashboard_id, record.clone());
        Ok(record)
    }

    async fn delete_widget(&self, dashboard_id: &str, widget_id: &str) -> Result<()> {
        let removed = {
            let mut dashboards = self.dashboards.write().await;
            dashboards.get_mut(dashboard_id).and_then(|widgets| {
                let index = widgets.iter().position(|w| w.id == widget_id)?;
                Some(widgets.remove(index))
            })
        };
        if let Some(widget) = removed {
            self.notify(RealtimeOp::Delete, dashboard_id, widget);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::widget_repository::RealtimeSource;
    use crate::domain::widget::{LayoutItem, Rect, WidgetContent, WidgetKind};
    use futures::StreamExt;

    fn widget(id: &str) -> Widget {
        let layout = LayoutItem {
            i: format!("slot-{}", id),
            x: 0,
            y: 0,
            w: 3,
            h: 2,
            min_w: None,
            max_w: None,
            min_h: None,
            max_h: None,
            is_resizable: true,
        };
        Widget::new(id.to_string(), layout, WidgetContent::placeholder(WidgetKind::Kpi))
    }

    #[tokio::test]
    async fn test_writes_are_published() {
        let hub = RealtimeHub::new();
        let mut events = hub.subscribe("d1");
        let repository = MemoryWidgetRepository::new(hub);

        repository.create_widget("d1", &widget("a")).await.unwrap();
        let patch = WidgetPatch {
            layout: Some(widget("a").layout.with_rect(Rect::new(3, 0, 3, 2))),
            content: None,
        };
        let updated = repository.update_widget("d1", "a", &patch).await.unwrap();
        assert_eq!(updated.layout.x, 3);
        repository.delete_widget("d1", "a").await.unwrap();

        let ops: Vec<RealtimeOp> = events.by_ref().take(3).map(|e| e.op).collect().await;
        assert_eq!(ops, vec![RealtimeOp::Insert, RealtimeOp::Update, RealtimeOp::Delete]);
        assert!(repository.list_widgets("d1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_of_missing_widget_fails() {
        let repository = MemoryWidgetRepository::new(RealtimeHub::new());
        let result = repository.update_widget("d1", "nope", &WidgetPatch::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let repository = MemoryWidgetRepository::new(RealtimeHub::new());
        repository.create_widget("d1", &widget("a")).await.unwrap();
        assert!(repository.create_widget("d1", &widget("a")).await.is_err());
    }
}

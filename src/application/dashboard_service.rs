// Dashboard service - cache-aside reads and session lifecycle
use crate::application::cache_coordinator::{CacheCoordinator, CacheKey, CachedRead, ReadOptions};
use crate::application::dashboard_session::{DashboardHandle, DashboardSession, SessionSettings};
use crate::application::widget_repository::{RealtimeSource, WidgetRepository};
use crate::domain::grid::GridConfiguration;
use crate::domain::widget::Widget;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct DashboardService {
    repository: Arc<dyn WidgetRepository>,
    realtime: Arc<dyn RealtimeSource>,
    cache: CacheCoordinator,
    grid: GridConfiguration,
    settings: SessionSettings,
    sessions: Arc<Mutex<HashMap<(String, String), DashboardHandle>>>,
}

impl DashboardService {
    pub fn new(
        repository: Arc<dyn WidgetRepository>,
        realtime: Arc<dyn RealtimeSource>,
        cache: CacheCoordinator,
        grid: GridConfiguration,
        settings: SessionSettings,
    ) -> Self {
        Self {
            repository,
            realtime,
            cache,
            grid,
            settings,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Load a dashboard's widget list through the cache.
    pub async fn load_widgets(
        &self,
        dashboard_id: &str,
        user_id: &str,
        options: ReadOptions,
    ) -> anyhow::Result<CachedRead<Vec<Widget>>> {
        let key = CacheKey::widgets(dashboard_id, user_id);
        let repository = self.repository.clone();
        self.cache
            .read(&key, options, || async move { repository.list_widgets(dashboard_id).await })
            .await
    }

    /// Warm the widget cache for a dashboard the user is likely to open.
    pub async fn prefetch(&self, dashboard_id: &str, user_id: &str) -> bool {
        let key = CacheKey::widgets(dashboard_id, user_id);
        let repository = self.repository.clone();
        self.cache
            .prefetch(&key, || async move { repository.list_widgets(dashboard_id).await })
            .await
    }

    /// Handle to the live session for `(dashboard, user)`, starting one if needed.
    /// Sessions that stopped while idle are dropped from the registry here.
    pub async fn open(&self, dashboard_id: &str, user_id: &str) -> anyhow::Result<DashboardHandle> {
        let scope = (dashboard_id.to_string(), user_id.to_string());
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, handle| !handle.is_closed());
        if let Some(handle) = sessions.get(&scope) {
            return Ok(handle.clone());
        }

        // Subscribe before loading so nothing published in between is lost.
        let events = self.realtime.subscribe(dashboard_id);
        let loaded = self.load_widgets(dashboard_id, user_id, ReadOptions::default()).await?;
        tracing::info!(
            dashboard_id,
            user_id,
            widgets = loaded.data.len(),
            from_cache = loaded.from_cache,
            "opening dashboard session"
        );

        let handle = DashboardSession::spawn(
            dashboard_id.to_string(),
            user_id.to_string(),
            loaded.data,
            events,
            self.grid.clone(),
            self.settings,
            self.repository.clone(),
            self.cache.clone(),
        );
        sessions.insert(scope, handle.clone());
        Ok(handle)
    }

    /// Drop the registry's handle; the session stops once callers drop theirs.
    pub async fn close(&self, dashboard_id: &str, user_id: &str) -> bool {
        let scope = (dashboard_id.to_string(), user_id.to_string());
        self.sessions.lock().await.remove(&scope).is_some()
    }

    #[cfg(test)]
    async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::widget::WidgetKind;
    use crate::infrastructure::memory_cache::MemoryCache;
    use crate::infrastructure::memory_repository::MemoryWidgetRepository;
    use crate::infrastructure::realtime::RealtimeHub;
    use std::time::Duration;

    fn service() -> (DashboardService, Arc<MemoryWidgetRepository>) {
        let hub = RealtimeHub::new();
        let repository = Arc::new(MemoryWidgetRepository::new(hub.clone()));
        let service = DashboardService::new(
            repository.clone(),
            Arc::new(hub),
            CacheCoordinator::new(Arc::new(MemoryCache::new()), Duration::from_secs(60)),
            GridConfiguration::default(),
            SessionSettings::default(),
        );
        (service, repository)
    }

    #[tokio::test]
    async fn test_second_load_comes_from_cache() {
        let (service, _) = service();
        let first = service.load_widgets("d1", "u1", ReadOptions::default()).await.unwrap();
        let second = service.load_widgets("d1", "u1", ReadOptions::default()).await.unwrap();
        assert!(!first.from_cache);
        assert!(second.from_cache);

        let busted = ReadOptions {
            bust: true,
            ..ReadOptions::default()
        };
        assert!(!service.load_widgets("d1", "u1", busted).await.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_open_reuses_session_and_invalidates_on_write() {
        let (service, repository) = service();
        let handle = service.open("d1", "u1").await.unwrap();
        let again = service.open("d1", "u1").await.unwrap();
        assert_eq!(handle.dashboard_id(), again.dashboard_id());

        handle.add_widget(WidgetKind::Chart).await.unwrap();
        assert_eq!(again.snapshot().widgets.len(), 1);

        let read = service.load_widgets("d1", "u1", ReadOptions::default()).await.unwrap();
        assert!(!read.from_cache);
        assert_eq!(read.data, repository.list_widgets("d1").await.unwrap());
    }

    #[tokio::test]
    async fn test_prefetch_then_load_hits_cache() {
        let (service, _) = service();
        assert!(service.prefetch("d1", "u1").await);
        assert!(!service.prefetch("d1", "u1").await);
        assert!(service.load_widgets("d1", "u1", ReadOptions::default()).await.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_prefetch_rearms_after_confirmed_write() {
        let (service, _) = service();
        assert!(service.prefetch("d1", "u1").await);

        let handle = service.open("d1", "u1").await.unwrap();
        handle.add_widget(WidgetKind::Chart).await.unwrap();

        assert!(service.prefetch("d1", "u1").await);
        let read = service.load_widgets("d1", "u1", ReadOptions::default()).await.unwrap();
        assert!(read.from_cache);
        assert_eq!(read.data.len(), 1);
    }

    #[tokio::test]
    async fn test_two_tabs_converge_through_realtime() {
        let (service, _) = service();
        let first = service.open("d1", "u1").await.unwrap();
        let second = service.open("d1", "u2").await.unwrap();
        let mut updates = second.subscribe();

        let widget = first.add_widget(WidgetKind::Kpi).await.unwrap();
        updates.wait_for(|view| !view.widgets.is_empty()).await.unwrap();
        assert_eq!(second.snapshot().widgets[0].id, widget.id);
        assert!(service.close("d1", "u2").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sessions_are_evicted_and_reopened() {
        let (service, _) = service();
        let first = service.open("d1", "u1").await.unwrap();
        first.add_widget(WidgetKind::Chart).await.unwrap();
        service.open("d2", "u1").await.unwrap();
        assert_eq!(service.session_count().await, 2);

        let settings = SessionSettings::default();
        tokio::time::sleep(settings.idle_timeout + settings.sweep_interval * 2).await;
        assert!(first.is_closed());

        let reopened = service.open("d1", "u1").await.unwrap();
        assert!(!reopened.is_closed());
        assert_eq!(reopened.snapshot().widgets.len(), 1);
        assert_eq!(service.session_count().await, 1);
    }
}

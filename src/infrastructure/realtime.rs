// Realtime hub - per-dashboard broadcast of widget change events
use crate::application::widget_repository::RealtimeSource;
use crate::domain::sync::RealtimeEvent;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Default)]
pub struct RealtimeHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<RealtimeEvent>>>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<RealtimeEvent>>> {
        // Plain map inserts cannot leave it half-updated, so a poisoned lock is still usable.
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver an event to every current subscriber of its dashboard.
    /// Returns the number of receivers reached.
    pub fn publish(&self, event: RealtimeEvent) -> usize {
        let sender = self.channels().get(&event.dashboard_id).cloned();
        match sender {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }
}

impl RealtimeSource for RealtimeHub {
    fn subscribe(&self, dashboard_id: &str) -> BoxStream<'static, RealtimeEvent> {
        let receiver = self
            .channels()
            .entry(dashboard_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        let dashboard_id = dashboard_id.to_string();

        BroadcastStream::new(receiver)
            .filter_map(move |item| {
                let dashboard_id = dashboard_id.clone();
                async move {
                    match item {
                        Ok(event) => Some(event),
                        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                            tracing::warn!(%dashboard_id, skipped, "realtime subscriber lagged");
                            None
                        }
                    }
                }
            })
            .boxed()
    }
}

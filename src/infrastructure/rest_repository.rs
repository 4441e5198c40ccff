// REST persistence repository
use crate::application::widget_repository::WidgetRepository;
use crate::domain::widget::{Widget, WidgetPatch};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

#[derive(Debug, Clone)]
pub struct RestWidgetRepository {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl RestWidgetRepository {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client: Client::new(),
        }
    }

    fn widgets_url(&self, dashboard_id: &str) -> String {
        format!("{}/dashboards/{}/widgets", self.base_url, urlencoding::encode(dashboard_id))
    }

    fn widget_url(&self, dashboard_id: &str, widget_id: &str) -> String {
        format!("{}/{}", self.widgets_url(dashboard_id), urlencoding::encode(widget_id))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .context("Failed to send request to widget store")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Widget store request failed with status {}: {}", status, body);
        }

        Ok(response)
    }

    async fn execute_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.execute(request)
            .await?
            .json::<T>()
            .await
            .context("Failed to parse widget store response")
    }
}

#[async_trait]
impl WidgetRepository for RestWidgetRepository {
    async fn list_widgets(&self, dashboard_id: &str) -> Result<Vec<Widget>> {
        let request = self.client.get(self.widgets_url(dashboard_id));
        let widgets: Vec<Widget> = self.execute_json(request).await?;
        tracing::debug!("Loaded {} widgets for dashboard {}", widgets.len(), dashboard_id);
        Ok(widgets)
    }

    async fn create_widget(&self, dashboard_id: &str, widget: &Widget) -> Result<Widget> {
        let request = self.client.post(self.widgets_url(dashboard_id)).json(widget);
        self.execute_json(request).await
    }

    async fn update_widget(
        &self,
        dashboard_id: &str,
        widget_id: &str,
        patch: &WidgetPatch,
    ) -> Result<Widget> {
        let request = self.client.patch(self.widget_url(dashboard_id, widget_id)).json(patch);
        self.execute_json(request).await
    }

    async fn delete_widget(&self, dashboard_id: &str, widget_id: &str) -> Result<()> {
        let request = self.client.delete(self.widget_url(dashboard_id, widget_id));
        self.execute(request).await?;
        Ok(())
    }
}

use super::Sender;
use crate::action::Action;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

const REPORTS_PATH: &str = "reports.json";

#[derive(Serialize)]
struct Envelope<'a> {
    report: &'a Action,
}

/// Sender that posts reports to the remote collector.
///
/// Each report is sent as `{"report": <payload>}` to
/// `{base_url}/reports.json`, authenticated with a bearer token when one is
/// configured.
pub struct HttpSender {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpSender {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        let base_url = base_url.into();
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/{}", base_url.trim_end_matches('/'), REPORTS_PATH),
            token,
            timeout,
        }
    }
}

#[async_trait]
impl Sender for HttpSender {
    async fn report(&self, action: &Action) -> Result<()> {
        let mut request = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&Envelope { report: action });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to post report to {}", self.url))?;
        response
            .error_for_status()
            .with_context(|| format!("Collector rejected report {}", action.name()))?;
        tracing::debug!("report {} delivered to {}", action.name(), self.url);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

use super::Sender;
use crate::action::Action;
use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{self, AsyncWriteExt};

/// Sender that prints each report as one JSON line on stdout.
pub struct StdoutSender;

impl StdoutSender {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StdoutSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sender for StdoutSender {
    async fn report(&self, action: &Action) -> Result<()> {
        let line = format!("{}\n", serde_json::to_string(action)?);
        let mut stdout = io::stdout();
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdout"
    }
}

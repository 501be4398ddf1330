mod http;
mod stdout;

use crate::{Config, action::Action};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

pub use http::HttpSender;
pub use stdout::StdoutSender;

/// Delivers finished reports to the collector.
///
/// Failures are returned to the caller as is; senders never retry.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Sender: Send + Sync {
    async fn report(&self, action: &Action) -> Result<()>;

    /// Returns the name of this sender for logging purposes.
    fn name(&self) -> &'static str;
}

/// Builds the sender selected by the configuration: stdout when
/// `service.debug` is set, HTTP otherwise.
pub fn create_sender(conf: &Config) -> crate::Result<Arc<dyn Sender>> {
    if conf.service.debug {
        return Ok(Arc::new(StdoutSender::new()));
    }
    Ok(Arc::new(HttpSender::new(
        conf.base_url()?,
        conf.service.token.clone(),
        conf.service.timeout,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_sender_follows_debug_flag() {
        let mut conf = Config::default();
        conf.service.debug = true;
        assert_eq!(create_sender(&conf).unwrap().name(), "stdout");

        conf.service.debug = false;
        assert!(create_sender(&conf).is_err());

        conf.service.app = Some("acme".to_string());
        assert_eq!(create_sender(&conf).unwrap().name(), "http");
    }
}

//! HTTP audit bus adapter
//!
//! Publishes audit events to the external alerting bus endpoint.
//! Fire-and-forget: a failed publish is logged and dropped, consumers of
//! the bus own any redelivery.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::import::adapters::traits::AuditBus;
use crate::import::types::AuditEvent;

pub struct HttpAuditBus {
    client: Client,
    endpoint: String,
}

impl HttpAuditBus {
    pub fn new(endpoint: String) -> Self {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self { client, endpoint }
    }
}

#[async_trait]
impl AuditBus for HttpAuditBus {
    async fn publish(&self, event: AuditEvent) {
        let result = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&event)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                log::warn!(
                    "audit bus rejected {:?} event: status {}",
                    event.reason(),
                    response.status()
                );
            }
            Err(e) => {
                log::warn!("audit bus publish failed for {:?} event: {}", event.reason(), e);
            }
        }
    }
}

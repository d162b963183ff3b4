//! Centrifugo push channel adapter
//!
//! Delivers status messages to clients over the Centrifugo server HTTP
//! API. Delivery is best-effort by contract: any transport or server
//! error is logged at debug level and reported as `false`, never raised.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::import::adapters::traits::PushChannel;

pub struct CentrifugoChannel {
    client: Client,
    api_url: String,
    api_key: String,
}

impl CentrifugoChannel {
    pub fn new(api_url: String, api_key: String) -> Self {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_url,
            api_key,
        }
    }

    /// Per-connection channel name on the Centrifugo side.
    fn channel_for(connection_id: &str) -> String {
        format!("imports:{}", connection_id)
    }

    async fn post(&self, method: &str, body: Value) -> bool {
        let result = self
            .client
            .post(format!("{}/{}", self.api_url, method))
            .header("X-API-Key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                log::debug!("push channel {} returned status {}", method, response.status());
                false
            }
            Err(e) => {
                log::debug!("push channel {} failed: {}", method, e);
                false
            }
        }
    }
}

#[async_trait]
impl PushChannel for CentrifugoChannel {
    async fn push(&self, connection_id: &str, payload: Value) -> bool {
        let body = json!({
            "channel": Self::channel_for(connection_id),
            "data": payload,
        });
        self.post("publish", body).await
    }

    async fn terminate(&self, connection_id: &str) -> bool {
        let body = json!({ "user": connection_id });
        self.post("disconnect", body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_naming() {
        assert_eq!(CentrifugoChannel::channel_for("conn-9"), "imports:conn-9");
    }

    #[tokio::test]
    async fn test_push_to_unreachable_server_is_swallowed() {
        let channel = CentrifugoChannel::new(
            "http://127.0.0.1:1/api".to_string(),
            "test_key".to_string(),
        );

        // Nothing listens on port 1; the contract is false, not an error.
        assert!(!channel.push("conn-1", json!({"status": "RECEIVED"})).await);
        assert!(!channel.terminate("conn-1").await);
    }
}

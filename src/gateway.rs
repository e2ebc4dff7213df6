//! Blocking facade over the async HTTP client
//!
//! The engine runs on plain threads; the device API and the message gateways
//! are reached through one reqwest client driven by an owned tokio runtime.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

pub struct HttpGateway {
    runtime: Runtime,
    client: Client,
    token: Option<String>,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("slawatch-http")
            .enable_all()
            .build()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Request(format!("client setup: {}", e)))?;
        Ok(Self {
            runtime,
            client,
            token: config.token.clone(),
        })
    }

    /// POST a JSON body and require a 2xx answer
    pub fn post_json<B>(&self, url: &str, body: &B) -> Result<(), GatewayError>
    where
        B: Serialize + ?Sized,
    {
        debug!("POST {}", url);
        self.runtime.block_on(async {
            let mut request = self.client.post(url).json(body);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| GatewayError::Request(e.to_string()))?;
            Self::check_status(response).await.map(|_| ())
        })
    }

    /// GET and decode a JSON answer
    pub fn get_json<T>(&self, url: &str) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
    {
        debug!("GET {}", url);
        self.runtime.block_on(async {
            let mut request = self.client.get(url);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| GatewayError::Request(e.to_string()))?;
            let response = Self::check_status(response).await?;
            response
                .json::<T>()
                .await
                .map_err(|e| GatewayError::Decode(e.to_string()))
        })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Join a base URL and a path segment with exactly one slash
pub fn endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

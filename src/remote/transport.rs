use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use super::error::BridgeError;
use super::types::RemoteOp;

/// A single encoded call to the remote endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
  pub function: &'static str,
  /// JSON array of positional arguments
  pub arguments: String,
  /// Correlation token the reply must carry when wrapped
  pub callback: String,
}

impl RpcRequest {
  pub fn new(op: &RemoteOp, callback: String) -> Self {
    Self {
      function: op.function_name(),
      arguments: op.arguments().to_string(),
      callback,
    }
  }

  /// Query parameters in wire order
  pub fn query_pairs(&self) -> [(&'static str, &str); 3] {
    [
      ("function", self.function),
      ("arguments", &self.arguments),
      ("callback", &self.callback),
    ]
  }
}

/// Carries one request to the endpoint and returns the raw reply body.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &RpcRequest) -> Result<String, BridgeError>;
}

/// Plain HTTP GET against the web-app endpoint.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  endpoint: Url,
}

impl HttpTransport {
  pub fn new(endpoint: &str, connect_timeout: Duration) -> color_eyre::Result<Self> {
    let endpoint = Url::parse(endpoint)
      .map_err(|e| color_eyre::eyre::eyre!("Invalid remote URL {}: {}", endpoint, e))?;

    let client = reqwest::Client::builder()
      .connect_timeout(connect_timeout)
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, endpoint })
  }

  fn request_url(&self, request: &RpcRequest) -> Url {
    let mut url = self.endpoint.clone();
    url.query_pairs_mut().extend_pairs(request.query_pairs());
    url
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: &RpcRequest) -> Result<String, BridgeError> {
    let response = self
      .client
      .get(self.request_url(request))
      .send()
      .await
      .map_err(|e| BridgeError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      return Err(BridgeError::Transport(format!("HTTP {}", status)));
    }

    response
      .text()
      .await
      .map_err(|e| BridgeError::Transport(format!("Failed to read body: {}", e)))
  }
}

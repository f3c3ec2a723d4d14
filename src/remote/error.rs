use std::time::Duration;
use thiserror::Error;

/// Ways a remote call can fail.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
  /// Endpoint unreachable or returned a non-success status.
  #[error("remote request failed: {0}")]
  Transport(String),

  /// No reply within the deadline.
  #[error("remote request timed out after {0:?}")]
  Timeout(Duration),

  /// Reply was an HTML page or otherwise not structured data.
  #[error("invalid response from remote endpoint: {0}")]
  InvalidResponse(String),

  /// Reply was addressed to another call.
  #[error("reply addressed to {got}, expected {expected}")]
  Correlation { expected: String, got: String },

  /// Value handed in for sync is not valid JSON.
  #[error("value is not valid JSON: {0}")]
  Serialization(String),

  #[error("offline")]
  Offline,
}

impl BridgeError {
  /// Misconfiguration rather than connectivity; retrying will not help
  /// until the endpoint is fixed.
  pub fn is_misconfiguration(&self) -> bool {
    matches!(
      self,
      BridgeError::InvalidResponse(_) | BridgeError::Correlation { .. }
    )
  }
}

//! Request/response bridge to the remote endpoint.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::BridgeError;
use super::transport::{RpcRequest, Transport};
use super::types::RemoteOp;

/// Markers of an HTML error or login page served instead of data
const HTML_MARKERS: [&str; 4] = ["<html", "<!doctype", "<head", "<body"];

type Registry = Arc<Mutex<HashMap<String, &'static str>>>;

/// Issues remote calls, one request per call.
///
/// Each call gets a fresh correlation token that stays registered exactly as
/// long as the call is in flight. Calls are independent: they may run
/// concurrently and each has its own deadline.
#[derive(Clone)]
pub struct Bridge {
  transport: Arc<dyn Transport>,
  timeout: Duration,
  in_flight: Registry,
}

impl Bridge {
  pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
    Self {
      transport,
      timeout,
      in_flight: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub async fn call(&self, op: &RemoteOp) -> Result<Value, BridgeError> {
    let registration = Registration::new(&self.in_flight, op.function_name());
    let request = RpcRequest::new(op, registration.token.clone());

    debug!(
      function = request.function,
      token = %request.callback,
      "Calling remote"
    );

    let body = match tokio::time::timeout(self.timeout, self.transport.send(&request)).await {
      Ok(result) => result?,
      Err(_) => {
        warn!(function = request.function, "Remote call timed out");
        return Err(BridgeError::Timeout(self.timeout));
      }
    };

    decode_reply(&request.callback, &body)
  }

  /// Number of calls currently awaiting a reply.
  pub fn in_flight(&self) -> usize {
    lock(&self.in_flight).len()
  }
}

/// In-flight registry entry, removed on drop so every exit path cleans up.
struct Registration {
  registry: Registry,
  token: String,
}

impl Registration {
  fn new(registry: &Registry, function: &'static str) -> Self {
    let mut map = lock(registry);
    let token = loop {
      let candidate = format!("jsonp_{}", Uuid::new_v4().simple());
      if !map.contains_key(&candidate) {
        break candidate;
      }
    };
    map.insert(token.clone(), function);

    Self {
      registry: Arc::clone(registry),
      token,
    }
  }
}

impl Drop for Registration {
  fn drop(&mut self) {
    lock(&self.registry).remove(&self.token);
  }
}

fn lock(registry: &Registry) -> std::sync::MutexGuard<'_, HashMap<String, &'static str>> {
  registry.lock().unwrap_or_else(|e| e.into_inner())
}

/// Turn a raw reply body into the call's payload.
///
/// Accepts bare JSON or `token(<json>)`; a wrapper naming another token is a
/// correlation error. HTML markers only count outside structured data: in a
/// body that is not JSON, or in a payload that is a bare string.
fn decode_reply(token: &str, body: &str) -> Result<Value, BridgeError> {
  let body = body.trim();

  let json = match unwrap_callback(body) {
    Some((name, inner)) if name == token => inner,
    Some((name, _)) => {
      return Err(BridgeError::Correlation {
        expected: token.to_string(),
        got: name.to_string(),
      })
    }
    None => body,
  };

  let payload: Value = match serde_json::from_str(json) {
    Ok(payload) => payload,
    Err(_) if looks_like_html(body) => return Err(BridgeError::InvalidResponse(snippet(body))),
    Err(e) => {
      return Err(BridgeError::InvalidResponse(format!(
        "{}: {}",
        e,
        snippet(json)
      )))
    }
  };

  if let Value::String(s) = &payload {
    if looks_like_html(s) {
      return Err(BridgeError::InvalidResponse(snippet(s)));
    }
  }

  Ok(payload)
}

/// Split `name(<inner>)` or `name(<inner>);` into its parts.
fn unwrap_callback(body: &str) -> Option<(&str, &str)> {
  let body = body.strip_suffix(';').unwrap_or(body).trim_end();
  let body = body.strip_suffix(')')?;
  let open = body.find('(')?;
  let name = body[..open].trim();
  let is_identifier = !name.is_empty()
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.'));
  is_identifier.then(|| (name, &body[open + 1..]))
}

fn looks_like_html(text: &str) -> bool {
  let lower = text.to_ascii_lowercase();
  HTML_MARKERS.iter().any(|m| lower.contains(m))
}

fn snippet(text: &str) -> String {
  text.chars().take(80).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote::mock::{MockReply, MockTransport};
  use crate::remote::Dataset;
  use serde_json::json;

  fn bridge(transport: &MockTransport, timeout: Duration) -> Bridge {
    Bridge::new(Arc::new(transport.clone()), timeout)
  }

  #[tokio::test]
  async fn test_wrapped_reply_resolves() {
    let transport = MockTransport::new();
    transport.set_sheet("Users", json!([{"name": "ana"}]));
    let bridge = bridge(&transport, Duration::from_secs(1));

    let payload = bridge.call(&RemoteOp::Fetch(Dataset::Users)).await.unwrap();

    assert_eq!(payload, json!([{"name": "ana"}]));
    assert_eq!(bridge.in_flight(), 0);
  }

  #[tokio::test]
  async fn test_bare_json_reply_resolves() {
    let transport = MockTransport::new();
    transport.push_reply(MockReply::Body(r#"{"success":true}"#.to_string()));
    let bridge = bridge(&transport, Duration::from_secs(1));

    let payload = bridge.call(&RemoteOp::Fetch(Dataset::Stock)).await.unwrap();
    assert_eq!(payload, json!({"success": true}));
  }

  #[tokio::test]
  async fn test_html_body_is_rejected() {
    let transport = MockTransport::new();
    transport.push_reply(MockReply::Body(
      "<!DOCTYPE html><html><body>Sign in</body></html>".to_string(),
    ));
    let bridge = bridge(&transport, Duration::from_secs(1));

    let err = bridge.call(&RemoteOp::Fetch(Dataset::Sales)).await.unwrap_err();
    assert!(matches!(err, BridgeError::InvalidResponse(_)));
    assert!(err.is_misconfiguration());
  }

  #[tokio::test]
  async fn test_html_string_payload_is_rejected() {
    let transport = MockTransport::new();
    transport.push_reply(MockReply::Body(
      json!("<html><head></head>Script error</html>").to_string(),
    ));
    let bridge = bridge(&transport, Duration::from_secs(1));

    let err = bridge.call(&RemoteOp::Fetch(Dataset::Sales)).await.unwrap_err();
    assert!(matches!(err, BridgeError::InvalidResponse(_)));
  }

  #[tokio::test]
  async fn test_markup_inside_json_fields_is_data() {
    let transport = MockTransport::new();
    transport.set_sheet(
      "Stock",
      json!([{"name": "Frame", "note": "<header> strip replaced"}]),
    );
    let bridge = bridge(&transport, Duration::from_secs(1));

    let payload = bridge.call(&RemoteOp::Fetch(Dataset::Stock)).await.unwrap();
    assert_eq!(payload[0]["note"], json!("<header> strip replaced"));
  }

  #[tokio::test]
  async fn test_non_json_body_is_rejected() {
    let transport = MockTransport::new();
    transport.push_reply(MockReply::Body("ok".to_string()));
    let bridge = bridge(&transport, Duration::from_secs(1));

    let err = bridge.call(&RemoteOp::Fetch(Dataset::Sales)).await.unwrap_err();
    assert!(matches!(err, BridgeError::InvalidResponse(_)));
  }

  #[tokio::test]
  async fn test_reply_for_other_token_is_rejected() {
    let transport = MockTransport::new();
    transport.push_reply(MockReply::Body("jsonp_someoneelse([1])".to_string()));
    let bridge = bridge(&transport, Duration::from_secs(1));

    let err = bridge.call(&RemoteOp::Fetch(Dataset::Vendors)).await.unwrap_err();
    assert!(matches!(err, BridgeError::Correlation { .. }));
  }

  #[tokio::test]
  async fn test_transport_failure_cleans_up() {
    let transport = MockTransport::new();
    transport.push_reply(MockReply::Fail("connection refused".to_string()));
    let bridge = bridge(&transport, Duration::from_secs(1));

    let err = bridge.call(&RemoteOp::Fetch(Dataset::Users)).await.unwrap_err();
    assert!(matches!(err, BridgeError::Transport(_)));
    assert_eq!(bridge.in_flight(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeout_leaves_no_registration() {
    let transport = MockTransport::new();
    transport.push_reply(MockReply::Hang);
    let bridge = bridge(&transport, Duration::from_secs(15));

    let pending = {
      let bridge = bridge.clone();
      tokio::spawn(async move { bridge.call(&RemoteOp::Fetch(Dataset::Users)).await })
    };

    tokio::task::yield_now().await;
    assert_eq!(bridge.in_flight(), 1);

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, BridgeError::Timeout(d) if d == Duration::from_secs(15)));
    assert_eq!(bridge.in_flight(), 0);
  }

  #[tokio::test]
  async fn test_concurrent_calls_use_distinct_tokens() {
    let transport = MockTransport::new();
    let bridge = bridge(&transport, Duration::from_secs(1));

    let calls = Dataset::ALL.map(|d| {
      let bridge = bridge.clone();
      async move { bridge.call(&RemoteOp::Fetch(d)).await }
    });
    let results = futures::future::join_all(calls).await;
    assert!(results.iter().all(|r| r.is_ok()));

    let tokens: std::collections::HashSet<_> =
      transport.requests().into_iter().map(|r| r.callback).collect();
    assert_eq!(tokens.len(), Dataset::ALL.len());
    assert_eq!(bridge.in_flight(), 0);
  }

  #[test]
  fn test_unwrap_callback_accepts_trailing_semicolon() {
    assert_eq!(
      unwrap_callback("jsonp_1([1, 2]);"),
      Some(("jsonp_1", "[1, 2]"))
    );
    assert_eq!(unwrap_callback("[1, 2]"), None);
    assert_eq!(unwrap_callback("(1)"), None);
  }
}

//! Scripted transport for tests.
//!
//! Records every request. Replies come from a queue of scripted outcomes; once
//! the queue is empty the mock behaves like a tiny spreadsheet backend that
//! stores full sheets on `syncSheetData` and returns them on `get<Sheet>`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::error::BridgeError;
use super::transport::{RpcRequest, Transport};

#[derive(Debug, Clone)]
pub enum MockReply {
  /// Raw body returned as-is
  Body(String),
  /// Transport failure
  Fail(String),
  /// Never answers
  Hang,
}

#[derive(Debug, Default, Clone)]
pub struct MockTransport {
  inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
  requests: Vec<RpcRequest>,
  scripted: VecDeque<MockReply>,
  sheets: HashMap<String, Value>,
  fail_all: Option<String>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push_reply(&self, reply: MockReply) {
    self.inner.lock().unwrap().scripted.push_back(reply);
  }

  /// Fail every request until cleared.
  pub fn fail_all(&self, error: Option<&str>) {
    self.inner.lock().unwrap().fail_all = error.map(String::from);
  }

  pub fn set_sheet(&self, sheet: &str, rows: Value) {
    self
      .inner
      .lock()
      .unwrap()
      .sheets
      .insert(sheet.to_string(), rows);
  }

  pub fn sheet(&self, sheet: &str) -> Option<Value> {
    self.inner.lock().unwrap().sheets.get(sheet).cloned()
  }

  pub fn requests(&self) -> Vec<RpcRequest> {
    self.inner.lock().unwrap().requests.clone()
  }

  /// `(sheet, rows)` of every `syncSheetData` request, in send order.
  pub fn synced(&self) -> Vec<(String, Value)> {
    self
      .requests()
      .iter()
      .filter(|r| r.function == "syncSheetData")
      .filter_map(|r| {
        let args: Value = serde_json::from_str(&r.arguments).ok()?;
        Some((args[0].as_str()?.to_string(), args[1].clone()))
      })
      .collect()
  }

  fn answer(&self, request: &RpcRequest) -> Result<String, BridgeError> {
    let mut inner = self.inner.lock().unwrap();
    if request.function == "syncSheetData" {
      let args: Value = serde_json::from_str(&request.arguments)
        .map_err(|e| BridgeError::Transport(e.to_string()))?;
      let sheet = args[0].as_str().unwrap_or_default().to_string();
      inner.sheets.insert(sheet, args[1].clone());
      return Ok(r#"{"success":true}"#.to_string());
    }

    let sheet = request.function.trim_start_matches("get");
    let rows = inner
      .sheets
      .get(sheet)
      .cloned()
      .unwrap_or_else(|| Value::Array(Vec::new()));
    Ok(format!("{}({})", request.callback, rows))
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn send(&self, request: &RpcRequest) -> Result<String, BridgeError> {
    let (reply, fail_all) = {
      let mut inner = self.inner.lock().unwrap();
      inner.requests.push(request.clone());
      (inner.scripted.pop_front(), inner.fail_all.clone())
    };

    if let Some(error) = fail_all {
      return Err(BridgeError::Transport(error));
    }

    match reply {
      Some(MockReply::Body(body)) => Ok(body),
      Some(MockReply::Fail(error)) => Err(BridgeError::Transport(error)),
      Some(MockReply::Hang) => std::future::pending().await,
      None => self.answer(request),
    }
  }
}

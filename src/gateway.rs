//! Request gateway for game mutations.

use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

use crate::event::Event;
use crate::net::{Credentials, Network, NetworkError, Request};
use crate::sync::{MutationStore, SyncCoordinator};

const SAVED_OFFLINE: &str = "Saved offline. Will sync when connected.";
const NETWORK_ERROR: &str = "Network error. Check your connection.";

/// Why a gateway call did not produce data.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
  /// The server answered with a non-success status
  #[error("{message}")]
  Http {
    status: u16,
    message: String,
    data: Value,
  },
  /// No response was received
  #[error(transparent)]
  Connectivity(#[from] NetworkError),
  /// A successful response whose body is not JSON
  #[error("invalid JSON in HTTP {status} response: {source}")]
  Decode {
    status: u16,
    source: serde_json::Error,
  },
  #[error("invalid url '{0}'")]
  InvalidUrl(String),
}

impl GatewayError {
  pub fn is_connectivity(&self) -> bool {
    matches!(self, GatewayError::Connectivity(_))
  }
}

/// Sends JSON mutations to the game server.
///
/// POST requests with a body that cannot reach the network are handed to
/// the sync coordinator for later replay.
pub struct Gateway<S: MutationStore> {
  network: Arc<dyn Network>,
  origin: Url,
  credentials: Credentials,
  coordinator: SyncCoordinator<S>,
  notices: Option<mpsc::UnboundedSender<Event>>,
}

impl<S: MutationStore> Gateway<S> {
  pub fn new(
    network: Arc<dyn Network>,
    origin: Url,
    credentials: Credentials,
    coordinator: SyncCoordinator<S>,
  ) -> Self {
    Self {
      network,
      origin,
      credentials,
      coordinator,
      notices: None,
    }
  }

  pub fn with_notices(mut self, notices: mpsc::UnboundedSender<Event>) -> Self {
    self.notices = Some(notices);
    self
  }

  fn notify(&self, message: &str) {
    tracing::info!("{}", message);
    if let Some(tx) = &self.notices {
      let _ = tx.send(Event::Notice(message.to_string()));
    }
  }

  /// Send a JSON request and parse the JSON response.
  pub async fn api_fetch(
    &self,
    path: &str,
    method: Method,
    body: Option<&Value>,
  ) -> Result<Value, GatewayError> {
    let url = self
      .origin
      .join(path)
      .map_err(|_| GatewayError::InvalidUrl(path.to_string()))?;

    let body_text = body.map(Value::to_string);

    let headers = self.credentials.json_headers(&self.origin, &url);
    let mut request = Request::new(method.clone(), url).with_headers(headers);
    if let Some(text) = &body_text {
      request = request.with_body(text.clone());
    }

    let response = match self.network.fetch(&request).await {
      Ok(response) => response,
      Err(e) => {
        tracing::error!(path, error = %e, "request failed");
        match &body_text {
          Some(text) if method == Method::POST => {
            self.coordinator.enqueue(path, method.as_str(), text);
            self.notify(SAVED_OFFLINE);
          }
          _ => self.notify(NETWORK_ERROR),
        }
        return Err(GatewayError::Connectivity(e));
      }
    };

    let data: Result<Value, _> = serde_json::from_slice(&response.body);

    if !response.is_success() {
      let data = data.unwrap_or(Value::Null);
      return Err(GatewayError::Http {
        status: response.status,
        message: error_message(&data, response.status),
        data,
      });
    }

    data.map_err(|source| GatewayError::Decode {
      status: response.status,
      source,
    })
  }

  /// POST /game/answer
  pub async fn post_answer(
    &self,
    question_id: i64,
    selected_answer: &str,
  ) -> Result<Value, GatewayError> {
    let body = json!({
      "question_id": question_id,
      "selected_answer": selected_answer,
    });
    self
      .api_fetch("/game/answer", Method::POST, Some(&body))
      .await
  }

  /// POST /game/complete/{session_id}
  pub async fn complete_session(&self, session_id: i64) -> Result<Value, GatewayError> {
    self
      .api_fetch(&format!("/game/complete/{}", session_id), Method::POST, None)
      .await
  }

  /// POST /game/buy-streak-freeze
  pub async fn buy_streak_freeze(&self) -> Result<Value, GatewayError> {
    self
      .api_fetch("/game/buy-streak-freeze", Method::POST, Some(&json!({})))
      .await
  }

  /// POST /game/store/buy
  pub async fn buy_store_item(&self, item_key: &str) -> Result<Value, GatewayError> {
    let body = json!({ "item_key": item_key });
    self
      .api_fetch("/game/store/buy", Method::POST, Some(&body))
      .await
  }

  /// POST /game/store/equip
  pub async fn equip_item(&self, item_key: &str) -> Result<Value, GatewayError> {
    let body = json!({ "item_key": item_key });
    self
      .api_fetch("/game/store/equip", Method::POST, Some(&body))
      .await
  }
}

/// `error`, then `detail`, then the bare status.
fn error_message(data: &Value, status: u16) -> String {
  ["error", "detail"]
    .iter()
    .filter_map(|field| data.get(field))
    .find_map(|v| match v {
      Value::String(s) if s.is_empty() => None,
      Value::String(s) => Some(s.clone()),
      Value::Null => None,
      other => Some(other.to_string()),
    })
    .unwrap_or_else(|| format!("HTTP {}", status))
}

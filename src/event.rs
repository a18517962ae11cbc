use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

/// Events raised by the offline layer for the host to act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// Short-lived message to show the player
  Notice(String),
  /// A wake-up was requested for the given connectivity signal tag
  SyncRegistered(String),
}

/// Message broadcast to every connected UI context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
  /// A new cache generation took over; clients should offer a reload
  #[serde(rename = "SW_UPDATED")]
  SwUpdated,
}

/// Collects events sent from components through cloned senders
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Take every event that has already been sent
  pub fn pending(&mut self) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = self.rx.try_recv() {
      events.push(event);
    }
    events
  }
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new()
  }
}

/// Channel for reaching connected clients.
pub fn client_channel() -> broadcast::Sender<ClientMessage> {
  let (tx, _rx) = broadcast::channel(16);
  tx
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sw_updated_wire_format() {
    let json = serde_json::to_string(&ClientMessage::SwUpdated).unwrap();
    assert_eq!(json, r#"{"type":"SW_UPDATED"}"#);
  }

  #[test]
  fn test_pending_collects_in_order() {
    let mut events = EventHandler::new();
    let tx = events.sender();

    tx.send(Event::Notice("one".to_string())).unwrap();
    tx.send(Event::SyncRegistered("sync-answers".to_string()))
      .unwrap();

    assert_eq!(
      events.pending(),
      vec![
        Event::Notice("one".to_string()),
        Event::SyncRegistered("sync-answers".to_string()),
      ]
    );
    assert!(events.pending().is_empty());
  }
}

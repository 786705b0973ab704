use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::remote::{Method, Request, Upstream};

/// Control messages accepted by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
  /// Activate a waiting worker version immediately
  SkipWaiting,
}

/// Worker events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
  /// Backend became reachable
  Online,
  /// Backend stopped answering
  Offline,
  /// Explicit request to drain the queue
  SyncNow,
  Control(ControlMessage),
  Shutdown,
}

/// Event handler that merges connectivity probes, signals and explicit
/// messages into one stream.
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  /// Handle for posting events from elsewhere.
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Probe the backend every `interval`, emitting `Online`/`Offline` on
  /// each change (and once for the initial state).
  pub fn spawn_probe<U>(&self, upstream: Arc<U>, interval: Duration, path: String) -> JoinHandle<()>
  where
    U: Upstream + 'static,
  {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      let request = Request::new(Method::Head, path);
      let mut last: Option<bool> = None;

      loop {
        let online = upstream.send(&request).await.is_ok();
        if last != Some(online) {
          tracing::info!(online, "connectivity changed");
          let event = if online { Event::Online } else { Event::Offline };
          if tx.send(event).is_err() {
            break;
          }
          last = Some(online);
        }
        tokio::time::sleep(interval).await;
      }
    })
  }

  /// Emit `Shutdown` on Ctrl-C.
  pub fn spawn_signal_listener(&self) -> JoinHandle<()> {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        let _ = tx.send(Event::Shutdown);
      }
    })
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new()
  }
}

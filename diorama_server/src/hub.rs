//! The subscription hub.
//!
//! Every live WebSocket registers an unbounded sender here; broadcasts fan
//! out to all of them and prune subscribers whose socket task has gone away
//! (closed receivers are dropped on the next broadcast, not eagerly). Each
//! socket additionally runs its own 500 ms poll of the node table and
//! pushes a `simulationNodes` event whenever the rows change.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::sync::mpsc;

use diorama_deploy::{SimulationEvent, SimulationNodeRow};

use crate::events::{self, outbound};
use crate::{AppState, dispatch};

const NODE_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone, Default)]
pub struct Hub {
    senders: Arc<Mutex<Vec<mpsc::UnboundedSender<String>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Hub::default()
    }

    /// Attach a subscriber; the returned receiver yields every frame
    /// broadcast from now on. Dropping it detaches the subscriber on the
    /// next broadcast.
    pub fn register(&self) -> mpsc::UnboundedReceiver<String> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(sender);
        receiver
    }

    /// Serialise and send an event to every live subscriber, dropping the
    /// dead ones along the way.
    pub fn broadcast<T: Serialize>(&self, event: &str, data: &T) {
        let frame = match events::encode_frame(event, data) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::error!("failed to encode `{event}` frame: {error:#}");
                return;
            }
        };
        let mut senders = self.senders.lock().unwrap();
        senders.retain(|sender| !sender.is_closed());
        for sender in senders.iter() {
            let _ = sender.send(frame.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut senders = self.senders.lock().unwrap();
        senders.retain(|sender| !sender.is_closed());
        senders.len()
    }
}

/// Compare two node tables as sets of rows keyed by nid.
pub fn rows_changed(a: &[SimulationNodeRow], b: &[SimulationNodeRow]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_by(|x, y| x.nid.cmp(&y.nid));
    b.sort_by(|x, y| x.nid.cmp(&y.nid));
    a != b
}

/// Drive one WebSocket connection until it closes.
pub async fn handle_socket(state: Arc<AppState>, socket: WebSocket) {
    tracing::info!("new ws connection");
    let (mut sink, mut stream) = socket.split();

    let mut frames = state.hub.register();
    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let poll_state = state.clone();
    let poller = tokio::spawn(async move {
        let mut last = poll_state
            .simulation
            .simulation_nodes()
            .await
            .unwrap_or_default();
        let mut ticker = tokio::time::interval(NODE_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match poll_state.simulation.simulation_nodes().await {
                Ok(rows) => {
                    if rows_changed(&rows, &last) {
                        last = rows;
                        poll_state.hub.broadcast(outbound::SIMULATION_NODES, &last);
                    }
                }
                Err(error) => {
                    tracing::debug!("node status poll failed: {error:#}");
                }
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match events::decode_frame(text.as_str()) {
                Ok(event) => {
                    if let Err(error) = dispatch::handle(&state, event).await {
                        tracing::warn!("handler failed: {error:#}");
                    }
                }
                Err(error) => tracing::warn!("dropping bad frame: {error:#}"),
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    poller.abort();
    writer.abort();
    tracing::info!("ws connection closed");
}

/// Bridge orchestrator events onto the hub. Runs for the life of the
/// process.
pub async fn forward_simulation_events(
    mut simulation_events: broadcast::Receiver<SimulationEvent>,
    hub: Hub,
) {
    loop {
        match simulation_events.recv().await {
            Ok(SimulationEvent::StateChanged(state)) => {
                hub.broadcast(outbound::SIMULATION_STATE, &state);
            }
            Ok(SimulationEvent::Logs { nid, entries }) => {
                hub.broadcast(outbound::SIMULATION_LOGS, &json!({ "nid": nid, "log": entries }));
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "subscriber bridge lagged behind simulation events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

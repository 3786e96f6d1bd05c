//! The operator-facing surface of the Diorama backend: a persistent
//! WebSocket carrying `{event, data}` frames plus a small HTTP API for
//! uploads and topology saves. All outbound messages are broadcast to every
//! live subscriber; the UI is single-tenant.

use std::sync::Arc;

use diorama_deploy::Simulation;
use diorama_store::Store;

pub mod dispatch;
pub mod events;
pub mod http;
pub mod hub;
pub mod topology;

pub use hub::Hub;

/// Shared server state, one per process, handed to every handler.
pub struct AppState {
    pub store: Store,
    pub simulation: Arc<Simulation>,
    pub hub: Hub,
}

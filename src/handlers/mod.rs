pub mod health_handlers;
pub mod object_handlers;

use crate::services::local_store::LocalObjectStore;

/// Shared state of the object server.
#[derive(Clone)]
pub struct AppState {
    pub store: LocalObjectStore,
    /// `Access-Control-Allow-Origin` sent with every object.
    pub cors_allow_origin: String,
}

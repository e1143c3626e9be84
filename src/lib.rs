//! Virtual Try-On Serving
//!
//! Serves a pretrained try-on diffusion pipeline through an HTTP API and a
//! serverless job handler. The model is loaded once per process, with device
//! downgrade and a one-shot fallback to a secondary model.

pub mod api;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod model;

pub use error::{AppError, Result};

use std::sync::Arc;

use dispatch::RequestDispatcher;
use model::InferenceResource;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<config::Settings>,
    pub resource: Arc<InferenceResource>,
    pub dispatcher: Arc<RequestDispatcher>,
}

impl AppState {
    /// Wire the dispatcher to the resource using the configured load policy
    pub fn new(settings: config::Settings, resource: Arc<InferenceResource>) -> Self {
        let dispatcher = Arc::new(RequestDispatcher::new(
            resource.clone(),
            settings.model.load_policy,
        ));

        Self {
            settings: Arc::new(settings),
            resource,
            dispatcher,
        }
    }
}

//! Request dispatch - validation, decoding, readiness and inference
//!
//! Every failure comes back as an [`AppError`]; nothing escapes to the
//! serving adapters as a panic.

use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::codec::{self, ImagePayload};
use crate::config::LoadPolicy;
use crate::error::{AppError, Result, MISSING_INPUT_MESSAGE};
use crate::model::InferenceResource;

/// A try-on request as received by either adapter
#[derive(Debug, Clone, Default)]
pub struct TryOnRequest {
    pub person: Option<ImagePayload>,
    pub cloth: Option<ImagePayload>,
}

/// A successful try-on
#[derive(Debug, Clone)]
pub struct TryOnOutput {
    /// Base64-encoded PNG
    pub result: String,
    /// Model that produced the image
    pub model_id: Option<String>,
}

/// Turns requests into inference calls on the shared resource
pub struct RequestDispatcher {
    resource: Arc<InferenceResource>,
    policy: LoadPolicy,
}

impl RequestDispatcher {
    pub fn new(resource: Arc<InferenceResource>, policy: LoadPolicy) -> Self {
        Self { resource, policy }
    }

    pub fn resource(&self) -> &Arc<InferenceResource> {
        &self.resource
    }

    /// Handle one request end to end
    pub async fn handle(&self, request: TryOnRequest) -> Result<TryOnOutput> {
        let request_id = Uuid::new_v4();
        let span = info_span!("tryon", request_id = %request_id);

        let result = self.dispatch(request).instrument(span.clone()).await;
        span.in_scope(|| log_outcome(&result));
        result
    }

    async fn dispatch(&self, request: TryOnRequest) -> Result<TryOnOutput> {
        let (person, cloth) = match (request.person, request.cloth) {
            (Some(person), Some(cloth)) if !person.is_empty() && !cloth.is_empty() => {
                (person, cloth)
            }
            _ => return Err(AppError::Validation(MISSING_INPUT_MESSAGE.to_string())),
        };

        debug!(
            person_encoding = person.encoding(),
            cloth_encoding = cloth.encoding(),
            "Decoding request images"
        );
        let person = codec::decode(&person)?;
        let cloth = codec::decode(&cloth)?;

        match self.policy {
            LoadPolicy::Startup => self.resource.check_ready()?,
            LoadPolicy::OnFirstRequest => self.resource.ensure_loaded().await?,
        }

        let output = self.resource.run(&person, &cloth).await?;
        let result = codec::encode_base64_png(&output)?;

        Ok(TryOnOutput {
            result,
            model_id: self.resource.status().model_id,
        })
    }
}

fn log_outcome(result: &Result<TryOnOutput>) {
    match result {
        Ok(output) => info!(model_id = ?output.model_id, "Try-on completed"),
        Err(err @ AppError::Validation(_)) => debug!(error = %err, "Rejected try-on request"),
        Err(err @ AppError::Decode(_)) => warn!(error = %err, "Undecodable try-on image"),
        Err(AppError::NotReady(_)) => info!("Try-on request arrived before the model was ready"),
        Err(err @ AppError::ModelLoad(_)) => warn!(error = %err, "Try-on request refused; model unavailable"),
        // Execution failures are logged with full context by the resource
        Err(AppError::InferenceExecution(_)) => {}
        Err(err) => warn!(error = %err, "Try-on request failed"),
    }
}

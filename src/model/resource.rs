//! Shared inference resource with serialized loading and fallback
//!
//! The resource owns the single pipeline handle of the process. Loading moves
//! through `Unloaded -> Loading -> {Ready, Failed}`; a primary failure with an
//! environment-class cause is retried once against the fallback identifier
//! inside the same load. `Failed` is terminal: later calls report the stored
//! primary error without touching the loader again.
//!
//! Load attempts are serialized behind an async mutex, so concurrent callers
//! of [`InferenceResource::ensure_loaded`] wait for the one load in flight.
//! Inference calls go through a semaphore (one slot by default) and are
//! bounded by a timeout.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use image::RgbImage;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::config::ModelConfig;
use crate::error::{AppError, Result};
use crate::model::device::{select_device, AcceleratorProbe, Device, Precision};
use crate::model::traits::{LoadError, LoadErrorKind, LoadSpec, ModelLoader, TryOnInput, TryOnPipeline};

/// Lifecycle of the model handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

/// A materialized pipeline and what it was loaded as
struct ModelHandle {
    identifier: String,
    pipeline: Arc<dyn TryOnPipeline>,
}

struct ResourceState {
    state: LoadState,
    handle: Option<Arc<ModelHandle>>,
    device: Option<Device>,
    precision: Option<Precision>,
    last_error: Option<LoadError>,
    loaded_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of the resource, used by health reporting
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub state: LoadState,
    pub model_id: Option<String>,
    pub device: Option<Device>,
    pub precision: Option<Precision>,
    pub last_error: Option<String>,
    pub loaded_at: Option<DateTime<Utc>>,
}

/// The process-wide try-on model
pub struct InferenceResource {
    config: ModelConfig,
    loader: Arc<dyn ModelLoader>,
    probe: Arc<dyn AcceleratorProbe>,
    state: RwLock<ResourceState>,
    load_lock: Arc<Mutex<()>>,
    execution_slots: Arc<Semaphore>,
}

impl InferenceResource {
    pub fn new(
        config: ModelConfig,
        loader: Arc<dyn ModelLoader>,
        probe: Arc<dyn AcceleratorProbe>,
    ) -> Self {
        let slots = config.max_concurrent_inference.max(1);
        Self {
            config,
            loader,
            probe,
            state: RwLock::new(ResourceState {
                state: LoadState::Unloaded,
                handle: None,
                device: None,
                precision: None,
                last_error: None,
                loaded_at: None,
            }),
            load_lock: Arc::new(Mutex::new(())),
            execution_slots: Arc::new(Semaphore::new(slots)),
        }
    }

    pub fn state(&self) -> LoadState {
        self.state.read().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LoadState::Ready
    }

    pub fn status(&self) -> ModelStatus {
        let state = self.state.read();
        ModelStatus {
            state: state.state,
            model_id: state.handle.as_ref().map(|h| h.identifier.clone()),
            device: state.device,
            precision: state.precision,
            last_error: state.last_error.as_ref().map(|e| e.to_string()),
            loaded_at: state.loaded_at,
        }
    }

    /// Readiness gate for callers that must not trigger a load.
    ///
    /// `Failed` reports the stored load error; `Unloaded` and `Loading`
    /// report not ready.
    pub fn check_ready(&self) -> Result<()> {
        let state = self.state.read();
        match state.state {
            LoadState::Ready => Ok(()),
            LoadState::Failed => Err(AppError::ModelLoad(stored_error(&state, &self.config))),
            LoadState::Unloaded | LoadState::Loading => Err(AppError::NotReady(None)),
        }
    }

    /// Load the model unless it is already loaded or has failed for good.
    ///
    /// Idempotent. Callers arriving while a load is in flight wait for it and
    /// observe its outcome. The load itself runs on its own task so a caller
    /// that goes away does not abandon it halfway.
    pub async fn ensure_loaded(self: &Arc<Self>) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        let guard = Arc::clone(&self.load_lock).lock_owned().await;

        {
            let state = self.state.read();
            match state.state {
                LoadState::Ready => return Ok(()),
                LoadState::Failed => {
                    return Err(AppError::ModelLoad(stored_error(&state, &self.config)))
                }
                LoadState::Unloaded | LoadState::Loading => {}
            }
        }

        let resource = Arc::clone(self);
        let task = tokio::spawn(async move {
            let _guard = guard;
            resource.load().await
        });

        task.await
            .map_err(|e| AppError::Internal(format!("model load task failed: {}", e)))?
    }

    async fn load(&self) -> Result<()> {
        let (device, precision) = select_device(self.config.device, self.probe.as_ref());
        {
            let mut state = self.state.write();
            state.state = LoadState::Loading;
            state.device = Some(device);
            state.precision = Some(precision);
        }

        let primary = self.config.primary_id.trim().to_string();
        info!(model_id = %primary, device = %device, precision = %precision, "Loading try-on model");
        let started = Instant::now();

        let outcome = match self.attempt(&primary, device, precision).await {
            Ok(pipeline) => Ok((primary, pipeline)),
            Err(primary_err) => self.try_fallback(primary_err, device, precision).await,
        };

        match outcome {
            Ok((identifier, pipeline)) => {
                info!(
                    model_id = %identifier,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Model ready"
                );
                let mut state = self.state.write();
                state.state = LoadState::Ready;
                state.handle = Some(Arc::new(ModelHandle { identifier, pipeline }));
                state.last_error = None;
                state.loaded_at = Some(Utc::now());
                Ok(())
            }
            Err(err) => {
                error!(
                    model_id = %err.identifier,
                    kind = %err.kind,
                    error = %err.message,
                    "Model failed to load; serving health checks only"
                );
                let mut state = self.state.write();
                state.state = LoadState::Failed;
                state.last_error = Some(err.clone());
                Err(AppError::ModelLoad(err))
            }
        }
    }

    /// Retry once against the fallback identifier when the primary failure
    /// qualifies. The primary error is what the caller sees if this fails.
    async fn try_fallback(
        &self,
        primary_err: LoadError,
        device: Device,
        precision: Precision,
    ) -> std::result::Result<(String, Arc<dyn TryOnPipeline>), LoadError> {
        if !primary_err.kind.is_environment() {
            return Err(primary_err);
        }

        warn!(
            model_id = %primary_err.identifier,
            kind = %primary_err.kind,
            error = %primary_err.message,
            "Primary model failed with an environment error. Likely causes: private or gated \
             repository (configure an auth token), missing VAE/UNet weight files, or a wrong revision"
        );

        let Some(fallback) = self.config.fallback_identifier() else {
            warn!("No usable fallback model configured");
            return Err(primary_err);
        };

        info!(model_id = %fallback, "Retrying with fallback model");
        match self.attempt(fallback, device, precision).await {
            Ok(pipeline) => Ok((fallback.to_string(), pipeline)),
            Err(fallback_err) => {
                error!(
                    model_id = %fallback,
                    kind = %fallback_err.kind,
                    error = %fallback_err.message,
                    "Fallback model failed to load"
                );
                Err(primary_err)
            }
        }
    }

    async fn attempt(
        &self,
        identifier: &str,
        device: Device,
        precision: Precision,
    ) -> std::result::Result<Arc<dyn TryOnPipeline>, LoadError> {
        let spec = LoadSpec {
            identifier: identifier.to_string(),
            revision: self.config.revision.clone(),
            vae_id: self.config.vae_id.clone(),
            device,
            precision,
            auth_token: self.config.auth_token.clone(),
        };
        let timeout = Duration::from_secs(self.config.load_timeout_secs);
        let loader = Arc::clone(&self.loader);

        let mut task = tokio::spawn(async move { loader.load(&spec).await });
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(LoadError::other(
                identifier,
                format!("loader task failed: {}", join_err),
            )),
            Err(_) => {
                task.abort();
                Err(LoadError::new(
                    LoadErrorKind::Timeout,
                    identifier,
                    format!("load did not finish within {}s", timeout.as_secs()),
                ))
            }
        }
    }

    /// Run one try-on call.
    ///
    /// Fails with [`AppError::NotReady`] unless the model is ready, or with
    /// the stored load error once loading has failed; the pipeline is not
    /// touched in either case. Both inputs are normalized to the model canvas
    /// and the first generated candidate is returned. The inference timeout
    /// covers the wait for an execution slot as well as the call itself.
    pub async fn run(&self, person: &RgbImage, cloth: &RgbImage) -> Result<RgbImage> {
        let handle = {
            let state = self.state.read();
            match (&state.state, &state.handle) {
                (LoadState::Ready, Some(handle)) => Arc::clone(handle),
                (LoadState::Failed, _) => {
                    return Err(AppError::ModelLoad(stored_error(&state, &self.config)))
                }
                _ => return Err(AppError::NotReady(None)),
            }
        };

        let person = codec::normalize(person);
        let cloth = codec::normalize(cloth);

        let input = TryOnInput {
            image: person,
            mask_image: cloth.clone(),
            cloth,
        };
        let pipeline = Arc::clone(&handle.pipeline);
        let slots = Arc::clone(&self.execution_slots);
        let timeout = Duration::from_secs(self.config.inference_timeout_secs);
        let started = Instant::now();

        // The permit lives inside the task: a dropped caller or an aborted
        // call keeps its slot until the pipeline has actually stopped.
        let mut task = tokio::spawn(async move {
            let _permit = slots
                .acquire_owned()
                .await
                .map_err(|_| anyhow!("inference slots closed"))?;
            pipeline.run(input).await
        });
        let outcome = match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(candidates))) => candidates
                .into_iter()
                .next()
                .ok_or_else(|| "pipeline returned no images".to_string()),
            Ok(Ok(Err(e))) => Err(format!("{:#}", e)),
            Ok(Err(join_err)) => Err(format!("pipeline task failed: {}", join_err)),
            Err(_) => {
                task.abort();
                Err(format!("inference did not finish within {}s", timeout.as_secs()))
            }
        };

        match outcome {
            Ok(image) => {
                debug!(
                    model_id = %handle.identifier,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Inference completed"
                );
                Ok(image)
            }
            Err(message) => {
                error!(
                    model_id = %handle.identifier,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %message,
                    "Inference failed"
                );
                Err(AppError::InferenceExecution(message))
            }
        }
    }
}

fn stored_error(state: &ResourceState, config: &ModelConfig) -> LoadError {
    state
        .last_error
        .clone()
        .unwrap_or_else(|| LoadError::other(config.primary_id.clone(), "model failed to load"))
}

//! Model hub artifact checks and the runtime-backed loader

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::error::{AppError, Result};
use crate::model::remote::RemotePipeline;
use crate::model::traits::{LoadError, LoadSpec, ModelLoader, TryOnPipeline};

/// Map an HTTP failure status to a classified load error
pub fn classify_status(identifier: &str, status: StatusCode, body: &str) -> LoadError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LoadError::auth_failure(
            identifier,
            format!("access denied ({}); the repository may be private or gated: {}", status, body),
        ),
        StatusCode::NOT_FOUND | StatusCode::GONE | StatusCode::UNPROCESSABLE_ENTITY => {
            LoadError::missing_artifact(identifier, format!("not found ({}): {}", status, body))
        }
        _ => LoadError::other(identifier, format!("unexpected status {}: {}", status, body)),
    }
}

fn with_token(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// True for `.safetensors` and `.bin` weight files
pub fn is_weight_file(path: &str) -> bool {
    path.ends_with(".safetensors") || path.ends_with(".bin")
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    #[serde(default)]
    siblings: Vec<RepoSibling>,
}

#[derive(Debug, Deserialize)]
struct RepoSibling {
    rfilename: String,
}

/// Minimal client for the model hub's repository metadata
#[derive(Clone)]
pub struct HubClient {
    client: Client,
    endpoint: String,
}

impl HubClient {
    pub fn new(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// List every file of a model repository at a revision
    pub async fn list_files(
        &self,
        model_id: &str,
        revision: &str,
        token: Option<&str>,
    ) -> std::result::Result<Vec<String>, LoadError> {
        let url = format!("{}/api/models/{}/revision/{}", self.endpoint, model_id, revision);
        debug!(model_id = %model_id, url = %url, "Listing repository files");

        let response = with_token(self.client.get(&url), token)
            .send()
            .await
            .map_err(|e| LoadError::other(model_id, format!("hub request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(model_id, status, &body));
        }

        let info: RepoInfo = response
            .json()
            .await
            .map_err(|e| LoadError::other(model_id, format!("invalid hub response: {}", e)))?;

        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }
}

/// What a model repository contains, as far as loading is concerned
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArtifactReport {
    pub model_id: String,
    pub has_vae_dir: bool,
    pub has_unet_dir: bool,
    pub vae_weights: Vec<String>,
    pub unet_weights: Vec<String>,
}

impl ArtifactReport {
    pub fn from_files(model_id: &str, files: &[String]) -> Self {
        let in_dir = |dir: &str| -> Vec<String> {
            files
                .iter()
                .filter(|f| f.starts_with(dir) && is_weight_file(f))
                .cloned()
                .collect()
        };

        Self {
            model_id: model_id.to_string(),
            has_vae_dir: files.iter().any(|f| f.starts_with("vae/")),
            has_unet_dir: files.iter().any(|f| f.starts_with("unet/")),
            vae_weights: in_dir("vae/"),
            unet_weights: in_dir("unet/"),
        }
    }

    /// Describe the first missing artifact, if any.
    ///
    /// With an external VAE the repository's own `vae/` folder is not needed.
    pub fn missing(&self, external_vae: bool) -> Option<String> {
        if !external_vae && self.vae_weights.is_empty() {
            return Some("no VAE weights under vae/".to_string());
        }
        if self.unet_weights.is_empty() {
            return Some("no UNet weights under unet/".to_string());
        }
        None
    }
}

/// Request body for the runtime's `/load` route
#[derive(Debug, Serialize)]
struct RuntimeLoadRequest<'a> {
    model_id: &'a str,
    revision: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    vae_id: Option<&'a str>,
    device: String,
    precision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
}

/// Loader that checks artifacts on the hub and has the runtime load them
pub struct HubLoader {
    hub: HubClient,
    client: Client,
    runtime_url: String,
}

impl HubLoader {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            hub: HubClient::new(client.clone(), &config.hub_endpoint),
            client,
            runtime_url: config.runtime_url.trim_end_matches('/').to_string(),
        })
    }

    async fn verify_artifacts(&self, spec: &LoadSpec) -> std::result::Result<(), LoadError> {
        let token = spec.auth_token.as_deref();
        let files = self.hub.list_files(&spec.identifier, &spec.revision, token).await?;
        let report = ArtifactReport::from_files(&spec.identifier, &files);

        if let Some(missing) = report.missing(spec.vae_id.is_some()) {
            return Err(LoadError::missing_artifact(&spec.identifier, missing));
        }

        if let Some(vae_id) = spec.vae_id.as_deref() {
            let vae_files = self
                .hub
                .list_files(vae_id, "main", token)
                .await
                .map_err(|e| LoadError::new(e.kind, spec.identifier.clone(), format!("external VAE {}", e)))?;
            if !vae_files.iter().any(|f| !f.contains('/') && is_weight_file(f)) {
                return Err(LoadError::missing_artifact(
                    &spec.identifier,
                    format!("external VAE '{}' has no weight files", vae_id),
                ));
            }
        }

        debug!(
            model_id = %spec.identifier,
            vae_weights = report.vae_weights.len(),
            unet_weights = report.unet_weights.len(),
            "Repository artifacts verified"
        );
        Ok(())
    }

    async fn materialize(&self, spec: &LoadSpec) -> std::result::Result<(), LoadError> {
        let body = RuntimeLoadRequest {
            model_id: &spec.identifier,
            revision: &spec.revision,
            vae_id: spec.vae_id.as_deref(),
            device: spec.device.to_string(),
            precision: spec.precision.to_string(),
            token: spec.auth_token.as_deref(),
        };

        let url = format!("{}/load", self.runtime_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LoadError::other(&spec.identifier, format!("runtime unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(&spec.identifier, status, &text));
        }
        Ok(())
    }
}

#[async_trait]
impl ModelLoader for HubLoader {
    async fn load(&self, spec: &LoadSpec) -> std::result::Result<Arc<dyn TryOnPipeline>, LoadError> {
        self.verify_artifacts(spec).await?;
        self.materialize(spec).await?;

        info!(
            model_id = %spec.identifier,
            device = %spec.device,
            precision = %spec.precision,
            "Runtime loaded pipeline"
        );

        Ok(Arc::new(RemotePipeline::new(
            spec.identifier.clone(),
            self.client.clone(),
            &self.runtime_url,
        )))
    }
}

//! Try-on pipeline executed by the inference runtime over HTTP

use anyhow::bail;
use async_trait::async_trait;
use image::RgbImage;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec;
use crate::model::traits::{TryOnInput, TryOnPipeline};

/// Request body for the runtime's `/infer` route
#[derive(Debug, Serialize)]
struct InferRequest<'a> {
    model_id: &'a str,
    image: String,
    mask_image: String,
    cloth: String,
}

/// Response body of the runtime's `/infer` route
#[derive(Debug, Deserialize)]
struct InferResponse {
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

/// A pipeline that lives in the inference runtime process
pub struct RemotePipeline {
    identifier: String,
    client: Client,
    runtime_url: String,
}

impl RemotePipeline {
    pub fn new(identifier: String, client: Client, runtime_url: &str) -> Self {
        Self {
            identifier,
            client,
            runtime_url: runtime_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TryOnPipeline for RemotePipeline {
    async fn run(&self, input: TryOnInput) -> anyhow::Result<Vec<RgbImage>> {
        let body = InferRequest {
            model_id: &self.identifier,
            image: codec::encode_base64_png(&input.image)?,
            mask_image: codec::encode_base64_png(&input.mask_image)?,
            cloth: codec::encode_base64_png(&input.cloth)?,
        };

        let url = format!("{}/infer", self.runtime_url);
        debug!(model_id = %self.identifier, url = %url, "Sending try-on request to runtime");

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("runtime returned {}: {}", status, text);
        }

        let parsed: InferResponse = response.json().await?;
        if let Some(error) = parsed.error {
            bail!("runtime reported an error: {}", error);
        }

        parsed
            .images
            .iter()
            .map(|b64| -> anyhow::Result<RgbImage> {
                let bytes = codec::base64::decode(b64)?;
                Ok(codec::decode_bytes(&bytes)?)
            })
            .collect()
    }
}

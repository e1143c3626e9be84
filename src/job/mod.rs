//! Serverless job surface
//!
//! Wire contract (v1):
//!
//! ```json
//! {"id": "optional", "input": {"person": "<base64>", "cloth": "<base64>"}}
//! ```
//!
//! Success yields `{"result": "<base64 PNG>"}`, failure `{"error": "<message>"}`.
//! Field names are exactly `person` and `cloth`; other names are ignored.

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::codec::ImagePayload;
use crate::dispatch::{RequestDispatcher, TryOnRequest};
use crate::error::{AppError, Result};

#[derive(Debug, Default, Deserialize)]
struct Job {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    input: Option<JobInput>,
}

#[derive(Debug, Default, Deserialize)]
struct JobInput {
    #[serde(default)]
    person: Option<String>,
    #[serde(default)]
    cloth: Option<String>,
}

/// Outcome of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutput {
    Success { result: String },
    Failure { error: String },
}

impl JobOutput {
    fn failure(err: &AppError) -> Self {
        let error = match err.details() {
            Some(details) => format!("{}: {}", err.client_message(), details),
            None => err.client_message(),
        };
        Self::Failure { error }
    }

    pub fn into_value(self) -> Value {
        match self {
            Self::Success { result } => json!({ "result": result }),
            Self::Failure { error } => json!({ "error": error }),
        }
    }
}

/// Adapts job payloads to the dispatcher
pub struct JobHandler {
    dispatcher: Arc<RequestDispatcher>,
}

impl JobHandler {
    pub fn new(dispatcher: Arc<RequestDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Handle one job payload; never fails
    pub async fn handle(&self, job: Value) -> Value {
        self.process(job).await.into_value()
    }

    pub async fn process(&self, job: Value) -> JobOutput {
        let job: Job = match serde_json::from_value(job) {
            Ok(job) => job,
            Err(e) => {
                return JobOutput::failure(&AppError::Validation(format!(
                    "Invalid job payload: {}",
                    e
                )))
            }
        };

        debug!(job_id = ?job.id, "Processing job");
        let input = job.input.unwrap_or_default();
        let request = TryOnRequest {
            person: input.person.map(ImagePayload::Base64),
            cloth: input.cloth.map(ImagePayload::Base64),
        };

        match self.dispatcher.handle(request).await {
            Ok(output) => JobOutput::Success {
                result: output.result,
            },
            Err(err) => JobOutput::failure(&err),
        }
    }

    /// Run newline-delimited jobs from `reader`, one result line per job.
    ///
    /// Blank lines are skipped. Returns the number of jobs handled.
    pub async fn run_lines<R, W>(&self, reader: R, mut writer: W) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut handled = 0;

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let output = match serde_json::from_str::<Value>(line) {
                Ok(job) => self.handle(job).await,
                Err(e) => JobOutput::failure(&AppError::Validation(format!(
                    "Invalid job payload: {}",
                    e
                )))
                .into_value(),
            };

            writer.write_all(output.to_string().as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            handled += 1;
        }

        info!(jobs = handled, "Job input exhausted");
        Ok(handled)
    }
}

//! Client for the ComfyUI endpoints the pipeline drives.
//!
//! Every request goes through [`ComfyUIApi::send`], which turns a non-2xx
//! reply into [`ComfyUIApiError::Rejected`] with the body attached. ComfyUI
//! reports workflow validation failures that way.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use t2i2v_core::graph::WorkflowGraph;

use crate::history::{parse_history, HistoryStatus};

/// HTTP client bound to one ComfyUI instance.
pub struct ComfyUIApi {
    http: reqwest::Client,
    base_url: String,
}

/// Body of `POST /prompt`.
#[derive(Serialize)]
struct PromptRequest<'a> {
    prompt: &'a WorkflowGraph,
    client_id: &'a str,
}

/// Body of `POST /queue` removing one pending prompt.
#[derive(Serialize)]
struct QueueDelete<'a> {
    delete: [&'a str; 1],
}

/// Acknowledgement of a queued workflow.
#[derive(Debug, Deserialize)]
pub struct QueuedPrompt {
    pub prompt_id: String,
    /// Queue position at submission time.
    pub number: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// Transport failure: connection refused, DNS, TLS or a bad body.
    #[error("ComfyUI request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("ComfyUI rejected {endpoint} ({status}): {body}")]
    Rejected {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
}

impl ComfyUIApi {
    /// `base_url` is the HTTP root, e.g. `http://127.0.0.1:8188`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Queue `workflow` under `client_id`.
    pub async fn submit_workflow(
        &self,
        workflow: &WorkflowGraph,
        client_id: &str,
    ) -> Result<QueuedPrompt, ComfyUIApiError> {
        let request = self
            .http
            .post(self.url("/prompt"))
            .json(&PromptRequest {
                prompt: workflow,
                client_id,
            });
        Ok(self.send("/prompt", request).await?.json().await?)
    }

    /// Drop `prompt_id` from the pending queue. A running prompt is not
    /// affected; see [`Self::interrupt`].
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let request = self.http.post(self.url("/queue")).json(&QueueDelete {
            delete: [prompt_id],
        });
        self.send("/queue", request).await.map(drop)
    }

    /// Stop whatever prompt the instance is executing right now.
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        let request = self.http.post(self.url("/interrupt"));
        self.send("/interrupt", request).await.map(drop)
    }

    /// Where `prompt_id` stands, from `GET /history/{prompt_id}`.
    pub async fn history(&self, prompt_id: &str) -> Result<HistoryStatus, ComfyUIApiError> {
        let request = self.http.get(self.url(&format!("/history/{prompt_id}")));
        let document: Value = self.send("/history", request).await?.json().await?;
        Ok(parse_history(prompt_id, &document))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(
        &self,
        endpoint: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ComfyUIApiError::Rejected {
            endpoint,
            status: status.as_u16(),
            body,
        })
    }
}

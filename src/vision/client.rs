use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::VisionConfig;

/// Opaque vision model: instruction text plus one image in, free text out.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn complete(&self, system: &str, instruction: &str, image_data_uri: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

fn build_request<'a>(
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    instruction: &'a str,
    image_data_uri: &'a str,
) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![
            ChatMessage {
                role: "system",
                content: MessageContent::Text(system),
            },
            ChatMessage {
                role: "user",
                content: MessageContent::Parts(vec![
                    ContentPart::Text { text: instruction },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: image_data_uri },
                    },
                ]),
            },
        ],
        max_tokens,
    }
}

fn first_content(resp: ChatResponse) -> anyhow::Result<String> {
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .context("model response has no message content")
}

/// OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAiVision {
    http: Client,
    cfg: VisionConfig,
}

impl OpenAiVision {
    pub fn new(cfg: VisionConfig) -> Self {
        Self {
            http: Client::new(),
            cfg,
        }
    }
}

#[async_trait]
impl VisionModel for OpenAiVision {
    async fn complete(&self, system: &str, instruction: &str, image_data_uri: &str) -> anyhow::Result<String> {
        let url = format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'));
        let body = build_request(&self.cfg.model, self.cfg.max_tokens, system, instruction, image_data_uri);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .context("vision request")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(%status, body = %text, "vision model returned an error");
            anyhow::bail!("vision model returned {status}");
        }

        let parsed: ChatResponse = resp.json().await.context("decode vision response")?;
        let content = first_content(parsed)?;
        debug!(model = %self.cfg.model, chars = content.len(), "vision completion received");
        Ok(content)
    }
}

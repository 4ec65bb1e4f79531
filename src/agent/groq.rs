use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;

use super::Agent;
use crate::config::AgentConfig;

/// OpenAI-style chat completion endpoint (Groq by default).
#[derive(Clone)]
pub struct GroqAgent {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: String,
}

impl GroqAgent {
    pub fn new(client: Client, cfg: &AgentConfig) -> Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow!("no agent API key configured (set GROQ_API_KEY)"))?;
        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            api_key,
        })
    }
}

impl Agent for GroqAgent {
    fn complete(&self, prompt: String) -> impl Future<Output = Result<String>> + Send {
        let this = self.clone();
        async move {
            let body = ChatRequest {
                model: &this.model,
                messages: vec![ChatMessage {
                    role: "user",
                    content: &prompt,
                }],
            };
            let resp = this
                .client
                .post(&this.endpoint)
                .bearer_auth(&this.api_key)
                .json(&body)
                .send()
                .await
                .with_context(|| format!("POST {}", this.endpoint))?
                .error_for_status()?;
            let parsed: ChatResponse = resp.json().await.context("decoding chat completion")?;
            parse_answer(parsed)
        }
    }
}

fn parse_answer(resp: ChatResponse) -> Result<String> {
    resp.choices
        .into_iter()
        .next()
        .map(|c| c.message.content.trim().to_string())
        .ok_or_else(|| anyhow!("chat completion returned no choices"))
}

//! OpenAI-compatible chat-completions provider.
use super::{Oracle, OracleRequest};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub struct HttpOracle {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
    key: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl HttpOracle {
    pub fn new(endpoint: String, model: String, key: String, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            endpoint,
            model,
            key,
        }
    }
}

impl Oracle for HttpOracle {
    fn complete(&self, request: &OracleRequest) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if !request.system.trim().is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &request.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.user,
        });
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: 0.0,
        };

        let start = Instant::now();
        let mut response = self
            .agent
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.key))
            .send_json(&body)
            .with_context(|| format!("POST {}", self.endpoint))?;
        let parsed: ChatResponse = response
            .body_mut()
            .read_json()
            .context("parse chat completion response")?;

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis(),
            model = %self.model,
            "chat completion complete"
        );

        parse_reply(parsed)
    }
}

fn parse_reply(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| anyhow!("chat completion returned no content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_choice_content_is_the_reply() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"SCENARIO_COMPLETE"}},
                           {"message":{"role":"assistant","content":"ignored"}}]}"#,
        )
        .expect("parse");
        assert_eq!(parse_reply(response).expect("reply"), "SCENARIO_COMPLETE");
    }

    #[test]
    fn empty_choices_are_an_error() {
        let response: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).expect("parse");
        assert!(parse_reply(response).is_err());
    }
}

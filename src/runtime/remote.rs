//! Streaming client for an external OpenAI-compatible chat endpoint.
//!
//! The endpoint, credentials, and remote model id are process-wide
//! configuration. Streamed deltas are split into an optional reasoning
//! segment (`delta.reasoning_content`) and the final answer
//! (`delta.content`); when a reasoning segment was present the combined
//! result is `"[reasoning]\n<reasoning>\n\n[answer]\n<answer>"`.

use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::runtime::GenerationParams;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Role-tagged message as sent on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct StreamRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    temperature: f32,
    max_tokens: usize,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

/// Accumulates streamed deltas into reasoning and answer segments.
#[derive(Debug, Default)]
pub struct SegmentedReply {
    reasoning: String,
    answer: String,
}

impl SegmentedReply {
    /// Feed one SSE line. Returns `false` once the stream is done.
    pub fn feed_line(&mut self, line: &str) -> Result<bool> {
        let Some(payload) = line.strip_prefix("data:") else {
            return Ok(true);
        };
        let payload = payload.trim();
        if payload.is_empty() {
            return Ok(true);
        }
        if payload == "[DONE]" {
            return Ok(false);
        }
        let chunk: StreamChunk = serde_json::from_str(payload)?;
        if let Some(choice) = chunk.choices.first() {
            if let Some(reasoning) = &choice.delta.reasoning_content {
                self.reasoning.push_str(reasoning);
            }
            if let Some(content) = &choice.delta.content {
                self.answer.push_str(content);
            }
        }
        Ok(true)
    }

    /// Combined return value per the service contract.
    pub fn into_text(self) -> String {
        if self.reasoning.is_empty() {
            self.answer
        } else {
            format!(
                "[reasoning]\n{}\n\n[answer]\n{}",
                self.reasoning, self.answer
            )
        }
    }
}

/// Client for the configured remote chat-completion endpoint.
pub struct RemoteChatClient {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl RemoteChatClient {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// Stream a chat completion and collect it into a single reply.
    /// Blocks the caller for the full duration of the stream.
    pub async fn chat(
        &self,
        messages: &[WireMessage],
        params: &GenerationParams,
    ) -> Result<String> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = StreamRequest {
            model: &self.config.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream: true,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Remote(format!("{status}: {detail}")));
        }

        let mut reply = SegmentedReply::default();
        // Network chunks split at arbitrary byte offsets, including inside
        // a multi-byte UTF-8 sequence. Buffer raw bytes and decode only
        // complete lines; a UTF-8 sequence never contains b'\n'.
        let mut buffer: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);
            while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                if !reply.feed_line(String::from_utf8_lossy(&line).trim_end())? {
                    break 'outer;
                }
            }
        }
        // Trailing line without a newline, if the stream ended abruptly.
        if !buffer.is_empty() {
            let _ = reply.feed_line(String::from_utf8_lossy(&buffer).trim_end())?;
        }

        debug!(model = %self.config.model, "remote stream complete");
        Ok(reply.into_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_line(content: Option<&str>, reasoning: Option<&str>) -> String {
        let delta = serde_json::json!({
            "choices": [{"delta": {
                "content": content,
                "reasoning_content": reasoning,
            }}]
        });
        format!("data: {delta}")
    }

    #[test]
    fn test_answer_only_stream() {
        let mut reply = SegmentedReply::default();
        assert!(reply.feed_line(&delta_line(Some("Hello"), None)).unwrap());
        assert!(reply.feed_line(&delta_line(Some(" world"), None)).unwrap());
        assert!(!reply.feed_line("data: [DONE]").unwrap());
        assert_eq!(reply.into_text(), "Hello world");
    }

    #[test]
    fn test_reasoning_then_answer() {
        let mut reply = SegmentedReply::default();
        reply.feed_line(&delta_line(None, Some("think"))).unwrap();
        reply.feed_line(&delta_line(None, Some("ing..."))).unwrap();
        reply.feed_line(&delta_line(Some("42"), None)).unwrap();
        assert_eq!(
            reply.into_text(),
            "[reasoning]\nthinking...\n\n[answer]\n42"
        );
    }

    #[test]
    fn test_non_data_lines_ignored() {
        let mut reply = SegmentedReply::default();
        assert!(reply.feed_line("").unwrap());
        assert!(reply.feed_line(": keep-alive").unwrap());
        assert!(reply.feed_line("event: ping").unwrap());
        assert_eq!(reply.into_text(), "");
    }

    #[test]
    fn test_malformed_chunk_is_an_error() {
        let mut reply = SegmentedReply::default();
        assert!(reply.feed_line("data: {not json").is_err());
    }

    #[tokio::test]
    async fn test_multibyte_content_split_across_chunks() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await.unwrap();

            let body = concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"\u{4f60}\u{597d}\"}}]}\n",
                "\n",
                "data: [DONE]\n",
            )
            .as_bytes();
            // Split inside the three-byte encoding of the first character.
            let split = body.iter().position(|&b| b >= 0x80).unwrap() + 1;

            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\n\
                      content-type: text/event-stream\r\n\
                      connection: close\r\n\r\n",
                )
                .await
                .unwrap();
            socket.write_all(&body[..split]).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            socket.write_all(&body[split..]).await.unwrap();
            socket.flush().await.unwrap();
        });

        let config = RemoteConfig {
            enabled: true,
            base_url: format!("http://{addr}"),
            ..RemoteConfig::default()
        };
        let client = RemoteChatClient::new(config).unwrap();
        let messages = [WireMessage {
            role: "user".to_string(),
            content: "greet me".to_string(),
        }];
        let reply = client
            .chat(&messages, &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(reply, "\u{4f60}\u{597d}");
        server.await.unwrap();
    }
}

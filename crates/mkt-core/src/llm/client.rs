//! Groq chat-completion client
//!
//! Talks to the OpenAI-compatible `/chat/completions` endpoint with a bearer
//! token. Both plain and streamed responses are reduced to a single string.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use crate::config::{Config, PromptMode};
use crate::error::{Error, Result};
use crate::prompt::{build_messages, PromptTemplate};

use super::types::*;

/// Produces one reply for a question asked against a conversation history
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Ask `question`, given the system instruction and prior turns (oldest first)
    async fn complete(&self, system: &str, history: &[Turn], question: &str) -> Result<String>;

    /// Model identifier, for logging
    fn model(&self) -> &str;
}

/// Groq (OpenAI-compatible) API client
#[derive(Clone)]
pub struct GroqClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    prompt_mode: PromptMode,
    template: PromptTemplate,
}

impl GroqClient {
    /// Create a new client. Fails when no API key is configured.
    pub fn new(config: &Config) -> Result<Self> {
        let llm = &config.llm;
        if llm.api_key.trim().is_empty() {
            return Err(Error::Config("GROQ_API_KEY (or API_KEY) not set".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(llm.timeout_secs))
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            client,
            api_key: llm.api_key.clone(),
            model: llm.model.clone(),
            base_url: llm.base_url.trim_end_matches('/').to_string(),
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
            stream: llm.stream,
            prompt_mode: llm.prompt_mode,
            template: PromptTemplate::new(llm.template.clone()),
        })
    }

    /// Create with custom base URL (for testing or custom endpoints)
    pub fn with_base_url(config: &Config, base_url: impl Into<String>) -> Result<Self> {
        let mut client = Self::new(config)?;
        client.base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(client)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Send a prepared message list and return the reply text
    pub async fn send(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: self.stream,
        };

        let url = self.endpoint();
        debug!(
            "Sending request to {} (model={}, messages={}, stream={})",
            url,
            request.model,
            request.messages.len(),
            request.stream
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Llm(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Groq API error: {} - {}", status, body);
            return Err(Error::Llm(format!("{}: {}", status, body)));
        }

        if self.stream {
            self.read_stream(response).await
        } else {
            self.read_body(response).await
        }
    }

    async fn read_body(&self, response: reqwest::Response) -> Result<String> {
        let body = response
            .text()
            .await
            .map_err(|e| Error::Llm(format!("failed to read response: {}", e)))?;

        let parsed: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Llm(format!("Failed to parse response: {} - {}", e, body)))?;

        let text = parsed
            .first_content()
            .ok_or_else(|| Error::Llm("response contained no message content".to_string()))?
            .to_string();

        info!(
            "Groq API response: finish_reason={:?}, tokens={}",
            parsed.choices.first().and_then(|c| c.finish_reason.clone()),
            parsed.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0)
        );

        Ok(text)
    }

    /// Join the `delta.content` fragments of an SSE response.
    ///
    /// The stream only counts as complete once `[DONE]` or a `finish_reason`
    /// arrives; a truncated stream is an error, never a partial reply.
    async fn read_stream(&self, response: reqwest::Response) -> Result<String> {
        let byte_stream = response
            .bytes_stream()
            .map(|result| result.map_err(std::io::Error::other));
        let reader = tokio::io::BufReader::new(StreamReader::new(byte_stream));
        let mut lines = reader.lines();

        let mut text = String::new();
        let mut chunks = 0usize;
        let mut finished = false;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| Error::Llm(format!("stream interrupted: {}", e)))?
        {
            let Some(data) = line.strip_prefix("data:") else {
                // event:, id:, comments and blank separators
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                finished = true;
                break;
            }
            if data.is_empty() {
                continue;
            }

            let chunk: ChatCompletionChunk = serde_json::from_str(data)
                .map_err(|e| Error::Llm(format!("Failed to parse stream chunk: {} - {}", e, data)))?;
            if let Some(error) = chunk.error_message() {
                warn!("Groq API stream error: {}", error);
                return Err(Error::Llm(format!("stream error: {}", error)));
            }
            chunks += 1;

            if let Some(choice) = chunk.choices.first() {
                if let Some(content) = choice.delta.content.as_deref() {
                    text.push_str(content);
                }
                if choice.finish_reason.is_some() {
                    finished = true;
                }
            }
        }

        if chunks == 0 {
            return Err(Error::Llm("stream ended without any data".to_string()));
        }
        if !finished {
            warn!("Groq API stream truncated after {} chunks", chunks);
            return Err(Error::Llm("stream ended before [DONE]".to_string()));
        }
        if text.is_empty() {
            return Err(Error::Llm("stream contained no message content".to_string()));
        }

        info!("Groq API stream complete: {} chunks, {} chars", chunks, text.len());
        Ok(text)
    }

    /// Get the model name
    pub fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatModel for GroqClient {
    async fn complete(&self, system: &str, history: &[Turn], question: &str) -> Result<String> {
        let messages = build_messages(self.prompt_mode, &self.template, system, history, question);
        self.send(messages).await
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::prompt::SYSTEM_PROMPT;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> Config {
        Config {
            llm: LlmConfig {
                api_key: "test-key".to_string(),
                base_url: base_url.to_string(),
                ..LlmConfig::default()
            },
            ..Config::default()
        }
    }

    fn completion(text: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "created": 1,
            "model": "llama-3.3-70b-versatile",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": text},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
        })
    }

    #[test]
    fn test_new_requires_api_key() {
        let config = Config::default();
        assert!(matches!(GroqClient::new(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = GroqClient::new(&test_config("https://api.groq.com/openai/v1/")).unwrap();
        assert_eq!(client.endpoint(), "https://api.groq.com/openai/v1/chat/completions");
        assert_eq!(client.model_name(), "llama-3.3-70b-versatile");
    }

    #[tokio::test]
    async fn test_complete_sends_bearer_and_parses_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "llama-3.3-70b-versatile",
                "max_tokens": 500
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Use email campaigns.")))
            .expect(1)
            .mount(&server)
            .await;

        let client = GroqClient::new(&test_config(&server.uri())).unwrap();
        let reply = client
            .complete(SYSTEM_PROMPT, &[Turn::assistant("Hello")], "How do I grow?")
            .await
            .unwrap();

        assert_eq!(reply, "Use email campaigns.");
    }

    #[tokio::test]
    async fn test_template_mode_sends_single_user_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .mount(&server)
            .await;

        let client = GroqClient::new(&test_config(&server.uri())).unwrap();
        client
            .complete(SYSTEM_PROMPT, &[Turn::user("first")], "second")
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        let content = messages[0]["content"].as_str().unwrap();
        assert!(content.contains("User: first"));
        assert!(content.contains("User question: second"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_llm_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let client = GroqClient::new(&test_config(&server.uri())).unwrap();
        let err = client.complete(SYSTEM_PROMPT, &[], "hi").await.unwrap_err();

        match err {
            Error::Llm(message) => {
                assert!(message.contains("401"));
                assert!(message.contains("invalid api key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_choices_is_llm_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let client = GroqClient::new(&test_config(&server.uri())).unwrap();
        let err = client.complete(SYSTEM_PROMPT, &[], "hi").await.unwrap_err();
        assert!(matches!(err, Error::Llm(_)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_llm_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&server)
            .await;

        let client = GroqClient::new(&test_config(&server.uri())).unwrap();
        let err = client.complete(SYSTEM_PROMPT, &[], "hi").await.unwrap_err();
        assert!(err.to_string().starts_with("LLM error: Failed to parse response"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_llm_error() {
        // Nothing listens on port 9 in the test environment
        let client = GroqClient::new(&test_config("http://127.0.0.1:9")).unwrap();
        let err = client.complete(SYSTEM_PROMPT, &[], "hi").await.unwrap_err();
        assert!(err.is_upstream());
    }

    #[tokio::test]
    async fn test_streamed_response_is_joined() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Run \"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"a giveaway.\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&server)
            .await;

        let mut config = test_config(&server.uri());
        config.llm.stream = true;
        let client = GroqClient::new(&config).unwrap();

        let reply = client.complete(SYSTEM_PROMPT, &[], "Ideas?").await.unwrap();
        assert_eq!(reply, "Run a giveaway.");
    }

    #[tokio::test]
    async fn test_empty_stream_is_llm_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(": keep-alive\n\n"),
            )
            .mount(&server)
            .await;

        let mut config = test_config(&server.uri());
        config.llm.stream = true;
        let client = GroqClient::new(&config).unwrap();

        let err = client.complete(SYSTEM_PROMPT, &[], "Ideas?").await.unwrap_err();
        assert!(matches!(err, Error::Llm(_)));
    }

    async fn stream_client(server: &MockServer, sse: &'static str) -> GroqClient {
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(server)
            .await;

        let mut config = test_config(&server.uri());
        config.llm.stream = true;
        GroqClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_truncated_stream_is_llm_error() {
        let server = MockServer::start().await;
        let client = stream_client(
            &server,
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Half a sen\"}}]}\n\n",
        )
        .await;

        let err = client.complete(SYSTEM_PROMPT, &[], "Ideas?").await.unwrap_err();
        assert_eq!(err.to_string(), "LLM error: stream ended before [DONE]");
    }

    #[tokio::test]
    async fn test_finish_reason_without_done_completes() {
        let server = MockServer::start().await;
        let client = stream_client(
            &server,
            concat!(
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Post daily.\"}}]}\n\n",
                "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            ),
        )
        .await;

        let reply = client.complete(SYSTEM_PROMPT, &[], "Ideas?").await.unwrap();
        assert_eq!(reply, "Post daily.");
    }

    #[tokio::test]
    async fn test_stream_error_payload_is_llm_error() {
        let server = MockServer::start().await;
        let client = stream_client(
            &server,
            "data: {\"error\":{\"message\":\"rate limit exceeded\",\"type\":\"rate_limit\"}}\n\ndata: [DONE]\n\n",
        )
        .await;

        let err = client.complete(SYSTEM_PROMPT, &[], "Ideas?").await.unwrap_err();
        assert_eq!(err.to_string(), "LLM error: stream error: rate limit exceeded");
    }

    #[tokio::test]
    async fn test_stream_without_content_is_llm_error() {
        let server = MockServer::start().await;
        let client = stream_client(
            &server,
            concat!(
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                "data: [DONE]\n\n",
            ),
        )
        .await;

        let err = client.complete(SYSTEM_PROMPT, &[], "Ideas?").await.unwrap_err();
        assert_eq!(err.to_string(), "LLM error: stream contained no message content");
    }
}

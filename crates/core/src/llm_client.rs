use crate::error::GenerationError;
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;
use std::time::Duration;

/// Author of a message sent to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single message in a provider request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Optional sampling knobs. `None` leaves the provider default in place.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// A generic client for a chat-completion provider.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Makes a single, non-streaming completion call and returns the text of
    /// the first choice.
    async fn complete(
        &self,
        turns: Vec<ChatTurn>,
        params: GenerationParams,
    ) -> Result<String, GenerationError>;
}

/// An implementation of `LLMClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - API key and base URL; requests go to `{base}/chat/completions`.
    /// * `model` - The model identifier to use (e.g., "glm-4").
    /// * `timeout` - Upper bound for one completion call, retries included.
    pub fn new(
        config: OpenAIConfig,
        model: String,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client: Client::with_config(config).with_http_client(http),
            model,
            timeout,
        })
    }
}

fn to_request_message(turn: ChatTurn) -> Result<ChatCompletionRequestMessage, GenerationError> {
    let message: ChatCompletionRequestMessage = match turn.role {
        ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(turn.content)
            .build()?
            .into(),
        ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
            .content(turn.content)
            .build()?
            .into(),
        ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(turn.content)
            .build()?
            .into(),
    };
    Ok(message)
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn complete(
        &self,
        turns: Vec<ChatTurn>,
        params: GenerationParams,
    ) -> Result<String, GenerationError> {
        let messages = turns
            .into_iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(messages);
        if let Some(temperature) = params.temperature {
            args.temperature(temperature);
        }
        if let Some(max_tokens) = params.max_tokens {
            #[allow(deprecated)]
            args.max_tokens(max_tokens);
        }
        let request = args.build()?;

        let response: CreateChatCompletionResponse =
            tokio::time::timeout(self.timeout, self.client.chat().create(request))
                .await
                .map_err(|_| GenerationError::Timeout(self.timeout))??;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(GenerationError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::completion_body;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OpenAICompatibleClient {
        let config = OpenAIConfig::new()
            .with_api_key("test-key")
            .with_api_base(server.uri());
        OpenAICompatibleClient::new(config, "glm-4".to_string(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_complete_posts_bearer_request_and_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "glm-4",
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("hi there")))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client_for(&server)
            .complete(vec![ChatTurn::user("hello")], GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(reply, "hi there");
    }

    #[tokio::test]
    async fn test_complete_sends_sampling_params() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"temperature": 0.5, "max_tokens": 150})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let params = GenerationParams {
            temperature: Some(0.5),
            max_tokens: Some(150),
        };
        let reply = client_for(&server)
            .complete(vec![ChatTurn::user("hello")], params)
            .await
            .unwrap();
        assert_eq!(reply, "ok");
    }

    #[tokio::test]
    async fn test_complete_fails_on_empty_choices() {
        let server = MockServer::start().await;
        let mut body = completion_body("unused");
        body["choices"] = json!([]);
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(vec![ChatTurn::user("hello")], GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_complete_fails_on_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {
                    "message": "invalid api key",
                    "type": "invalid_request_error",
                    "param": null,
                    "code": null
                }
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(vec![ChatTurn::user("hello")], GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Provider(_)));
    }
}

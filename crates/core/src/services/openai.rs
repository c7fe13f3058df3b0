use super::{status_error, transport_error};
use crate::error::ServiceError;
use crate::prompt::{Message, Prompt};
use crate::traits::{Embedder, LanguageModel};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const EMBEDDING_SERVICE: &str = "embedding service";
const CHAT_SERVICE: &str = "language model";

/// Base URL and credentials of an OpenAI-compatible API (OpenAI, Ollama, vLLM, ...).
#[derive(Debug, Clone)]
pub struct OpenAiEndpoint {
    base_url: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl OpenAiEndpoint {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, url::ParseError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        Ok(Self {
            base_url,
            api_key,
            timeout,
        })
    }

    pub fn url(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path)
    }

    fn client(&self, service: &str) -> Result<Client, ServiceError> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|error| ServiceError::Unavailable {
                service: service.to_string(),
                details: error.to_string(),
            })
    }

    async fn post<Req, Resp>(&self, client: &Client, service: &str, path: &str, body: &Req) -> Result<Resp, ServiceError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = self.url(path).map_err(|error| ServiceError::InvalidResponse {
            service: service.to_string(),
            details: error.to_string(),
        })?;

        let mut request = client.post(url).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|error| transport_error(service, error, self.timeout))?;

        if !response.status().is_success() {
            return Err(status_error(service, response.status(), response.headers()));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|error| transport_error(service, error, self.timeout))
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    endpoint: OpenAiEndpoint,
    client: Client,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(endpoint: OpenAiEndpoint, model: impl Into<String>, dimensions: usize) -> Result<Self, ServiceError> {
        Ok(Self {
            client: endpoint.client(EMBEDDING_SERVICE)?,
            endpoint,
            model: model.into(),
            dimensions,
        })
    }
}

fn ordered_embeddings(response: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>, ServiceError> {
    let mut rows = response.data;
    if rows.len() != expected {
        return Err(ServiceError::InvalidResponse {
            service: EMBEDDING_SERVICE.to_string(),
            details: format!("{} embeddings for {expected} inputs", rows.len()),
        });
    }
    rows.sort_by_key(|row| row.index);
    Ok(rows.into_iter().map(|row| row.embedding).collect())
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| ServiceError::InvalidResponse {
            service: EMBEDDING_SERVICE.to_string(),
            details: "empty embedding response".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let response: EmbeddingResponse = self
            .endpoint
            .post(&self.client, EMBEDDING_SERVICE, "embeddings", &request)
            .await?;

        ordered_embeddings(response, texts.len())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiChatModel {
    endpoint: OpenAiEndpoint,
    client: Client,
    model: String,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(endpoint: OpenAiEndpoint, model: impl Into<String>) -> Result<Self, ServiceError> {
        Ok(Self {
            client: endpoint.client(CHAT_SERVICE)?,
            endpoint,
            model: model.into(),
            temperature: 0.0,
        })
    }
}

fn first_completion(response: ChatResponse) -> Result<String, ServiceError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ServiceError::InvalidResponse {
            service: CHAT_SERVICE.to_string(),
            details: "response has no message content".to_string(),
        })
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, ServiceError> {
        let request = ChatRequest {
            model: &self.model,
            messages: prompt.messages(),
            temperature: self.temperature,
        };
        let response: ChatResponse = self
            .endpoint
            .post(&self.client, CHAT_SERVICE, "chat/completions", &request)
            .await?;

        first_completion(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_paths_join_under_the_base() -> Result<(), url::ParseError> {
        let endpoint = OpenAiEndpoint::new("http://localhost:11434/v1", None, Duration::from_secs(5))?;
        assert_eq!(
            endpoint.url("chat/completions")?.as_str(),
            "http://localhost:11434/v1/chat/completions"
        );

        let endpoint = OpenAiEndpoint::new("https://api.openai.com/v1/", Some("  ".to_string()), Duration::from_secs(5))?;
        assert_eq!(endpoint.url("embeddings")?.as_str(), "https://api.openai.com/v1/embeddings");
        assert!(endpoint.api_key.is_none());
        Ok(())
    }

    #[test]
    fn embeddings_are_reordered_by_index() -> Result<(), Box<dyn std::error::Error>> {
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"data": [{"index": 1, "embedding": [0.0, 1.0]}, {"index": 0, "embedding": [1.0, 0.0]}]}"#,
        )?;
        let vectors = ordered_embeddings(response, 2)?;
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        Ok(())
    }

    #[test]
    fn short_embedding_response_is_invalid() -> Result<(), Box<dyn std::error::Error>> {
        let response: EmbeddingResponse =
            serde_json::from_str(r#"{"data": [{"index": 0, "embedding": [1.0]}]}"#)?;
        assert!(matches!(
            ordered_embeddings(response, 3),
            Err(ServiceError::InvalidResponse { .. })
        ));
        Ok(())
    }

    #[test]
    fn completion_takes_first_choice() -> Result<(), Box<dyn std::error::Error>> {
        let response: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "Annual leave is 20 days."}}]}"#,
        )?;
        assert_eq!(first_completion(response)?, "Annual leave is 20 days.");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices": []}"#)?;
        assert!(first_completion(empty).is_err());
        Ok(())
    }

    #[test]
    fn chat_request_serializes_typed_messages() -> Result<(), serde_json::Error> {
        let prompt = Prompt::new()
            .with(Message::system("rules"))
            .with(Message::user("question"));
        let request = ChatRequest {
            model: "llama3.1",
            messages: prompt.messages(),
            temperature: 0.0,
        };
        let value = serde_json::to_value(&request)?;
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "question");
        Ok(())
    }
}

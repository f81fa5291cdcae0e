//! Blocking client for OpenAI-compatible chat-completions and embeddings
//! endpoints.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use mindmap_core::{Embedder, Generator, MindmapError, MindmapResult};

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Endpoint {
    /// Read the API key from `api_key_env`. A missing or empty variable means
    /// no `Authorization` header, which local servers accept.
    pub fn from_env(base_url: &str, model: &str, api_key_env: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: std::env::var(api_key_env).ok().filter(|k| !k.trim().is_empty()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

pub struct OpenAiClient {
    agent: ureq::Agent,
    chat: Endpoint,
    embeddings: Endpoint,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(chat: Endpoint, embeddings: Endpoint, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            agent,
            chat,
            embeddings,
            temperature: 0.7,
            max_tokens: 1024,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn post(&self, endpoint: &Endpoint, path: &str, body: Value) -> Result<Value, String> {
        let mut request = self
            .agent
            .post(&endpoint.url(path))
            .set("content-type", "application/json");
        if let Some(key) = &endpoint.api_key {
            request = request.set("authorization", &format!("Bearer {key}"));
        }

        match request.send_json(body) {
            Ok(resp) => resp
                .into_json::<Value>()
                .map_err(|e| format!("invalid response body: {e}")),
            Err(ureq::Error::Status(code, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                Err(format!("HTTP {code}: {}", truncate(&text, 300)))
            }
            Err(ureq::Error::Transport(e)) => Err(format!("request failed: {e}")),
        }
    }
}

impl Generator for OpenAiClient {
    fn generate(&self, prompt: &str, structured: bool) -> MindmapResult<String> {
        let body = chat_request(
            &self.chat.model,
            prompt,
            structured,
            self.temperature,
            self.max_tokens,
        );
        debug!(model = %self.chat.model, structured, "chat completion request");
        let reply = self
            .post(&self.chat, "chat/completions", body)
            .map_err(MindmapError::Generation)?;
        parse_chat_reply(&reply).map_err(MindmapError::Generation)
    }
}

impl Embedder for OpenAiClient {
    fn embed(&self, text: &str) -> MindmapResult<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| MindmapError::Embedding("empty embedding result".into()))
    }

    fn embed_batch(&self, texts: &[&str]) -> MindmapResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({ "model": self.embeddings.model, "input": texts });
        let reply = self
            .post(&self.embeddings, "embeddings", body)
            .map_err(MindmapError::Embedding)?;
        let vectors = parse_embeddings_reply(&reply).map_err(MindmapError::Embedding)?;
        if vectors.len() != texts.len() {
            return Err(MindmapError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    /// Depends on the remote model; not known up front.
    fn dimensions(&self) -> usize {
        0
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

fn chat_request(model: &str, prompt: &str, structured: bool, temperature: f32, max_tokens: u32) -> Value {
    let mut body = json!({
        "model": model,
        "messages": [{ "role": "user", "content": prompt }],
        "temperature": temperature,
        "max_tokens": max_tokens,
    });
    if structured {
        body["response_format"] = json!({ "type": "json_object" });
    }
    body
}

fn parse_chat_reply(reply: &Value) -> Result<String, String> {
    if let Some(err) = reply.get("error") {
        let msg = err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(format!("API error: {msg}"));
    }
    reply
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| "response has no choices[0].message.content".to_string())
}

/// Vectors ordered by their `index` field when present.
fn parse_embeddings_reply(reply: &Value) -> Result<Vec<Vec<f32>>, String> {
    let data = reply
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| "response has no data array".to_string())?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .unwrap_or(pos);
        let vector = item
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| format!("data[{pos}] has no embedding"))?
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| format!("data[{pos}] embedding has non-numeric values"))?;
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_shape() {
        let plain = chat_request("deepseek-chat", "hi", false, 0.5, 100);
        assert_eq!(plain["model"], "deepseek-chat");
        assert_eq!(plain["messages"][0]["content"], "hi");
        assert!(plain.get("response_format").is_none());

        let structured = chat_request("deepseek-chat", "hi", true, 0.5, 100);
        assert_eq!(structured["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_parse_chat_reply() {
        let reply = json!({"choices": [{"message": {"role": "assistant", "content": "  hello \n"}}]});
        assert_eq!(parse_chat_reply(&reply).unwrap(), "hello");

        let err = json!({"error": {"message": "invalid key"}});
        assert!(parse_chat_reply(&err).unwrap_err().contains("invalid key"));
        assert!(parse_chat_reply(&json!({"choices": []})).is_err());
    }

    #[test]
    fn test_parse_embeddings_reply_orders_by_index() {
        let reply = json!({"data": [
            {"index": 1, "embedding": [0.0, 1.0]},
            {"index": 0, "embedding": [1.0, 0.0]}
        ]});
        let vectors = parse_embeddings_reply(&reply).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_embeddings_reply_rejects_bad_shape() {
        assert!(parse_embeddings_reply(&json!({})).is_err());
        assert!(parse_embeddings_reply(&json!({"data": [{"embedding": ["x"]}]})).is_err());
    }

    #[test]
    fn test_endpoint_trims_slash_and_missing_key() {
        let ep = Endpoint::from_env("http://localhost:8080/v1/", "m", "MINDMAP_TEST_UNSET_KEY_VAR");
        assert_eq!(ep.url("embeddings"), "http://localhost:8080/v1/embeddings");
        assert!(ep.api_key.is_none());
    }

    #[test]
    fn test_unreachable_server_maps_to_generation_error() {
        let ep = Endpoint::from_env("http://127.0.0.1:9", "m", "MINDMAP_TEST_UNSET_KEY_VAR");
        let client = OpenAiClient::new(ep.clone(), ep, Duration::from_millis(200));
        assert!(matches!(
            client.generate("hi", false),
            Err(MindmapError::Generation(_))
        ));
        assert!(matches!(client.embed("hi"), Err(MindmapError::Embedding(_))));
    }
}

use std::str::FromStr;

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Supported AI summarization providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    DeepSeek,
}

impl Provider {
    pub fn name(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::DeepSeek => "deepseek",
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "deepseek" => Ok(Provider::DeepSeek),
            other => Err(format!("Unsupported AI provider: {other}")),
        }
    }
}

/// Provider selection handed over by the client. Opaque input: consulted per
/// call, never persisted. The key arrives either in plaintext or sealed for
/// an external unseal capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_key: Option<String>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<Value>,
}

/// Endpoint URLs per provider, overridable for tests.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub openai: String,
    pub anthropic: String,
    pub deepseek: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            openai: "https://api.openai.com/v1/chat/completions".to_string(),
            anthropic: "https://api.anthropic.com/v1/messages".to_string(),
            deepseek: "https://api.deepseek.com/v1/chat/completions".to_string(),
        }
    }
}

impl ProviderEndpoints {
    pub fn url_for(&self, provider: Provider) -> &str {
        match provider {
            Provider::OpenAi => &self.openai,
            Provider::Anthropic => &self.anthropic,
            Provider::DeepSeek => &self.deepseek,
        }
    }
}

const MAX_SUMMARY_TOKENS: u32 = 500;

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

/// OpenAI-compatible chat completion body; DeepSeek uses the same schema.
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
}

/// Anthropic messages API body.
#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

pub fn build_prompt(url: &str) -> String {
    format!(
        "Please provide a concise summary of this news article: {url}. \
         Focus on the key facts, main points, and important context."
    )
}

/// Builds the provider-specific request: endpoint, auth header shape, and
/// body schema differ per provider.
pub fn build_request(
    client: &Client,
    endpoints: &ProviderEndpoints,
    provider: Provider,
    api_key: &str,
    model: &str,
    prompt: &str,
) -> RequestBuilder {
    let user_message = Message {
        role: "user".to_string(),
        content: prompt.to_string(),
    };
    let url = endpoints.url_for(provider);
    match provider {
        Provider::OpenAi => client.post(url).bearer_auth(api_key).json(&ChatRequest {
            model: model.to_string(),
            messages: vec![user_message],
            max_tokens: MAX_SUMMARY_TOKENS,
        }),
        Provider::Anthropic => client
            .post(url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&MessagesRequest {
                model: model.to_string(),
                max_tokens: MAX_SUMMARY_TOKENS,
                messages: vec![user_message],
            }),
        // DeepSeek's chat variant pins its own model name.
        Provider::DeepSeek => client.post(url).bearer_auth(api_key).json(&ChatRequest {
            model: "deepseek-chat".to_string(),
            messages: vec![user_message],
            max_tokens: MAX_SUMMARY_TOKENS,
        }),
    }
}

/// Pulls the summary text out of the provider-specific response shape.
/// Returns None when the expected shape is absent.
pub fn extract_summary(provider: Provider, body: &Value) -> Option<String> {
    let text = match provider {
        Provider::OpenAi | Provider::DeepSeek => {
            body["choices"][0]["message"]["content"].as_str()?
        }
        Provider::Anthropic => body["content"][0]["text"].as_str()?,
    };
    Some(text.to_string())
}

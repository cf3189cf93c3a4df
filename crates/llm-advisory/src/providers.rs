//! HTTP clients for the three chat-completion backends the advisory layer
//! can talk to. Each speaks its own wire format but all resolve to plain
//! reply text, which [`crate::parse`] then interprets uniformly.

use configuration::LlmConfig;
use serde::Deserialize;
use serde_json::json;

use crate::error::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Gemini,
}

impl LlmProvider {
    /// Picks a provider from a bot's configured `model_hint` (e.g.
    /// `"claude-3-opus"`, `"gemini-1.5-pro"`), defaulting to OpenAI the way
    /// the donor bot's `llm_model` config field defaults to `"openai"`.
    pub fn from_model_hint(model_hint: Option<&str>) -> Self {
        match model_hint.map(str::to_lowercase) {
            Some(hint) if hint.contains("claude") || hint.contains("anthropic") => Self::Anthropic,
            Some(hint) if hint.contains("gemini") => Self::Gemini,
            _ => Self::OpenAi,
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o",
            Self::Anthropic => "claude-3-5-sonnet-20241022",
            Self::Gemini => "gemini-1.5-pro",
        }
    }

    fn api_key<'a>(self, config: &'a LlmConfig) -> Option<&'a str> {
        match self {
            Self::OpenAi => config.openai_api_key.as_deref(),
            Self::Anthropic => config.anthropic_api_key.as_deref(),
            Self::Gemini => config.gemini_api_key.as_deref(),
        }
    }

    pub(crate) async fn complete(
        self,
        client: &reqwest::Client,
        config: &LlmConfig,
        model_hint: Option<&str>,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, LlmError> {
        let api_key = self.api_key(config).ok_or(LlmError::NoProviderConfigured)?;
        let model = model_hint.unwrap_or_else(|| self.default_model());

        match self {
            Self::OpenAi => self.complete_openai(client, api_key, model, system_prompt, user_prompt).await,
            Self::Anthropic => self.complete_anthropic(client, api_key, model, system_prompt, user_prompt).await,
            Self::Gemini => self.complete_gemini(client, api_key, model, system_prompt, user_prompt).await,
        }
    }

    async fn complete_openai(
        self,
        client: &reqwest::Client,
        api_key: &str,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, LlmError> {
        #[derive(Deserialize)]
        struct Response {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct Message {
            content: String,
        }

        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": 0.2,
        });

        let response = client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::ProviderError(format!("openai: {text}")));
        }

        let parsed: Response = response.json().await?;
        Ok(parsed.choices.into_iter().next().map(|c| c.message.content).unwrap_or_default())
    }

    async fn complete_anthropic(
        self,
        client: &reqwest::Client,
        api_key: &str,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, LlmError> {
        #[derive(Deserialize)]
        struct Response {
            content: Vec<Block>,
        }
        #[derive(Deserialize)]
        struct Block {
            text: String,
        }

        let body = json!({
            "model": model,
            "max_tokens": 1024,
            "system": system_prompt,
            "messages": [
                {"role": "user", "content": user_prompt},
            ],
        });

        let response = client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::ProviderError(format!("anthropic: {text}")));
        }

        let parsed: Response = response.json().await?;
        Ok(parsed.content.into_iter().next().map(|b| b.text).unwrap_or_default())
    }

    async fn complete_gemini(
        self,
        client: &reqwest::Client,
        api_key: &str,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, LlmError> {
        #[derive(Deserialize)]
        struct Response {
            candidates: Vec<Candidate>,
        }
        #[derive(Deserialize)]
        struct Candidate {
            content: Content,
        }
        #[derive(Deserialize)]
        struct Content {
            parts: Vec<Part>,
        }
        #[derive(Deserialize)]
        struct Part {
            text: String,
        }

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent?key={api_key}"
        );
        let body = json!({
            "contents": [
                {"role": "user", "parts": [{"text": format!("{system_prompt}\n\n{user_prompt}")}]},
            ],
        });

        let response = client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::ProviderError(format!("gemini: {text}")));
        }

        let parsed: Response = response.json().await?;
        Ok(parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_hint_selects_anthropic_for_claude_models() {
        assert_eq!(LlmProvider::from_model_hint(Some("claude-3-opus")), LlmProvider::Anthropic);
    }

    #[test]
    fn model_hint_selects_gemini() {
        assert_eq!(LlmProvider::from_model_hint(Some("gemini-1.5-pro")), LlmProvider::Gemini);
    }

    #[test]
    fn missing_hint_defaults_to_openai() {
        assert_eq!(LlmProvider::from_model_hint(None), LlmProvider::OpenAi);
    }
}

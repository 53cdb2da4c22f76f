//! Ollama `/api/generate` adapter.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{extract_code_block, render_prompt, GenerationRequest, TestGenerator};
use crate::core::config::GeneratorConfig;
use crate::core::errors::{CovforgeError, Result};

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Test generator backed by a local Ollama server
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    config: GeneratorConfig,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CovforgeError::generator(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

#[async_trait]
impl TestGenerator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        if !self.config.enabled {
            return Err(CovforgeError::generator("generator disabled by configuration"));
        }

        let prompt = render_prompt(request);
        debug!(
            model = %self.config.model,
            function = %request.function.qualified_name(),
            prompt_bytes = prompt.len(),
            "requesting tests"
        );

        let body = OllamaRequest {
            model: &self.config.model,
            prompt: &prompt,
            stream: false,
        };
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CovforgeError::generator_status(
                format!("Ollama API error: {error_text}"),
                status.as_u16(),
            ));
        }

        let text = response.text().await?;
        let generated = parse_response(&text)?;
        info!(
            function = %request.function.qualified_name(),
            bytes = generated.len(),
            "generator answered"
        );
        Ok(extract_code_block(&generated))
    }
}

/// Concatenate the `response` fields of a single JSON object or of a JSON-lines stream
pub fn parse_response(body: &str) -> Result<String> {
    if let Ok(chunk) = serde_json::from_str::<OllamaChunk>(body.trim()) {
        return Ok(chunk.response);
    }

    let mut text = String::new();
    let mut parsed_any = false;
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let chunk: OllamaChunk = serde_json::from_str(line).map_err(|e| {
            CovforgeError::generator(format!("malformed generator response line: {e}"))
        })?;
        parsed_any = true;
        text.push_str(&chunk.response);
        if chunk.done {
            break;
        }
    }

    if !parsed_any {
        return Err(CovforgeError::generator("empty generator response"));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::common::fixtures::function;

    #[test]
    fn single_object_response() {
        let body = r#"{"model":"codellama","response":"```cpp\nTEST(A, B) {}\n```","done":true}"#;
        assert_eq!(parse_response(body).unwrap(), "```cpp\nTEST(A, B) {}\n```");
    }

    #[test]
    fn streamed_lines_are_concatenated() {
        let body = concat!(
            "{\"response\":\"TEST(\",\"done\":false}\n",
            "{\"response\":\"A, B) {}\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true}\n",
        );
        assert_eq!(parse_response(body).unwrap(), "TEST(A, B) {}");
    }

    #[test]
    fn garbage_is_a_generator_error() {
        assert!(matches!(
            parse_response("<html>bad gateway</html>"),
            Err(CovforgeError::Generator { .. })
        ));
        assert!(parse_response("   ").is_err());
    }

    #[tokio::test]
    async fn disabled_generator_refuses() {
        let generator = OllamaGenerator::new(GeneratorConfig {
            enabled: false,
            ..GeneratorConfig::default()
        })
        .unwrap();
        let request = GenerationRequest {
            target_type: "Program".to_string(),
            header_include: None,
            function: function("run", Some("Program"), 1, 3),
            strategy: None,
            gaps: Vec::new(),
            prefer_simple: false,
            mocked_types: Vec::new(),
            source_text: String::new(),
            header_text: None,
        };
        assert!(matches!(
            generator.generate(&request).await,
            Err(CovforgeError::Generator { status: None, .. })
        ));
    }
}

//! External test generation.
//!
//! The loop asks a [`TestGenerator`] for gtest source aimed at a function and a
//! handful of gaps. Generators may fail or return junk; both come back as
//! errors here and the loop treats them as "no new tests this iteration".

pub mod ollama;

pub use ollama::OllamaGenerator;

use std::collections::VecDeque;
use std::fmt::Write as _;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{CovforgeError, Result};
use crate::detectors::gaps::{GapItem, Strategy};
use crate::lang::common::Function;

/// What the generator is asked to cover
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Type implemented by the unit, e.g. `Program`
    pub target_type: String,
    /// Include spelling of the target header, when there is one
    pub header_include: Option<String>,
    pub function: Function,
    /// `None` for baseline tests
    pub strategy: Option<Strategy>,
    pub gaps: Vec<GapItem>,
    /// Earlier attempts failed to compile against the isolated build
    pub prefer_simple: bool,
    /// Dependency types replaced by mocks
    pub mocked_types: Vec<String>,
    /// Target source text
    pub source_text: String,
    pub header_text: Option<String>,
}

/// Produces gtest source for a [`GenerationRequest`]
#[async_trait]
pub trait TestGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Reject text that cannot be a gtest translation unit
pub fn validate_test_source(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(CovforgeError::generator("generator returned empty test source"));
    }
    if !(text.contains("TEST(") || text.contains("TEST_F(") || text.contains("TEST_P(")) {
        return Err(CovforgeError::generator(
            "generated source contains no gtest TEST/TEST_F case",
        ));
    }
    Ok(())
}

/// First fenced code block, preferring a `cpp`/`c++` fence; the whole text when unfenced
pub fn extract_code_block(text: &str) -> String {
    for fence in ["```cpp", "```c++", "```"] {
        if let Some(start) = text.find(fence) {
            let body = &text[start + fence.len()..];
            let body = body.strip_prefix('\n').unwrap_or(body);
            if let Some(end) = body.find("```") {
                return body[..end].trim().to_string();
            }
        }
    }
    text.trim().to_string()
}

/// Render the natural-language prompt for a request
pub fn render_prompt(request: &GenerationRequest) -> String {
    let function = &request.function;
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Write Google Test unit tests for the C++ function `{}` of `{}`.",
        function.qualified_name(),
        request.target_type
    );
    if let Some(include) = &request.header_include {
        let _ = writeln!(prompt, "Include the header with `#include \"{include}\"`.");
    }
    if !request.mocked_types.is_empty() {
        let _ = writeln!(
            prompt,
            "These dependencies are replaced by default-constructible stand-ins whose methods return default values: {}.",
            request.mocked_types.join(", ")
        );
    }

    match request.strategy {
        None => prompt.push_str("Cover the normal behaviour of the function.\n"),
        Some(Strategy::Branch) => {
            prompt.push_str("Make every listed branch arm execute at least once:\n");
        }
        Some(Strategy::Path) => {
            prompt.push_str(
                "Exercise different combinations of conditions so distinct execution paths run:\n",
            );
        }
        Some(Strategy::Boundary) => {
            prompt.push_str("Test values at, just below and just above each listed boundary:\n");
        }
    }
    for gap in &request.gaps {
        let _ = writeln!(prompt, "- line {}: {}", gap.line, gap.description);
    }
    if request.prefer_simple {
        prompt.push_str(
            "Previous tests failed to compile. Use only the public API shown below and keep each test small.\n",
        );
    }

    if let Some(header) = &request.header_text {
        let _ = write!(prompt, "\nHeader:\n```cpp\n{header}\n```\n");
    }
    let _ = write!(prompt, "\nSource:\n```cpp\n{}\n```\n", request.source_text);
    prompt.push_str("\nReturn only one ```cpp code block containing the complete test file.\n");
    prompt
}

/// Replays canned responses in order, for tests and dry runs
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<std::result::Result<String, String>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(responses: impl IntoIterator<Item = std::result::Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A generator that always answers with `source`
    pub fn repeating(source: impl Into<String>, times: usize) -> Self {
        let source = source.into();
        Self::new(std::iter::repeat_with(|| Ok(source.clone())).take(times))
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl TestGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.lock().push(request.clone());
        match self.responses.lock().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(CovforgeError::generator(message)),
            None => Err(CovforgeError::generator("no scripted response left")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::common::fixtures::{function, if_else};

    fn request(strategy: Option<Strategy>) -> GenerationRequest {
        let mut run = function("run", Some("Program"), 3, 9);
        run.branch_sites.push(if_else(4, 5, Some(7)));
        GenerationRequest {
            target_type: "Program".to_string(),
            header_include: Some("Program.h".to_string()),
            function: run,
            strategy,
            gaps: vec![GapItem {
                function: "Program::run".to_string(),
                strategy: Strategy::Branch,
                line: 4,
                description: "if at line 4 (`x > 0`): arm(s) else never taken".to_string(),
                impact: 0.5,
                function_coverage: 60.0,
                uncovered_arms: vec!["else".to_string()],
            }],
            prefer_simple: true,
            mocked_types: vec!["InterfaceA".to_string()],
            source_text: "int Program::run(int x) { return x; }".to_string(),
            header_text: None,
        }
    }

    #[test]
    fn extracts_cpp_fence_first() {
        let text = "Here you go:\n```cpp\nTEST(A, B) {}\n```\nand ```\nignored\n```";
        assert_eq!(extract_code_block(text), "TEST(A, B) {}");
        assert_eq!(extract_code_block("```\nTEST(X, Y) {}\n```"), "TEST(X, Y) {}");
        assert_eq!(extract_code_block("  TEST(P, Q) {}  "), "TEST(P, Q) {}");
    }

    #[test]
    fn validation_requires_a_gtest_case() {
        assert!(validate_test_source("").is_err());
        assert!(validate_test_source("int main() {}").is_err());
        assert!(validate_test_source("TEST_F(Fixture, Case) {}").is_ok());
    }

    #[test]
    fn prompt_mentions_gaps_and_simplicity() {
        let prompt = render_prompt(&request(Some(Strategy::Branch)));
        assert!(prompt.contains("Program::run"));
        assert!(prompt.contains("- line 4:"));
        assert!(prompt.contains("InterfaceA"));
        assert!(prompt.contains("failed to compile"));
        assert!(prompt.contains("#include \"Program.h\""));
    }

    #[tokio::test]
    async fn scripted_generator_replays_in_order() {
        let generator = ScriptedGenerator::new([Ok("TEST(A, B) {}".to_string()), Err("down".to_string())]);
        let req = request(None);
        assert_eq!(generator.generate(&req).await.unwrap(), "TEST(A, B) {}");
        assert!(matches!(
            generator.generate(&req).await,
            Err(CovforgeError::Generator { .. })
        ));
        assert!(generator.generate(&req).await.is_err());
        assert_eq!(generator.requests().len(), 3);
    }
}

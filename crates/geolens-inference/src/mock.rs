//! Mock generation backend for deterministic testing.
//!
//! Provides scripted responses keyed by prompt substring, injectable
//! transient and permanent failures, and a call log.
//!
//! ## Usage
//!
//! ```rust
//! use geolens_inference::mock::MockBackend;
//! use geolens_core::GenerationBackend;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let backend = MockBackend::new()
//!     .with_response("per-item metrics", r#"[]"#)
//!     .with_default_response("Mock answer");
//!
//! let text = backend.generate("tell me about CRMs").await.unwrap();
//! assert_eq!(text, "Mock answer");
//! # }
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use geolens_core::{Error, GenerationBackend, Result};

/// Failure kind injected by a scripted rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Timeout,
    RateLimited,
    Inference,
}

impl MockFailure {
    fn into_error(self, context: &str) -> Error {
        match self {
            MockFailure::Timeout => Error::Timeout(format!("mock timeout: {context}")),
            MockFailure::RateLimited => Error::RateLimited(format!("mock rate limit: {context}")),
            MockFailure::Inference => Error::Inference(format!("mock failure: {context}")),
        }
    }
}

/// One recorded generation call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system: String,
    pub prompt: String,
}

#[derive(Debug, Clone)]
struct FailureRule {
    substring: String,
    failure: MockFailure,
    /// None = fail every matching call; Some(n) = fail the next n.
    remaining: Option<u32>,
}

#[derive(Debug)]
struct MockState {
    responses: Vec<(String, String)>,
    default_response: String,
    failures: Vec<FailureRule>,
    call_log: Vec<RecordedCall>,
}

/// Mock generation backend for testing.
#[derive(Clone)]
pub struct MockBackend {
    model: String,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a new mock backend with default configuration.
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            state: Arc::new(Mutex::new(MockState {
                responses: Vec::new(),
                default_response: "Mock response".to_string(),
                failures: Vec::new(),
                call_log: Vec::new(),
            })),
        }
    }

    /// Set the reported model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the response returned when no mapping matches.
    pub fn with_default_response(self, response: impl Into<String>) -> Self {
        self.state.lock().unwrap().default_response = response.into();
        self
    }

    /// Map prompts containing `substring` to `response`. First match wins,
    /// in registration order.
    pub fn with_response(self, substring: impl Into<String>, response: impl Into<String>) -> Self {
        self.state
            .lock()
            .unwrap()
            .responses
            .push((substring.into(), response.into()));
        self
    }

    /// Fail every call whose prompt contains `substring`.
    pub fn with_failure(self, substring: impl Into<String>, failure: MockFailure) -> Self {
        self.state.lock().unwrap().failures.push(FailureRule {
            substring: substring.into(),
            failure,
            remaining: None,
        });
        self
    }

    /// Fail the next `count` calls whose prompt contains `substring`, then
    /// fall through to the scripted responses.
    pub fn with_transient_failures(
        self,
        substring: impl Into<String>,
        failure: MockFailure,
        count: u32,
    ) -> Self {
        self.state.lock().unwrap().failures.push(FailureRule {
            substring: substring.into(),
            failure,
            remaining: Some(count),
        });
        self
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().call_log.clone()
    }

    /// Total call count.
    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().call_log.len()
    }

    /// Count of recorded calls whose prompt contains `substring`.
    pub fn calls_matching(&self, substring: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .call_log
            .iter()
            .filter(|call| call.prompt.contains(substring))
            .count()
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_system("", prompt).await
    }

    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.call_log.push(RecordedCall {
            system: system.to_string(),
            prompt: prompt.to_string(),
        });

        for rule in state.failures.iter_mut() {
            if !prompt.contains(&rule.substring) {
                continue;
            }
            match rule.remaining {
                None => return Err(rule.failure.into_error(&rule.substring)),
                Some(0) => {}
                Some(n) => {
                    rule.remaining = Some(n - 1);
                    return Err(rule.failure.into_error(&rule.substring));
                }
            }
        }

        for (substring, response) in &state.responses {
            if prompt.contains(substring.as_str()) {
                return Ok(response.clone());
            }
        }

        Ok(state.default_response.clone())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

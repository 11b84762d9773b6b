//! Mock generation backend for deterministic testing.
//!
//! Implements both `GenerationBackend` and `StreamingGeneration` with
//! configurable responses, simulated latency, and simulated failures, so
//! enhancement-path tests never touch the network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use promptlift_core::{Error, GenerationBackend, Result};

use crate::streaming::{StreamingGeneration, TokenStream};

/// Mock generation backend for testing.
#[derive(Clone)]
pub struct MockGenerationBackend {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    model_name: String,
    mapped_responses: HashMap<String, String>,
    default_response: String,
    latency_ms: u64,
    failure_rate: f64,
}

/// A recorded call against the mock backend.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: String,
    pub system: String,
    pub prompt: String,
    pub timestamp: std::time::Instant,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            model_name: "mock-model".to_string(),
            mapped_responses: HashMap::new(),
            default_response: "Mock enhanced prompt".to_string(),
            latency_ms: 0,
            failure_rate: 0.0,
        }
    }
}

impl MockGenerationBackend {
    /// Create a new mock backend with default configuration.
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set the reported model name.
    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).model_name = name.into();
        self
    }

    /// Set a fixed response for all generation requests.
    pub fn with_fixed_response(mut self, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).default_response = response.into();
        self
    }

    /// Add a response mapping for a specific prompt.
    pub fn with_response_mapping(
        mut self,
        prompt: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Arc::make_mut(&mut self.config)
            .mapped_responses
            .insert(prompt.into(), output.into());
        self
    }

    /// Set simulated latency for all operations.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency_ms = latency_ms;
        self
    }

    /// Set failure rate (0.0 - 1.0) for testing error handling.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        Arc::make_mut(&mut self.config).failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Make every call fail, for exercising fallback paths.
    pub fn always_failing() -> Self {
        Self::new().with_failure_rate(1.0)
    }

    /// Get all logged calls for assertion.
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.call_log.lock().unwrap().clone()
    }

    /// Get number of non-streaming generation calls.
    pub fn generate_call_count(&self) -> usize {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == "generate")
            .count()
    }

    /// Get number of streaming generation calls.
    pub fn stream_call_count(&self) -> usize {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == "stream")
            .count()
    }

    fn log_call(&self, operation: &str, system: &str, prompt: &str) {
        self.call_log.lock().unwrap().push(MockCall {
            operation: operation.to_string(),
            system: system.to_string(),
            prompt: prompt.to_string(),
            timestamp: std::time::Instant::now(),
        });
    }

    fn should_fail(&self) -> bool {
        use rand::Rng;
        if self.config.failure_rate > 0.0 {
            rand::thread_rng().gen::<f64>() < self.config.failure_rate
        } else {
            false
        }
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.config.latency_ms)).await;
        }
    }

    fn response_for(&self, prompt: &str) -> String {
        self.config
            .mapped_responses
            .get(prompt)
            .cloned()
            .unwrap_or_else(|| self.config.default_response.clone())
    }
}

impl Default for MockGenerationBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.log_call("generate", system, prompt);
        self.simulate_latency().await;

        if self.should_fail() {
            return Err(Error::Inference("Simulated failure for testing".to_string()));
        }

        Ok(self.response_for(prompt))
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}

#[async_trait]
impl StreamingGeneration for MockGenerationBackend {
    async fn generate_with_system_stream(
        &self,
        system: &str,
        prompt: &str,
    ) -> Result<TokenStream> {
        self.log_call("stream", system, prompt);
        self.simulate_latency().await;

        if self.should_fail() {
            return Err(Error::Inference("Simulated failure for testing".to_string()));
        }

        // Split the canned response into word tokens, keeping the trailing
        // space on each so concatenation reproduces the full text.
        let response = self.response_for(prompt);
        let tokens: Vec<Result<String>> = response
            .split_inclusive(' ')
            .map(|t| Ok(t.to_string()))
            .collect();

        Ok(Box::pin(futures::stream::iter(tokens)))
    }
}

use crate::error_handling::DispatchError;
use crate::shell::Platform;
use crate::tiers::Tier;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

/// The only shape accepted from the advisory service for a validation
/// call. Any deviation (missing field, extra field, wrong type) is a
/// protocol violation and the caller treats it as an unsafe verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationVerdict {
    pub safe: bool,
    pub reason: String,
    pub warnings: Vec<String>,
    pub suggestion: Option<String>,
}

/// The only shape accepted from the advisory service for a correction
/// call. Violations are a no-op: the original command runs unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Correction {
    pub corrected: String,
    pub confidence: f32,
}

/// Narrow interface to the external advisory service.
///
/// The gate advises only: it never executes a command, and it never
/// fails open. Timeouts, transport errors, and malformed responses all
/// surface as errors for the tier state machine to resolve fail-safe.
#[async_trait]
pub trait ValidationGate: Send + Sync {
    /// Ask for a safe/unsafe judgment of a command.
    async fn validate(
        &self,
        command: &str,
        platform: Platform,
        tier: Tier,
    ) -> Result<ValidationVerdict, DispatchError>;

    /// Ask for a typo correction of a command.
    async fn correct(
        &self,
        command: &str,
        platform: Platform,
    ) -> Result<Correction, DispatchError>;
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
    command: &'a str,
    platform: &'a str,
    tier: f32,
}

#[derive(Serialize)]
struct CorrectRequest<'a> {
    command: &'a str,
    platform: &'a str,
}

/// HTTP adapter to the advisory service.
///
/// Bounded timeout (default 10s) on every call, at most one retry on
/// transport failure. Protocol violations are not retried; a service
/// that answers with the wrong shape will keep doing so.
pub struct HttpValidationGate {
    client: Client,
    base_url: String,
}

/// Default advisory call timeout.
pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(10);

impl HttpValidationGate {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<String, DispatchError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut last_err = DispatchError::ValidationTransport("advisory service unreachable".to_string());

        for _attempt in 0..2 {
            match self.client.post(&url).json(body).send().await {
                Ok(response) => match response.error_for_status() {
                    Ok(response) => match response.text().await {
                        Ok(text) => return Ok(text),
                        Err(e) => last_err = map_transport_error(e),
                    },
                    Err(e) => last_err = map_transport_error(e),
                },
                Err(e) => last_err = map_transport_error(e),
            }
        }

        Err(last_err)
    }
}

fn map_transport_error(e: reqwest::Error) -> DispatchError {
    if e.is_timeout() {
        DispatchError::ValidationTimeout
    } else {
        DispatchError::ValidationTransport(e.to_string())
    }
}

#[async_trait]
impl ValidationGate for HttpValidationGate {
    async fn validate(
        &self,
        command: &str,
        platform: Platform,
        tier: Tier,
    ) -> Result<ValidationVerdict, DispatchError> {
        let request = ValidateRequest {
            command,
            platform: platform.as_str(),
            tier: tier.as_number(),
        };
        let text = self.post_json("validate", &request).await?;
        serde_json::from_str(&text).map_err(|e| DispatchError::ValidationParse(e.to_string()))
    }

    async fn correct(
        &self,
        command: &str,
        platform: Platform,
    ) -> Result<Correction, DispatchError> {
        let request = CorrectRequest {
            command,
            platform: platform.as_str(),
        };
        let text = self.post_json("correct", &request).await?;
        serde_json::from_str(&text).map_err(|e| DispatchError::ValidationParse(e.to_string()))
    }
}

/// Deterministic in-process gate.
///
/// Returns scripted responses and records every call, so tests can
/// assert exactly which advisory steps ran without any network access.
pub struct ScriptedGate {
    verdict: Result<ValidationVerdict, DispatchError>,
    correction: Result<Correction, DispatchError>,
    pub validate_calls: Mutex<Vec<String>>,
    pub correct_calls: Mutex<Vec<String>>,
}

impl ScriptedGate {
    pub fn new(
        verdict: Result<ValidationVerdict, DispatchError>,
        correction: Result<Correction, DispatchError>,
    ) -> Self {
        Self {
            verdict,
            correction,
            validate_calls: Mutex::new(Vec::new()),
            correct_calls: Mutex::new(Vec::new()),
        }
    }

    /// Gate that approves everything and never suggests corrections.
    pub fn permissive() -> Self {
        Self::new(
            Ok(ValidationVerdict {
                safe: true,
                reason: "ok".to_string(),
                warnings: Vec::new(),
                suggestion: None,
            }),
            Err(DispatchError::ValidationTransport("no corrector".to_string())),
        )
    }

    /// Gate that is unreachable for both operations.
    pub fn unavailable() -> Self {
        Self::new(
            Err(DispatchError::ValidationTimeout),
            Err(DispatchError::ValidationTimeout),
        )
    }
}

#[async_trait]
impl ValidationGate for ScriptedGate {
    async fn validate(
        &self,
        command: &str,
        _platform: Platform,
        _tier: Tier,
    ) -> Result<ValidationVerdict, DispatchError> {
        self.validate_calls.lock().unwrap().push(command.to_string());
        self.verdict.clone()
    }

    async fn correct(
        &self,
        command: &str,
        _platform: Platform,
    ) -> Result<Correction, DispatchError> {
        self.correct_calls.lock().unwrap().push(command.to_string());
        self.correction.clone()
    }
}

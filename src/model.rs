use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::debug;

use crate::config::InferenceConfig;
use crate::detection::Detection;
use crate::error::InferenceError;

/// Parsed detector answer plus the untouched JSON it came from.
#[derive(Debug, Clone)]
pub struct InferenceOutput {
    pub detections: Vec<Detection>,
    pub raw: serde_json::Value,
}

/// Boundary to the object detector.
///
/// `PayloadTooLarge` is kept apart from every other failure so the caller can
/// retry with a smaller image.
pub trait InferenceGateway: Send + Sync {
    fn infer(&self, image: &Path) -> Result<InferenceOutput, InferenceError>;
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    predictions: Vec<Detection>,
}

impl InferenceOutput {
    pub fn from_json(raw: serde_json::Value) -> Result<Self, InferenceError> {
        let parsed: DetectResponse = serde_json::from_value(raw.clone())
            .map_err(|e| InferenceError::Failed(format!("malformed detector response: {}", e)))?;
        Ok(Self {
            detections: parsed.predictions,
            raw,
        })
    }
}

/// Hosted detection endpoint speaking the Roboflow `detect` protocol: the
/// image goes base64-encoded in a form body, the key and confidence in the
/// query string.
pub struct HostedModel {
    agent: ureq::Agent,
    config: InferenceConfig,
}

impl HostedModel {
    pub fn new(config: InferenceConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self { agent, config }
    }

    fn endpoint(&self) -> String {
        format!("{}/{}", self.config.api_url, self.config.model_id)
    }
}

impl InferenceGateway for HostedModel {
    fn infer(&self, image: &Path) -> Result<InferenceOutput, InferenceError> {
        let bytes = fs::read(image)
            .map_err(|e| InferenceError::Failed(format!("cannot read {}: {}", image.display(), e)))?;
        let body = STANDARD.encode(&bytes);
        // The detector takes the threshold as an integer percentage.
        let confidence = ((self.config.confidence * 100.0).round() as u32).to_string();
        debug!(bytes = bytes.len(), model = %self.config.model_id, "calling detector");

        let response = self
            .agent
            .post(&self.endpoint())
            .query("api_key", &self.config.api_key)
            .query("confidence", &confidence)
            .set("Content-Type", "application/x-www-form-urlencoded")
            .send_string(&body);

        match response {
            Ok(resp) => {
                let raw: serde_json::Value = resp
                    .into_json()
                    .map_err(|e| InferenceError::Failed(format!("unreadable detector response: {}", e)))?;
                InferenceOutput::from_json(raw)
            }
            Err(ureq::Error::Status(413, _)) => Err(InferenceError::PayloadTooLarge),
            Err(ureq::Error::Status(code, resp)) => {
                let detail = resp.into_string().unwrap_or_default();
                Err(InferenceError::Failed(format!("HTTP {}: {}", code, detail.trim())))
            }
            Err(ureq::Error::Transport(t)) => Err(InferenceError::Failed(t.to_string())),
        }
    }
}

//! HTTP client for the face-verification service.
//!
//! `POST {base}/verify-attendance` takes the registered and current photos as
//! multipart parts and answers with a verification, liveness and
//! recommendation section. Every failure mode is folded into
//! [`VerificationAttemptResult::ServiceUnavailable`]; a denial only ever
//! comes from a well-formed response.

use crate::photos::LocalPhotoStore;
use faceclock_core::{
    CapturedImage, Decision, FaceVerifier, StoreError, VerificationAttemptResult,
    VerificationOutcome,
};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Default timeout for a verification request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const VERIFY_PATH: &str = "verify-attendance";
const HEALTH_PATH: &str = "health";
const MISSING_REASON: &str = "verification service gave no reason";

#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("verification service unreachable: {0}")]
    Unreachable(String),
    #[error("verification request failed: {0}")]
    RequestFailed(String),
    #[error("verification service returned HTTP {0}")]
    Status(u16),
    #[error("invalid verification response: {0}")]
    InvalidResponse(String),
    #[error("verification service reported failure")]
    ServiceFailure,
    #[error("reference photo unavailable: {0}")]
    Reference(#[from] StoreError),
}

impl From<reqwest::Error> for VerifierError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Unreachable(format!("request timed out: {e}"))
        } else if e.is_connect() {
            Self::Unreachable(format!("connection failed: {e}"))
        } else if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::RequestFailed(e.to_string())
        }
    }
}

/// Raw response of `POST /verify-attendance`. Every field is optional so a
/// partial payload decodes; missing signals count as failed checks.
#[derive(Debug, Default, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    verification: Option<VerificationSection>,
    #[serde(default, alias = "liveness")]
    liveness_check: Option<LivenessSection>,
    #[serde(default)]
    recommendation: Option<RecommendationSection>,
}

#[derive(Debug, Default, Deserialize)]
struct VerificationSection {
    #[serde(default)]
    verified: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LivenessSection {
    #[serde(default)]
    is_live: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RecommendationSection {
    #[serde(default)]
    allow_checkin: Option<bool>,
    #[serde(default)]
    overall_confidence: Option<f32>,
    #[serde(default)]
    reason: Option<String>,
}

impl VerifyResponse {
    fn into_outcome(self) -> Result<VerificationOutcome, VerifierError> {
        if self.success == Some(false) {
            return Err(VerifierError::ServiceFailure);
        }
        // A null section reads the same as a missing one.
        let verification = self.verification.unwrap_or_default();
        let liveness = self.liveness_check.unwrap_or_default();
        let recommendation = self.recommendation.unwrap_or_default();
        let decision = if recommendation.allow_checkin.unwrap_or(false) {
            Decision::Allow
        } else {
            Decision::Deny
        };
        Ok(VerificationOutcome::new(
            verification.verified.unwrap_or(false),
            liveness.is_live.unwrap_or(false),
            recommendation.overall_confidence.unwrap_or(0.0),
            decision,
            recommendation
                .reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| MISSING_REASON.to_string()),
        ))
    }
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceHealth {
    pub status: String,
    #[serde(default)]
    pub deepface_version: Option<String>,
    #[serde(default)]
    pub available_models: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ServiceHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Client for the face-verification service.
///
/// Reference locators starting with `http://` or `https://` are downloaded;
/// anything else is read from the local photo store.
pub struct HttpVerifier {
    /// HTTP client (reusable connection pool).
    http_client: reqwest::Client,
    base_url: String,
    photos: LocalPhotoStore,
}

impl HttpVerifier {
    pub fn new(base_url: &str, photos: LocalPhotoStore) -> Result<Self, VerifierError> {
        Self::with_timeouts(base_url, photos, DEFAULT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_timeouts(
        base_url: &str,
        photos: LocalPhotoStore,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, VerifierError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("faceclock/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| VerifierError::RequestFailed(e.to_string()))?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            photos,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Query the service health endpoint.
    pub async fn health(&self) -> Result<ServiceHealth, VerifierError> {
        let response = self.http_client.get(self.url(HEALTH_PATH)).send().await?;
        if !response.status().is_success() {
            return Err(VerifierError::Status(response.status().as_u16()));
        }
        response
            .json::<ServiceHealth>()
            .await
            .map_err(|e| VerifierError::InvalidResponse(e.to_string()))
    }

    async fn load_reference(&self, locator: &str) -> Result<Vec<u8>, VerifierError> {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            let response = self.http_client.get(locator).send().await?;
            if !response.status().is_success() {
                return Err(VerifierError::Reference(StoreError::Unavailable(format!(
                    "{locator}: HTTP {}",
                    response.status()
                ))));
            }
            Ok(response.bytes().await?.to_vec())
        } else {
            Ok(self.photos.read(locator).await?)
        }
    }

    /// Run one verification, surfacing the failure reason.
    pub async fn try_verify(
        &self,
        reference_locator: &str,
        image: &CapturedImage,
    ) -> Result<VerificationOutcome, VerifierError> {
        let reference = self.load_reference(reference_locator).await?;

        let form = Form::new()
            .part(
                "registered_photo",
                Part::bytes(reference)
                    .file_name("registered.jpg")
                    .mime_str("image/jpeg")?,
            )
            .part(
                "current_photo",
                Part::bytes(image.bytes().to_vec())
                    .file_name("current.jpg")
                    .mime_str("image/jpeg")?,
            );

        let response = self
            .http_client
            .post(self.url(VERIFY_PATH))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerifierError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let payload: VerifyResponse = serde_json::from_slice(&body)
            .map_err(|e| VerifierError::InvalidResponse(e.to_string()))?;
        payload.into_outcome()
    }
}

impl FaceVerifier for HttpVerifier {
    async fn verify(
        &self,
        reference_locator: &str,
        image: &CapturedImage,
    ) -> VerificationAttemptResult {
        match self.try_verify(reference_locator, image).await {
            Ok(outcome) => {
                tracing::info!(
                    matched = outcome.matched(),
                    live = outcome.is_live(),
                    confidence = outcome.confidence(),
                    decision = ?outcome.decision(),
                    "verification service answered"
                );
                VerificationAttemptResult::Succeeded(outcome)
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %self.base_url, "verification service unavailable");
                VerificationAttemptResult::ServiceUnavailable(e.to_string())
            }
        }
    }
}

//! Application state: the grade store, grading config, and optional collaborators.
//!
//! This module owns:
//!   - the in-memory grade store (stand-in for the hosted database)
//!   - the grading config (from TOML or defaults)
//!   - optional detection-service client
//!   - optional LLM client for rubric drafts
//!   - quiz attempts in progress
//!
//! Missing collaborators are not fatal: submissions are stored unanalyzed and
//! rubric drafting answers with `disabled`.

use std::sync::Arc;
use tracing::{info, instrument};

use crate::config::{load_config_from_env, GradingConfig};
use crate::detection::DetectionClient;
use crate::openai::OpenAI;
use crate::quiz::QuizAttempts;
use crate::store::InMemoryStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<InMemoryStore>,
    pub config: GradingConfig,
    pub detection: Option<DetectionClient>,
    pub drafter: Option<OpenAI>,
    pub attempts: Arc<QuizAttempts>,
}

impl AppState {
    /// Build state from env: load config, init collaborator clients.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let config = load_config_from_env();
        info!(target: "grading_backend",
            dashboard_threshold = config.integrity.dashboard_risk_threshold,
            insights_threshold = config.integrity.insights_risk_threshold,
            "Integrity thresholds");

        let detection = DetectionClient::from_env();
        if let Some(d) = &detection {
            info!(target: "grading_backend", base_url = %d.base_url, model = %config.detection.model, "Detection service enabled.");
        } else {
            info!(target: "grading_backend", "Detection disabled (no DETECTION_API_URL). Submissions are stored unanalyzed.");
        }

        let drafter = OpenAI::from_env();
        if let Some(oa) = &drafter {
            info!(target: "grading_backend", base_url = %oa.base_url, model = %oa.model, "Rubric drafting enabled.");
        } else {
            info!(target: "grading_backend", "Rubric drafting disabled (no LLM_API_KEY).");
        }

        Self::with_parts(InMemoryStore::new(), config, detection, drafter)
    }

    pub fn with_parts(
        store: InMemoryStore,
        config: GradingConfig,
        detection: Option<DetectionClient>,
        drafter: Option<OpenAI>,
    ) -> Self {
        Self { store: Arc::new(store), config, detection, drafter, attempts: Arc::new(QuizAttempts::default()) }
    }
}

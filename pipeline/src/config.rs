//! Run configuration loaded from the environment
//!
//! Values come from a `.env` file (if present) and the process environment;
//! anything unset keeps its default. CLI flags are applied on top by the binary.

use std::path::PathBuf;
use std::time::Duration;

use shared::StepKind;

use crate::core::budget::BudgetLimits;
use crate::core::retry::RetryPolicy;
use crate::error::{PipelineError, PipelineResult};

pub const DEFAULT_SCENE_REGENERATION_CAP: u32 = 2;

/// Declared step kinds, in output order
pub fn default_step_kinds() -> Vec<StepKind> {
    vec![
        StepKind::FullView,
        StepKind::CloseUp,
        StepKind::Angular,
        StepKind::SceneVariant(1),
        StepKind::SceneVariant(2),
    ]
}

/// Credentials for the remote services
#[derive(Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub publish_endpoint: Option<String>,
    pub publish_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("publish_endpoint", &self.publish_endpoint)
            .field("publish_token", &self.publish_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub budget: BudgetLimits,
    pub retry: RetryPolicy,
    pub scene_regeneration_cap: u32,
    pub steps: Vec<StepKind>,
    pub output_dir: PathBuf,
    pub credentials: Credentials,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            budget: BudgetLimits::default(),
            retry: RetryPolicy::default(),
            scene_regeneration_cap: DEFAULT_SCENE_REGENERATION_CAP,
            steps: default_step_kinds(),
            output_dir: PathBuf::from("output"),
            credentials: Credentials::default(),
        }
    }
}

impl PipelineConfig {
    /// Load `.env` (ignored when absent) and read the process environment
    pub fn from_env() -> PipelineResult<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(value) = get("RATE_LIMIT_PER_MINUTE") {
            config.budget.per_minute = parse_number("RATE_LIMIT_PER_MINUTE", &value)?;
        }
        if let Some(value) = get("RATE_LIMIT_PER_DAY") {
            config.budget.per_day = parse_number("RATE_LIMIT_PER_DAY", &value)?;
        }
        if let Some(value) = get("INTER_REQUEST_DELAY_MS") {
            config.budget.inter_request_delay = Duration::from_millis(parse_number("INTER_REQUEST_DELAY_MS", &value)?);
        }
        if let Some(value) = get("MAX_ATTEMPTS") {
            config.retry.max_attempts = parse_number("MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = get("CALL_TIMEOUT_SECS") {
            config.retry.call_timeout = Duration::from_secs(parse_number("CALL_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = get("SCENE_REGENERATION_CAP") {
            config.scene_regeneration_cap = parse_number("SCENE_REGENERATION_CAP", &value)?;
        }
        if let Some(value) = get("GENERATION_STEPS") {
            config.steps = parse_steps(&value)?;
        }
        if let Some(value) = get("OUTPUT_DIR") {
            config.output_dir = PathBuf::from(value);
        }

        config.credentials = Credentials {
            api_key: get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")),
            publish_endpoint: get("PUBLISH_ENDPOINT"),
            publish_token: get("PUBLISH_TOKEN"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        self.budget.validate()?;
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::config("MAX_ATTEMPTS must be at least 1"));
        }
        if self.retry.call_timeout.is_zero() {
            return Err(PipelineError::config("CALL_TIMEOUT_SECS must be at least 1"));
        }
        if self.steps.is_empty() {
            return Err(PipelineError::config("at least one generation step must be declared"));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> PipelineResult<T> {
    value
        .parse()
        .map_err(|_| PipelineError::config(format!("{key} must be a non-negative integer, got '{value}'")))
}

/// Parse a comma-separated list such as `full-view,close-up,scene-variant-1`
pub fn parse_steps(value: &str) -> PipelineResult<Vec<StepKind>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<StepKind>().map_err(PipelineError::from))
        .collect()
}

//! Launch parameter resolution.
//!
//! A run's effective parameters come from the launch configuration snapshot,
//! overridden field-by-field by request-time values, then adjusted by the
//! project's analyzer profile.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::{Error, Result};

/// How AI triage runs after enrichment completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AiMode {
    /// An operator must confirm before findings are pushed.
    Manual,
    /// Push automatically using the saved default filter snapshot.
    AutoDefault,
    /// Skip AI triage entirely.
    #[default]
    Disabled,
}

impl AiMode {
    /// Stable string form used for persistence and API payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            AiMode::Manual => "MANUAL",
            AiMode::AutoDefault => "AUTO_DEFAULT",
            AiMode::Disabled => "DISABLED",
        }
    }
}

impl std::str::FromStr for AiMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MANUAL" => Ok(AiMode::Manual),
            "AUTO_DEFAULT" => Ok(AiMode::AutoDefault),
            "DISABLED" => Ok(AiMode::Disabled),
            other => Err(Error::InvalidInput(format!("unknown ai_mode '{other}'"))),
        }
    }
}

/// Filter snapshot size bound. The filter language itself is evaluated
/// elsewhere; we only validate the envelope.
const MAX_FILTER_LIMIT: i64 = 500;

/// Request-time overrides for a run. Every field is optional; a `None` means
/// "use the saved launch configuration value".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchOverrides {
    pub analyzers: Option<Vec<String>>,
    pub languages: Option<Vec<String>>,
    pub source_ref: Option<String>,
    pub log_level: Option<String>,
    pub ai_mode: Option<AiMode>,
    pub ai_filter: Option<Value>,
}

/// The saved, reusable part of a launch configuration relevant to parameter
/// resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    pub analyzers: Vec<String>,
    pub languages: Vec<String>,
    pub source_ref: Option<String>,
    pub ai_mode: AiMode,
    pub ai_filter: Option<Value>,
}

/// Project-level inputs to resolution.
#[derive(Debug, Clone, Default)]
pub struct ProjectProfile {
    /// Languages the project supports; always unioned into the result.
    pub supported_languages: Vec<String>,
    /// Free-form profile blob; `profile.analyzers.include` / `.exclude`
    /// adjust the analyzer set.
    pub profile: Value,
}

/// Fully resolved parameters handed to the scan runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedParams {
    pub analyzers: Vec<String>,
    pub languages: Vec<String>,
    pub source_ref: Option<String>,
    pub log_level: String,
    pub ai_mode: AiMode,
    pub ai_filter: Option<Value>,
}

impl ResolvedParams {
    /// Merge request overrides over the saved configuration, field by field,
    /// then apply the project profile.
    pub fn resolve(
        config: &ConfigSnapshot,
        project: &ProjectProfile,
        overrides: &LaunchOverrides,
    ) -> Result<Self> {
        let base_analyzers = match &overrides.analyzers {
            Some(list) if !list.is_empty() => list.clone(),
            _ => config.analyzers.clone(),
        };
        let analyzers = apply_analyzer_profile(base_analyzers, &project.profile);

        let mut languages: BTreeSet<String> = project
            .supported_languages
            .iter()
            .cloned()
            .collect();
        let extra = match &overrides.languages {
            Some(list) if !list.is_empty() => list,
            _ => &config.languages,
        };
        languages.extend(extra.iter().cloned());

        let ai_mode = overrides.ai_mode.unwrap_or(config.ai_mode);
        let ai_filter = resolve_ai_filter(
            ai_mode,
            overrides.ai_filter.as_ref().or(config.ai_filter.as_ref()),
        )?;

        Ok(Self {
            analyzers,
            languages: languages.into_iter().collect(),
            source_ref: overrides
                .source_ref
                .clone()
                .or_else(|| config.source_ref.clone()),
            log_level: overrides
                .log_level
                .clone()
                .unwrap_or_else(|| "INFO".to_string()),
            ai_mode,
            ai_filter,
        })
    }
}

/// Apply `profile.analyzers.exclude` then `.include` to the analyzer set.
fn apply_analyzer_profile(analyzers: Vec<String>, profile: &Value) -> Vec<String> {
    let mut set: BTreeSet<String> = analyzers.into_iter().collect();
    if let Some(rules) = profile.get("analyzers") {
        if let Some(exclude) = rules.get("exclude").and_then(Value::as_array) {
            for name in exclude.iter().filter_map(Value::as_str) {
                set.remove(name);
            }
        }
        if let Some(include) = rules.get("include").and_then(Value::as_array) {
            for name in include.iter().filter_map(Value::as_str) {
                set.insert(name.to_string());
            }
        }
    }
    set.into_iter().collect()
}

/// Couple the filter snapshot to the AI mode: manual mode never carries a
/// snapshot, automatic mode requires a valid one.
fn resolve_ai_filter(mode: AiMode, filter: Option<&Value>) -> Result<Option<Value>> {
    match mode {
        AiMode::Manual | AiMode::Disabled => Ok(None),
        AiMode::AutoDefault => {
            let filter = filter.ok_or_else(|| {
                Error::InvalidInput("AUTO_DEFAULT ai_mode requires an ai_filter snapshot".into())
            })?;
            validate_filter_envelope(filter)?;
            Ok(Some(filter.clone()))
        }
    }
}

/// Shape-check a filter snapshot: an object with a bounded integer `limit`
/// and at least one condition field. Condition semantics live in the filter
/// evaluator, not here.
pub fn validate_filter_envelope(filter: &Value) -> Result<()> {
    let obj = filter
        .as_object()
        .ok_or_else(|| Error::InvalidInput("ai_filter must be an object".into()))?;
    let limit = obj
        .get("limit")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::InvalidInput("ai_filter requires an integer 'limit'".into()))?;
    if limit < 1 {
        return Err(Error::InvalidInput("ai_filter limit must be >= 1".into()));
    }
    if limit > MAX_FILTER_LIMIT {
        return Err(Error::InvalidInput(format!(
            "ai_filter limit must be <= {MAX_FILTER_LIMIT}"
        )));
    }
    if !obj.keys().any(|k| k != "limit" && k != "order_by") {
        return Err(Error::InvalidInput(
            "ai_filter requires at least one condition field".into(),
        ));
    }
    Ok(())
}

//! Per-user preference learning (spec.md §4.13).
//!
//! Preferences accumulate from observed signals: explicit ("I prefer
//! snake_case") or inferred (code style detected in a diff, approval
//! patterns, message length). An explicit signal above
//! [`MIN_CONFIDENCE`] applies immediately; an inferred signal only
//! applies once the same (category, key, value) has been observed
//! [`ESTABLISHMENT_THRESHOLD`] times with sufficient average confidence.
//! Persisted state is beyond the ten relational tables this core owns
//! (spec.md §1, §6), so storage is a collaborator this module calls
//! through rather than a local `Store`.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

const MIN_CONFIDENCE: f32 = 0.6;
const ESTABLISHMENT_THRESHOLD: usize = 3;

#[derive(Debug, Clone)]
pub struct PreferenceSignal {
    pub category: String,
    pub key: String,
    pub value: String,
    pub confidence: f32,
    pub evidence: String,
    /// "explicit" or "inferred".
    pub source: String,
}

impl PreferenceSignal {
    pub fn inferred(category: impl Into<String>, key: impl Into<String>, value: impl Into<String>, confidence: f32, evidence: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            key: key.into(),
            value: value.into(),
            confidence,
            evidence: evidence.into(),
            source: "inferred".to_string(),
        }
    }

    pub fn explicit(category: impl Into<String>, key: impl Into<String>, value: impl Into<String>, confidence: f32, evidence: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            key: key.into(),
            value: value.into(),
            confidence,
            evidence: evidence.into(),
            source: "explicit".to_string(),
        }
    }
}

/// Aggregated preferences learned for one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub naming_convention: String,
    #[serde(default)]
    pub indentation: String,
    #[serde(default)]
    pub comment_style: String,

    #[serde(default = "default_verbosity")]
    pub verbosity: String,
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default = "default_depth")]
    pub explanation_depth: String,

    #[serde(default)]
    pub preferred_tools: Vec<String>,
    #[serde(default = "default_approval_threshold")]
    pub approval_threshold: String,
}

fn default_verbosity() -> String {
    "moderate".to_string()
}

fn default_tone() -> String {
    "professional".to_string()
}

fn default_depth() -> String {
    "moderate".to_string()
}

fn default_approval_threshold() -> String {
    "medium".to_string()
}

/// Formats the learned profile into a prompt context section, or an
/// empty string if nothing has been learned yet.
pub fn format_for_prompt(prefs: &UserPreferences) -> String {
    let mut sections = Vec::new();

    let mut code_style = Vec::new();
    if !prefs.naming_convention.is_empty() {
        code_style.push(format!("naming: {}", prefs.naming_convention));
    }
    if !prefs.indentation.is_empty() {
        code_style.push(format!("indentation: {}", prefs.indentation));
    }
    if !prefs.comment_style.is_empty() {
        code_style.push(format!("comments: {}", prefs.comment_style));
    }
    if !code_style.is_empty() {
        sections.push(format!("Code style: {}", code_style.join(", ")));
    }

    sections.push(format!(
        "Communication: {} verbosity, {} tone, {} depth",
        prefs.verbosity, prefs.tone, prefs.explanation_depth
    ));

    if !prefs.preferred_tools.is_empty() {
        sections.push(format!("Preferred tools: {}", prefs.preferred_tools.join(", ")));
    }
    sections.push(format!("Approval caution level: {}", prefs.approval_threshold));

    format!("## User Preferences (learned)\n{}", sections.iter().map(|s| format!("- {s}")).collect::<Vec<_>>().join("\n"))
}

/// Seam to the persisted persona store. A real implementation is the
/// relational user_personas record kept by an external collaborator.
#[async_trait::async_trait]
pub trait PersonaCollaborator: Send + Sync {
    async fn load(&self, user_id: &str) -> anyhow::Result<Option<UserPreferences>>;
    async fn save(&self, user_id: &str, prefs: &UserPreferences) -> anyhow::Result<()>;
}

/// Maps a signal's (category, key) onto the `UserPreferences` field it
/// updates; list-valued and unmapped keys are handled separately.
fn apply_field(prefs: &mut UserPreferences, signal: &PreferenceSignal) {
    match (signal.category.as_str(), signal.key.as_str()) {
        ("code_style", "naming_convention") => prefs.naming_convention = signal.value.clone(),
        ("code_style", "indentation") => prefs.indentation = signal.value.clone(),
        ("code_style", "comment_style") => prefs.comment_style = signal.value.clone(),
        ("communication", "verbosity") => prefs.verbosity = signal.value.clone(),
        ("communication", "tone") => prefs.tone = signal.value.clone(),
        ("communication", "explanation_depth") => prefs.explanation_depth = signal.value.clone(),
        ("workflow", "approval_threshold") => prefs.approval_threshold = signal.value.clone(),
        ("workflow", "preferred_tool") => {
            if !prefs.preferred_tools.iter().any(|t| t == &signal.value) {
                prefs.preferred_tools.push(signal.value.clone());
                let len = prefs.preferred_tools.len();
                if len > 20 {
                    prefs.preferred_tools.drain(0..len - 20);
                }
            }
        }
        _ => {}
    }
}

/// Learns and applies per-user preferences from observed signals.
pub struct PersonaLearner {
    store: Arc<dyn PersonaCollaborator>,
    observations: DashMap<String, Vec<PreferenceSignal>>,
    cache: DashMap<String, UserPreferences>,
}

impl PersonaLearner {
    pub fn new(store: Arc<dyn PersonaCollaborator>) -> Self {
        Self {
            store,
            observations: DashMap::new(),
            cache: DashMap::new(),
        }
    }

    pub async fn load_persona(&self, user_id: &str) -> UserPreferences {
        if let Some(prefs) = self.cache.get(user_id) {
            return prefs.clone();
        }

        let prefs = match self.store.load(user_id).await {
            Ok(Some(prefs)) => prefs,
            Ok(None) => UserPreferences::default(),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "persona: failed to load, using defaults");
                UserPreferences::default()
            }
        };
        self.cache.insert(user_id.to_string(), prefs.clone());
        prefs
    }

    /// Records a preference signal, applying it if it has crossed the
    /// explicit-immediate or inferred-establishment bar.
    pub async fn observe(&self, user_id: &str, signal: PreferenceSignal) {
        let matching_count;
        let avg_confidence;
        {
            let mut entry = self.observations.entry(user_id.to_string()).or_default();
            entry.push(signal.clone());
            let matching: Vec<&PreferenceSignal> = entry
                .iter()
                .filter(|o| o.category == signal.category && o.key == signal.key && o.value == signal.value)
                .collect();
            matching_count = matching.len();
            avg_confidence = if matching.is_empty() {
                0.0
            } else {
                matching.iter().map(|o| o.confidence).sum::<f32>() / matching.len() as f32
            };
        }

        let should_apply = (signal.source == "explicit" && signal.confidence >= MIN_CONFIDENCE)
            || (matching_count >= ESTABLISHMENT_THRESHOLD && avg_confidence >= MIN_CONFIDENCE);

        if should_apply {
            self.apply(user_id, &signal).await;
        }
    }

    async fn apply(&self, user_id: &str, signal: &PreferenceSignal) {
        let mut prefs = self.load_persona(user_id).await;
        apply_field(&mut prefs, signal);
        self.cache.insert(user_id.to_string(), prefs.clone());
        if let Err(e) = self.store.save(user_id, &prefs).await {
            tracing::warn!(user_id = %user_id, error = %e, "persona: failed to persist preferences");
        }
    }

    pub async fn format_for_prompt(&self, user_id: &str) -> String {
        format_for_prompt(&self.load_persona(user_id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct InMemoryPersonaStore {
        saved: AsyncMutex<Option<(String, UserPreferences)>>,
    }

    #[async_trait::async_trait]
    impl PersonaCollaborator for InMemoryPersonaStore {
        async fn load(&self, user_id: &str) -> anyhow::Result<Option<UserPreferences>> {
            let saved = self.saved.lock().await;
            Ok(saved.as_ref().filter(|(id, _)| id == user_id).map(|(_, p)| p.clone()))
        }

        async fn save(&self, user_id: &str, prefs: &UserPreferences) -> anyhow::Result<()> {
            *self.saved.lock().await = Some((user_id.to_string(), prefs.clone()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn explicit_signal_applies_immediately() {
        let learner = PersonaLearner::new(Arc::new(InMemoryPersonaStore::default()));
        learner
            .observe("u1", PreferenceSignal::explicit("code_style", "naming_convention", "snake_case", 0.9, "user said so"))
            .await;

        let prefs = learner.load_persona("u1").await;
        assert_eq!(prefs.naming_convention, "snake_case");
    }

    #[tokio::test]
    async fn inferred_signal_needs_three_matching_observations() {
        let learner = PersonaLearner::new(Arc::new(InMemoryPersonaStore::default()));

        for _ in 0..2 {
            learner
                .observe("u1", PreferenceSignal::inferred("code_style", "indentation", "tabs", 0.7, "tab detected"))
                .await;
        }
        assert_eq!(learner.load_persona("u1").await.indentation, "");

        learner
            .observe("u1", PreferenceSignal::inferred("code_style", "indentation", "tabs", 0.7, "tab detected"))
            .await;
        assert_eq!(learner.load_persona("u1").await.indentation, "tabs");
    }

    #[tokio::test]
    async fn low_average_confidence_never_establishes() {
        let learner = PersonaLearner::new(Arc::new(InMemoryPersonaStore::default()));
        for _ in 0..5 {
            learner
                .observe("u1", PreferenceSignal::inferred("communication", "verbosity", "concise", 0.4, "short messages"))
                .await;
        }
        assert_eq!(learner.load_persona("u1").await.verbosity, "moderate");
    }

    #[test]
    fn format_for_prompt_includes_learned_fields() {
        let mut prefs = UserPreferences::default();
        prefs.naming_convention = "camelCase".to_string();
        let formatted = format_for_prompt(&prefs);
        assert!(formatted.contains("camelCase"));
    }
}

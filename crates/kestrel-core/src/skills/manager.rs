//! Loads instruction skills from disk and persists/validates executable
//! skill records (spec.md §4.11).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Result};

use super::loader::{load_skill_file, load_skills_from_dir};
use super::skill::{valid_skill_name, Skill, SkillInfo, SkillRecord, SkillSource};
use super::validate::validate_skill_manifest;

/// Storage seam for executable skill records, implemented by
/// `storage::skills` against the `agent_skills` table.
#[async_trait::async_trait]
pub trait SkillStore: Send + Sync {
    async fn upsert(&self, record: &SkillRecord) -> Result<()>;
    async fn get(&self, workspace_id: &str, name: &str) -> Result<Option<SkillRecord>>;
    async fn list(&self, workspace_id: &str) -> Result<Vec<SkillRecord>>;
}

/// Discovers and serves `SKILL.md` instruction skills, and validates and
/// registers executable skill records.
pub struct SkillsManager {
    skills: HashMap<String, Skill>,
    store: Option<std::sync::Arc<dyn SkillStore>>,
}

impl SkillsManager {
    pub fn new() -> Self {
        Self {
            skills: HashMap::new(),
            store: None,
        }
    }

    pub fn with_store(store: std::sync::Arc<dyn SkillStore>) -> Self {
        Self {
            skills: HashMap::new(),
            store: Some(store),
        }
    }

    /// Load instruction skills from the global and project directories
    /// (project overrides global on name collision).
    pub fn with_defaults(working_dir: &Path) -> Self {
        let mut manager = Self::new();
        if let Some(home) = dirs::home_dir() {
            manager.load_dir(&home.join(".kestrel").join("skills"), SkillSource::Global);
        }
        manager.load_dir(&working_dir.join(".kestrel").join("skills"), SkillSource::Project);
        manager
    }

    fn load_dir(&mut self, dir: &Path, source: SkillSource) {
        for skill in load_skills_from_dir(dir, source) {
            self.skills.insert(skill.name.clone(), skill);
        }
    }

    pub fn list_skills(&self) -> Vec<SkillInfo> {
        let mut infos: Vec<SkillInfo> = self.skills.values().map(Skill::info).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn load_skill_content(&self, name: &str) -> Result<String> {
        let skill = self
            .skills
            .get(name)
            .ok_or_else(|| anyhow!("skill '{name}' not found"))?;
        Ok(skill.body.clone())
    }

    pub fn load_file_from_skill(&self, name: &str, file: &str) -> Result<String> {
        let skill = self
            .skills
            .get(name)
            .ok_or_else(|| anyhow!("skill '{name}' not found"))?;
        load_skill_file(&skill.path, file)
    }

    /// Validate, persist and make available an executable skill
    /// (spec.md §4.11 steps 1-4; registration as a tool happens in the
    /// caller once this returns).
    pub async fn create_skill(
        &self,
        workspace_id: &str,
        name: String,
        description: String,
        parameters_schema: serde_json::Value,
        code: String,
        capabilities: Vec<String>,
    ) -> Result<SkillRecord> {
        if !valid_skill_name(&name) {
            return Err(anyhow!(
                "invalid skill name '{name}': must be lowercase, start with a letter"
            ));
        }
        validate_skill_manifest(&code, &capabilities)?;

        let record = SkillRecord {
            workspace_id: workspace_id.to_string(),
            name,
            description,
            parameters_schema,
            code,
            capabilities,
            created_at: chrono::Utc::now(),
        };

        if let Some(store) = &self.store {
            store.upsert(&record).await?;
        }
        Ok(record)
    }

    pub async fn list_executable_skills(&self, workspace_id: &str) -> Result<Vec<SkillRecord>> {
        match &self.store {
            Some(store) => store.list(workspace_id).await,
            None => Ok(Vec::new()),
        }
    }
}

impl Default for SkillsManager {
    fn default() -> Self {
        Self::new()
    }
}

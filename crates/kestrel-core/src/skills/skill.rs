//! Skill types: filesystem-loaded instruction skills and the metadata
//! record for a stored, executable skill (spec.md §4.11).

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::tool::RiskLevel;

/// Where a skill's definition was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillSource {
    Global,
    Project,
}

/// An instruction skill: a `SKILL.md` with YAML frontmatter, loaded for
/// its documentation content rather than executed.
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub version: String,
    pub path: PathBuf,
    pub source: SkillSource,
    pub body: String,
}

/// Summary used for listing, without the full body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillInfo {
    pub name: String,
    pub description: String,
    pub version: String,
    pub source: &'static str,
}

impl Skill {
    pub fn info(&self) -> SkillInfo {
        SkillInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            version: self.version.clone(),
            source: match self.source {
                SkillSource::Global => "global",
                SkillSource::Project => "project",
            },
        }
    }

    /// Parse `SKILL.md` content: `---\n<yaml>\n---\n<body>`.
    pub fn parse(content: &str, path: PathBuf, source: SkillSource) -> Result<Self> {
        let content = content.trim_start();
        if !content.starts_with("---") {
            return Err(anyhow!("SKILL.md missing YAML frontmatter"));
        }
        let rest = &content[3..];
        let end = rest
            .find("\n---")
            .ok_or_else(|| anyhow!("SKILL.md frontmatter not closed"))?;
        let frontmatter = &rest[..end];
        let body = rest[end + 4..].trim_start_matches('\n').to_string();

        #[derive(Deserialize)]
        struct Frontmatter {
            name: String,
            description: String,
            #[serde(default = "default_version")]
            version: String,
        }
        fn default_version() -> String {
            "0.1.0".to_string()
        }

        let fm: Frontmatter = serde_yaml::from_str(frontmatter)
            .map_err(|e| anyhow!("invalid SKILL.md frontmatter: {e}"))?;

        Ok(Self {
            name: fm.name,
            description: fm.description,
            version: fm.version,
            path,
            source,
            body,
        })
    }
}

/// A user-authored executable skill: source code plus the JSON schema its
/// `run(args)` entry point accepts. Registered as a dynamic tool of
/// category `skill`, risk `medium` (spec.md §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRecord {
    pub workspace_id: String,
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
    pub code: String,
    /// Declared capabilities the code is allowed to exercise, checked
    /// against at manifest-validation time (e.g. "network", "filesystem").
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl SkillRecord {
    pub fn risk(&self) -> RiskLevel {
        RiskLevel::Medium
    }
}

/// Identifier rule: lowercase letters, digits, underscore, hyphen; must
/// start with a letter.
pub fn valid_skill_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frontmatter_and_body() {
        let content = "---\nname: git-commit\ndescription: Commit helper\n---\n\n# Git Commit\n";
        let skill = Skill::parse(content, PathBuf::from("/skills/git-commit"), SkillSource::Global)
            .unwrap();
        assert_eq!(skill.name, "git-commit");
        assert!(skill.body.contains("Git Commit"));
    }

    #[test]
    fn rejects_missing_frontmatter() {
        assert!(Skill::parse("# no frontmatter", PathBuf::from("/x"), SkillSource::Project).is_err());
    }

    #[test]
    fn name_validation() {
        assert!(valid_skill_name("git-commit"));
        assert!(valid_skill_name("deploy_v2"));
        assert!(!valid_skill_name("Deploy"));
        assert!(!valid_skill_name("2fast"));
        assert!(!valid_skill_name(""));
    }
}

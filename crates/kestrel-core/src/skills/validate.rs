//! Skill manifest validation (spec.md §4.11, REDESIGN FLAGS: no in-process
//! AST restriction; skills run out-of-process, so validation here is a
//! manifest/capability check rather than a static code analyzer).

use anyhow::{anyhow, Result};

/// Capabilities a skill may declare. Anything not in this set is rejected
/// at creation time rather than silently ignored.
const KNOWN_CAPABILITIES: &[&str] = &["network", "filesystem", "subprocess", "clock"];

const MAX_SKILL_CODE_BYTES: usize = 64 * 1024;

/// Reject malformed or over-broad skill submissions before they are
/// persisted. This does not sandbox the code itself; execution is routed
/// to the external sandbox RPC, which enforces `capabilities` at runtime.
pub fn validate_skill_manifest(code: &str, capabilities: &[String]) -> Result<()> {
    if code.trim().is_empty() {
        return Err(anyhow!("skill code must not be empty"));
    }
    if code.len() > MAX_SKILL_CODE_BYTES {
        return Err(anyhow!(
            "skill code exceeds {MAX_SKILL_CODE_BYTES} byte limit ({} bytes)",
            code.len()
        ));
    }
    for cap in capabilities {
        if !KNOWN_CAPABILITIES.contains(&cap.as_str()) {
            return Err(anyhow!("unknown capability '{cap}'"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_code() {
        assert!(validate_skill_manifest("", &[]).is_err());
    }

    #[test]
    fn rejects_unknown_capability() {
        assert!(validate_skill_manifest("run(args)", &["nuke".to_string()]).is_err());
    }

    #[test]
    fn accepts_known_capabilities() {
        assert!(validate_skill_manifest("run(args)", &["network".to_string()]).is_ok());
    }

    #[test]
    fn rejects_oversized_code() {
        let code = "x".repeat(MAX_SKILL_CODE_BYTES + 1);
        assert!(validate_skill_manifest(&code, &[]).is_err());
    }
}

use super::PolicyFile;
use crate::error::{MfwError, Result};
use std::collections::HashMap;

/// Checks every rule of a policy before anything is submitted. Duplicate
/// rules are legal, since the store keeps duplicates, but they are flagged.
pub fn validate_policy(policy: &PolicyFile) -> Result<()> {
    if policy.rules.is_empty() {
        return Err(MfwError::Policy(
            "Policy file must contain at least one rule".to_string(),
        ));
    }

    let mut seen = HashMap::new();

    for (idx, policy_rule) in policy.rules.iter().enumerate() {
        let rule = policy_rule
            .to_rule()
            .map_err(|e| MfwError::Policy(format!("rule #{}: {}", idx + 1, e)))?;

        if let Some(prev_idx) = seen.insert(rule, idx) {
            log::warn!(
                "Rule #{} duplicates rule #{}; removing it once leaves the other in place",
                idx + 1,
                prev_idx + 1
            );
        }
    }

    Ok(())
}

use crate::codec::{Operation, Record};
use crate::control::ControlChannel;
use crate::error::Result;
use crate::models::rule::Rule;
use crate::policy::PolicyFile;

pub struct RulesState;

impl RulesState {
    pub fn add_rule(channel: &mut dyn ControlChannel, rule: &Rule) -> Result<()> {
        channel.submit(&Record::new(Operation::Add, *rule))?;
        log::info!("Submitted Add for {} {} rule", rule.direction, rule.ip_version);
        Ok(())
    }

    pub fn remove_rule(channel: &mut dyn ControlChannel, rule: &Rule) -> Result<()> {
        channel.submit(&Record::new(Operation::Remove, *rule))?;
        log::info!(
            "Submitted Remove for {} {} rule",
            rule.direction,
            rule.ip_version
        );
        Ok(())
    }

    pub fn list_rules(channel: &mut dyn ControlChannel) -> Result<Vec<Rule>> {
        channel.rules()
    }

    /// Submits every rule of a policy file in file order. Stops at the first
    /// failure and reports how many rules went through before it.
    pub fn apply_policy(
        channel: &mut dyn ControlChannel,
        policy: &PolicyFile,
        operation: Operation,
    ) -> Result<usize> {
        let mut applied = 0;
        for policy_rule in &policy.rules {
            let rule = policy_rule.to_rule()?;
            let result = match operation {
                Operation::Remove => Self::remove_rule(channel, &rule),
                _ => Self::add_rule(channel, &rule),
            };
            if let Err(e) = result {
                log::error!(
                    "Stopped after {} of {} policy rules: {}",
                    applied,
                    policy.rules.len(),
                    e
                );
                return Err(e);
            }
            applied += 1;
        }
        Ok(applied)
    }
}

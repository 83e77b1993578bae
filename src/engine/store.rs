use crate::codec::{Operation, Record};
use crate::error::{MfwError, Result};
use crate::models::rule::Rule;
use std::sync::{Arc, RwLock};

/// Ordered, process-wide collection of installed rules.
///
/// Writers clone the rule list under the write lock and swap the new list in,
/// so readers holding a [`Snapshot`] never see a half-applied update and never
/// hold the lock while they scan.
#[derive(Debug, Default)]
pub struct RuleStore {
    rules: RwLock<Arc<Vec<Rule>>>,
    max_rules: usize,
}

/// Immutable view of the store at one point in time. Iterating it does not
/// consume it, so the same snapshot can be enumerated again.
#[derive(Debug, Clone)]
pub struct Snapshot {
    rules: Arc<Vec<Rule>>,
}

impl Snapshot {
    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Rule> {
        self.rules.as_ref().clone()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that refuses Add once it holds `max_rules` entries. Zero means
    /// unlimited.
    pub fn with_capacity_limit(max_rules: usize) -> Self {
        RuleStore {
            rules: RwLock::new(Arc::new(Vec::new())),
            max_rules,
        }
    }

    /// Appends a rule. Duplicates are kept.
    pub fn add(&self, rule: Rule) -> Result<()> {
        let mut guard = self.write();
        if self.max_rules != 0 && guard.len() >= self.max_rules {
            return Err(MfwError::StoreFull(self.max_rules));
        }

        Arc::make_mut(&mut *guard).push(rule);
        log::info!("Added {} rule ({} total)", rule.ip_version, guard.len());
        Ok(())
    }

    /// Deletes the first entry equal to `rule` in every field. Wildcards are
    /// compared as plain values. Returns whether an entry was removed; a miss
    /// is not an error.
    pub fn remove(&self, rule: &Rule) -> bool {
        let mut guard = self.write();
        match guard.iter().position(|r| r == rule) {
            Some(index) => {
                Arc::make_mut(&mut *guard).remove(index);
                log::info!("Removed rule at index {} ({} left)", index, guard.len());
                true
            }
            None => {
                log::debug!("Remove matched no stored rule");
                false
            }
        }
    }

    pub fn enumerate(&self) -> Snapshot {
        Snapshot {
            rules: Arc::clone(&self.read()),
        }
    }

    /// Applies a decoded control record. View and None carry no mutation.
    pub fn apply(&self, record: &Record) -> Result<()> {
        match record.operation {
            Operation::Add => self.add(record.rule),
            Operation::Remove => {
                self.remove(&record.rule);
                Ok(())
            }
            Operation::View | Operation::None => {
                log::warn!("Ignoring record with operation {:?}", record.operation);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        *self.write() = Arc::new(Vec::new());
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Arc<Vec<Rule>>> {
        // Updates are a single swap, so a poisoned lock still holds a whole list.
        self.rules.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Arc<Vec<Rule>>> {
        self.rules.write().unwrap_or_else(|e| e.into_inner())
    }
}

//! Retention planning.
//!
//! Decides which completed backups may be deleted under a multi-tier policy.
//! A backup that is an ancestor of any retained backup is never deleted,
//! whatever its own class count says: removing it would orphan the chain.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::adapters::StorageAdapter;
use crate::catalog::{BackupCatalog, CatalogFilter};
use crate::model::{BackupMetadata, BackupStatus, RetentionClass};
use crate::Result;

/// How many backups of each cadence to keep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub daily: usize,
    pub weekly: usize,
    pub monthly: usize,
    pub yearly: usize,
    /// Floor on the number of retained backups
    pub min_backups: usize,
    /// Byte budget for everything retained
    pub max_size: Option<u64>,
}

impl RetentionPolicy {
    pub fn new() -> Self {
        Self {
            daily: 7,
            weekly: 4,
            monthly: 12,
            yearly: 3,
            min_backups: 1,
            max_size: None,
        }
    }

    pub fn daily(mut self, count: usize) -> Self {
        self.daily = count;
        self
    }

    pub fn weekly(mut self, count: usize) -> Self {
        self.weekly = count;
        self
    }

    pub fn monthly(mut self, count: usize) -> Self {
        self.monthly = count;
        self
    }

    pub fn yearly(mut self, count: usize) -> Self {
        self.yearly = count;
        self
    }

    pub fn min_backups(mut self, count: usize) -> Self {
        self.min_backups = count;
        self
    }

    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    /// Count kept for `class`; `None` means unlimited
    pub fn keep_count(&self, class: RetentionClass) -> Option<usize> {
        match class {
            RetentionClass::Daily => Some(self.daily),
            RetentionClass::Weekly => Some(self.weekly),
            RetentionClass::Monthly => Some(self.monthly),
            RetentionClass::Yearly => Some(self.yearly),
            RetentionClass::Permanent => None,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of planning; every completed backup lands in exactly one list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetentionPlan {
    /// Kept on their own merit (class count, permanence, minimum floor)
    pub retained: Vec<String>,
    /// Kept only because a retained backup depends on them
    pub referenced: Vec<String>,
    /// Eligible for deletion, newest first
    pub deletions: Vec<String>,
    pub retained_bytes: u64,
}

/// Result of executing a plan
#[derive(Debug, Clone, Default)]
pub struct CleanupResult {
    pub deleted: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub retained: usize,
}

/// Stateless retention planner
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionManager;

impl RetentionManager {
    pub fn new() -> Self {
        Self
    }

    /// Ids of cataloged backups eligible for deletion
    pub async fn plan_deletions(
        &self,
        catalog: &BackupCatalog,
        policy: &RetentionPolicy,
    ) -> Result<Vec<String>> {
        Ok(self.plan(catalog, policy).await?.deletions)
    }

    pub async fn plan(&self, catalog: &BackupCatalog, policy: &RetentionPolicy) -> Result<RetentionPlan> {
        let completed = catalog
            .find(&CatalogFilter::new().status(BackupStatus::Completed))
            .await?;
        Ok(plan_retention(&completed, policy))
    }

    /// Execute a plan: delete each artifact, then its catalog record.
    ///
    /// Failures are collected per backup; one failure does not stop the rest.
    /// When a backup cannot be deleted its ancestors are kept as well, so the
    /// surviving backup stays restorable.
    pub async fn enforce(
        &self,
        catalog: &BackupCatalog,
        storage: &dyn StorageAdapter,
        policy: &RetentionPolicy,
    ) -> Result<CleanupResult> {
        let completed = catalog
            .find(&CatalogFilter::new().status(BackupStatus::Completed))
            .await?;
        let plan = plan_retention(&completed, policy);
        let by_id: HashMap<&str, &BackupMetadata> =
            completed.iter().map(|b| (b.id.as_str(), b)).collect();

        let mut result = CleanupResult {
            retained: plan.retained.len() + plan.referenced.len(),
            ..Default::default()
        };
        // Ancestor id -> the undeletable backup that still depends on it
        let mut pinned: HashMap<String, String> = HashMap::new();

        // Newest first, so a dependent is always gone before its parent
        for id in plan.deletions {
            if let Some(dependent) = pinned.get(&id) {
                warn!(backup_id = %id, dependent = %dependent, "Keeping parent of undeleted backup");
                let reason = format!("still required by backup {}", dependent);
                result.failed.push((id, reason));
                continue;
            }

            let meta = match catalog.get(&id).await {
                Ok(meta) => meta,
                Err(e) => {
                    result.failed.push((id, e.to_string()));
                    continue;
                }
            };

            if let Err(e) = storage.delete(&meta.destination).await {
                warn!(backup_id = %id, error = %e, "Failed to delete backup artifact");
                {
                    let root = HashSet::from([id.as_str()]);
                    for ancestor in ancestors_of(&root, &by_id) {
                        pinned.entry(ancestor.to_string()).or_insert_with(|| id.clone());
                    }
                }
                result.failed.push((id, format!("{:#}", e)));
                continue;
            }
            match catalog.remove(&id).await {
                Ok(()) => result.deleted.push(id),
                Err(e) => result.failed.push((id, e.to_string())),
            }
        }

        info!(
            deleted = result.deleted.len(),
            failed = result.failed.len(),
            retained = result.retained,
            "Retention policy enforced"
        );
        Ok(result)
    }
}

/// Pure planning over a set of completed backups
pub fn plan_retention(backups: &[BackupMetadata], policy: &RetentionPolicy) -> RetentionPlan {
    let by_id: HashMap<&str, &BackupMetadata> =
        backups.iter().map(|b| (b.id.as_str(), b)).collect();

    // Class counts, newest first within each class
    let mut by_class: HashMap<RetentionClass, Vec<&BackupMetadata>> = HashMap::new();
    for backup in backups {
        by_class.entry(backup.retention_class).or_default().push(backup);
    }

    let mut kept: HashSet<&str> = HashSet::new();
    let mut candidates: Vec<&BackupMetadata> = Vec::new();
    for (class, mut members) in by_class {
        members.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        let keep = policy.keep_count(class).unwrap_or(members.len());
        for (index, backup) in members.into_iter().enumerate() {
            if index < keep {
                kept.insert(backup.id.as_str());
            } else {
                candidates.push(backup);
            }
        }
    }

    // Minimum floor: promote the newest candidates
    candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    let mut remaining = Vec::new();
    for candidate in candidates {
        if kept.len() < policy.min_backups {
            kept.insert(candidate.id.as_str());
        } else {
            remaining.push(candidate);
        }
    }

    let mut referenced = ancestors_of(&kept, &by_id);
    referenced.retain(|id| !kept.contains(id));

    // Byte budget: evict the oldest unprotected retained backups
    if let Some(budget) = policy.max_size {
        loop {
            let total: u64 = kept
                .iter()
                .chain(referenced.iter())
                .filter_map(|id| by_id.get(id))
                .map(|b| b.size_bytes)
                .sum();
            if total <= budget {
                break;
            }

            let all_retained: HashSet<&str> = kept.union(&referenced).copied().collect();
            let protected = ancestors_of(&all_retained, &by_id);
            let victim = all_retained
                .iter()
                .filter_map(|id| by_id.get(id).copied())
                .filter(|b| b.retention_class != RetentionClass::Permanent)
                .filter(|b| !protected.contains(b.id.as_str()))
                .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

            match victim {
                Some(victim) => {
                    debug!(backup_id = %victim.id, "Evicting backup to honour size budget");
                    kept.remove(victim.id.as_str());
                    referenced.remove(victim.id.as_str());
                    remaining.push(victim);
                    // Dropping a backup may release its ancestors
                    let still_needed = ancestors_of(&kept, &by_id);
                    let released: Vec<&str> = referenced
                        .iter()
                        .filter(|id| !still_needed.contains(*id))
                        .copied()
                        .collect();
                    for id in released {
                        referenced.remove(id);
                        if let Some(backup) = by_id.get(id) {
                            remaining.push(*backup);
                        }
                    }
                }
                None => {
                    warn!(
                        total_bytes = total,
                        budget = budget,
                        "Size budget exceeded but every retained backup is protected"
                    );
                    break;
                }
            }
        }
    }

    let newest_first = |ids: &mut Vec<String>| {
        ids.sort_by(|a, b| {
            let (ma, mb) = (by_id[a.as_str()], by_id[b.as_str()]);
            mb.created_at.cmp(&ma.created_at).then_with(|| a.cmp(b))
        });
    };

    let mut retained: Vec<String> = kept.iter().map(|id| id.to_string()).collect();
    let mut referenced_ids: Vec<String> = referenced.iter().map(|id| id.to_string()).collect();
    let mut deletions: Vec<String> = remaining
        .iter()
        .filter(|b| !kept.contains(b.id.as_str()) && !referenced.contains(b.id.as_str()))
        .map(|b| b.id.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    newest_first(&mut retained);
    newest_first(&mut referenced_ids);
    newest_first(&mut deletions);

    let retained_bytes = retained
        .iter()
        .chain(referenced_ids.iter())
        .map(|id| by_id[id.as_str()].size_bytes)
        .sum();

    RetentionPlan {
        retained,
        referenced: referenced_ids,
        deletions,
        retained_bytes,
    }
}

/// Every ancestor (transitively) of the given backups, following parent links
/// through the provided set. Stops at missing links and on cycles.
fn ancestors_of<'a>(
    roots: &HashSet<&'a str>,
    by_id: &HashMap<&'a str, &'a BackupMetadata>,
) -> HashSet<&'a str> {
    let mut ancestors = HashSet::new();
    for root in roots {
        let mut current = by_id.get(root).and_then(|b| b.parent_backup_id.as_deref());
        while let Some(parent_id) = current {
            let Some(parent) = by_id.get(parent_id) else {
                break;
            };
            if !ancestors.insert(parent.id.as_str()) {
                break;
            }
            current = parent.parent_backup_id.as_deref();
        }
    }
    ancestors
}

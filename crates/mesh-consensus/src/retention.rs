use std::time::Duration;

use chrono::{DateTime, Utc};

/// Eviction rules for finalised consensus states.
///
/// Pending states are never evicted. Both limits are off by default, which
/// keeps every state until it is explicitly forgotten.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Keep at most this many finalised states (oldest finalisation evicted first).
    pub max_finalized: Option<usize>,
    /// Evict finalised states older than this.
    pub finalized_ttl: Option<Duration>,
}

impl RetentionPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_finalized.is_none() && self.finalized_ttl.is_none()
    }

    /// Select ids to evict from `(task_id, finalized_at)` pairs.
    ///
    /// `keep` is never selected and still counts towards the cap, which is
    /// at least one.
    pub fn select_evictions(
        &self,
        mut finalized: Vec<(String, DateTime<Utc>)>,
        now: DateTime<Utc>,
        keep: Option<&str>,
    ) -> Vec<String> {
        finalized.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut evicted = Vec::new();
        if let Some(ttl) = self.finalized_ttl {
            finalized.retain(|(task_id, at)| {
                let expired = keep != Some(task_id.as_str())
                    && (now - *at).to_std().map(|age| age >= ttl).unwrap_or(false);
                if expired {
                    evicted.push(task_id.clone());
                }
                !expired
            });
        }

        if let Some(max) = self.max_finalized {
            let excess = finalized.len().saturating_sub(max.max(1));
            evicted.extend(
                finalized
                    .into_iter()
                    .map(|(task_id, _)| task_id)
                    .filter(|task_id| keep != Some(task_id.as_str()))
                    .take(excess),
            );
        }

        evicted
    }
}

//! Sharding contexts handed to the job for one execution

use std::collections::BTreeMap;
use uuid::Uuid;

/// Everything the local instance runs in one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardingContexts {
    task_id: String,
    job_name: String,
    sharding_total_count: u32,
    job_parameter: String,
    sharding_item_parameters: BTreeMap<u32, String>,
    items: Vec<u32>,
    failover: bool,
}

impl ShardingContexts {
    pub fn new(
        job_name: impl Into<String>,
        instance_id: &str,
        sharding_total_count: u32,
        job_parameter: impl Into<String>,
        sharding_item_parameters: BTreeMap<u32, String>,
        mut items: Vec<u32>,
    ) -> Self {
        let job_name = job_name.into();
        items.sort_unstable();
        items.dedup();
        let task_id = format!("{job_name}@-@{instance_id}@-@{}", Uuid::new_v4().simple());
        Self {
            task_id,
            job_name,
            sharding_total_count,
            job_parameter: job_parameter.into(),
            sharding_item_parameters,
            items,
            failover: false,
        }
    }

    /// Mark these contexts as a failover execution
    pub fn with_failover(mut self) -> Self {
        self.failover = true;
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn sharding_total_count(&self) -> u32 {
        self.sharding_total_count
    }

    /// Items to run, ascending
    pub fn items(&self) -> &[u32] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether the items were claimed through failover
    pub fn is_failover(&self) -> bool {
        self.failover
    }

    /// Per-item context passed to the job
    pub fn context_for(&self, item: u32) -> ShardingContext {
        ShardingContext {
            task_id: self.task_id.clone(),
            job_name: self.job_name.clone(),
            sharding_total_count: self.sharding_total_count,
            job_parameter: self.job_parameter.clone(),
            sharding_item: item,
            sharding_parameter: self.sharding_item_parameters.get(&item).cloned(),
        }
    }
}

/// Context of one shard item execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardingContext {
    pub task_id: String,
    pub job_name: String,
    pub sharding_total_count: u32,
    pub job_parameter: String,
    pub sharding_item: u32,
    pub sharding_parameter: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_items_sorted_and_deduplicated() {
        let contexts = ShardingContexts::new("billing", "a@-@1", 4, "", BTreeMap::new(), vec![3, 1, 3]);
        assert_eq!(contexts.items(), &[1, 3]);
        assert!(!contexts.is_failover());
        assert!(contexts.task_id().starts_with("billing@-@a@-@1@-@"));
    }

    #[test]
    fn test_context_for_item() {
        let parameters = BTreeMap::from([(0, "Beijing".to_string())]);
        let contexts =
            ShardingContexts::new("billing", "a@-@1", 2, "daily", parameters, vec![0, 1]).with_failover();

        let first = contexts.context_for(0);
        assert_eq!(first.sharding_parameter.as_deref(), Some("Beijing"));
        assert_eq!(first.job_parameter, "daily");
        assert!(contexts.context_for(1).sharding_parameter.is_none());
        assert!(contexts.is_failover());
    }
}

//! Per-job configuration
//!
//! A [`JobConfig`] is persisted as JSON under the job's `config` node and is
//! the shared source of truth for every instance running the job.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::strategy::ShardingStrategyType;

/// Configuration of one elastic job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// Job name, also the root node of the job's tree
    pub job_name: String,

    /// Identity of the job implementation; a name may not be reused by another class
    pub job_class: String,

    /// Number of shard items
    pub sharding_total_count: u32,

    /// Per-item parameters, formatted as `0=A,1=B,2=C`
    #[serde(default)]
    pub sharding_item_parameters: String,

    /// Parameter passed to every item
    #[serde(default)]
    pub job_parameter: String,

    /// Opaque schedule expression for the external trigger
    #[serde(default)]
    pub cron: Option<String>,

    /// Track per-item running markers in the store
    #[serde(default = "default_true")]
    pub monitor_execution: bool,

    /// Re-run items abandoned by crashed instances
    #[serde(default)]
    pub failover: bool,

    /// Replay triggers that fired while the previous run was in flight
    #[serde(default = "default_true")]
    pub misfire: bool,

    /// Tolerated clock drift against the store, negative disables the check
    #[serde(default = "default_max_time_diff")]
    pub max_time_diff_seconds: i64,

    /// Leader-side consistency check period, 0 disables it
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_minutes: u32,

    /// Allocation strategy used when resharding
    #[serde(default)]
    pub sharding_strategy: ShardingStrategyType,

    /// Register this instance's server as disabled
    #[serde(default)]
    pub disabled: bool,

    /// Overwrite the stored configuration with the local one at start-up
    #[serde(default)]
    pub overwrite: bool,

    /// Free text description
    #[serde(default)]
    pub description: String,
}

fn default_true() -> bool {
    true
}

fn default_max_time_diff() -> i64 {
    -1
}

fn default_reconcile_interval() -> u32 {
    10
}

impl JobConfig {
    /// Create a config builder with the required fields
    pub fn builder(
        job_name: impl Into<String>,
        job_class: impl Into<String>,
        sharding_total_count: u32,
    ) -> JobConfigBuilder {
        JobConfigBuilder {
            config: JobConfig {
                job_name: job_name.into(),
                job_class: job_class.into(),
                sharding_total_count,
                sharding_item_parameters: String::new(),
                job_parameter: String::new(),
                cron: None,
                monitor_execution: true,
                failover: false,
                misfire: true,
                max_time_diff_seconds: default_max_time_diff(),
                reconcile_interval_minutes: default_reconcile_interval(),
                sharding_strategy: ShardingStrategyType::default(),
                disabled: false,
                overwrite: false,
                description: String::new(),
            },
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.job_name.is_empty() {
            return Err(Error::invalid_config("job_name", "Job name cannot be empty"));
        }
        if self.job_name.contains('/') {
            return Err(Error::invalid_config(
                "job_name",
                format!("Job name '{}' cannot contain '/'", self.job_name),
            ));
        }
        if self.job_class.is_empty() {
            return Err(Error::invalid_config("job_class", "Job class cannot be empty"));
        }
        if self.sharding_total_count == 0 {
            return Err(Error::invalid_config(
                "sharding_total_count",
                "Must be greater than 0",
            ));
        }
        if self.failover && !self.monitor_execution {
            return Err(Error::invalid_config(
                "failover",
                "Failover requires monitor_execution to be enabled",
            ));
        }
        self.parse_item_parameters()?;
        Ok(())
    }

    /// Parse `sharding_item_parameters` into an item → parameter map
    pub fn parse_item_parameters(&self) -> Result<BTreeMap<u32, String>> {
        let mut parameters = BTreeMap::new();
        let raw = self.sharding_item_parameters.trim();
        if raw.is_empty() {
            return Ok(parameters);
        }

        for pair in raw.split(',') {
            let (item, value) = pair.trim().split_once('=').ok_or_else(|| {
                Error::invalid_config(
                    "sharding_item_parameters",
                    format!("'{pair}' is not formatted as item=parameter"),
                )
            })?;
            let item: u32 = item.trim().parse().map_err(|_| {
                Error::invalid_config(
                    "sharding_item_parameters",
                    format!("'{}' is not a valid sharding item", item.trim()),
                )
            })?;
            parameters.insert(item, value.trim().to_string());
        }

        Ok(parameters)
    }

    /// Serialize for the `config` node
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from the `config` node
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Builder for [`JobConfig`]
#[derive(Debug, Clone)]
pub struct JobConfigBuilder {
    config: JobConfig,
}

impl JobConfigBuilder {
    /// Set per-item parameters (`0=A,1=B`)
    pub fn sharding_item_parameters(mut self, value: impl Into<String>) -> Self {
        self.config.sharding_item_parameters = value.into();
        self
    }

    /// Set the job-wide parameter
    pub fn job_parameter(mut self, value: impl Into<String>) -> Self {
        self.config.job_parameter = value.into();
        self
    }

    /// Set the schedule expression
    pub fn cron(mut self, value: impl Into<String>) -> Self {
        self.config.cron = Some(value.into());
        self
    }

    /// Enable/disable execution monitoring
    pub fn monitor_execution(mut self, value: bool) -> Self {
        self.config.monitor_execution = value;
        self
    }

    /// Enable/disable failover
    pub fn failover(mut self, value: bool) -> Self {
        self.config.failover = value;
        self
    }

    /// Enable/disable misfire replay
    pub fn misfire(mut self, value: bool) -> Self {
        self.config.misfire = value;
        self
    }

    /// Set the tolerated clock drift in seconds
    pub fn max_time_diff_seconds(mut self, value: i64) -> Self {
        self.config.max_time_diff_seconds = value;
        self
    }

    /// Set the reconcile period in minutes
    pub fn reconcile_interval_minutes(mut self, value: u32) -> Self {
        self.config.reconcile_interval_minutes = value;
        self
    }

    /// Set the allocation strategy
    pub fn sharding_strategy(mut self, value: ShardingStrategyType) -> Self {
        self.config.sharding_strategy = value;
        self
    }

    /// Register the local server as disabled
    pub fn disabled(mut self, value: bool) -> Self {
        self.config.disabled = value;
        self
    }

    /// Overwrite the stored configuration at start-up
    pub fn overwrite(mut self, value: bool) -> Self {
        self.config.overwrite = value;
        self
    }

    /// Set the description
    pub fn description(mut self, value: impl Into<String>) -> Self {
        self.config.description = value.into();
        self
    }

    /// Build and validate the config
    pub fn build(self) -> Result<JobConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

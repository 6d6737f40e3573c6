//! Job configuration in the coordination store

use chrono::Utc;

use super::ServiceContext;
use crate::config::JobConfig;
use crate::error::{Error, Result};
use crate::node::CONFIG_NODE;

/// Reads and writes the job's shared configuration
#[derive(Debug, Clone)]
pub struct ConfigService {
    ctx: ServiceContext,
}

impl ConfigService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Publish the local configuration, returning the effective one
    ///
    /// A job name registered under another `job_class` is rejected. An
    /// existing configuration is kept unless `overwrite` is set.
    pub async fn persist(&self, config: &JobConfig) -> Result<JobConfig> {
        let storage = &self.ctx.storage;

        if let Some(raw) = storage.get_job_node_data(CONFIG_NODE).await? {
            let registered = JobConfig::from_json(&raw)?;
            if registered.job_class != config.job_class {
                return Err(Error::ConfigurationConflict {
                    job_name: config.job_name.clone(),
                    registered_class: registered.job_class,
                    new_class: config.job_class.clone(),
                });
            }
            if !config.overwrite {
                tracing::debug!(job = %config.job_name, "Keeping registered job configuration");
                return Ok(registered);
            }
        }

        storage.fill_job_node(CONFIG_NODE, &config.to_json()?).await?;
        tracing::info!(
            job = %config.job_name,
            sharding_total_count = config.sharding_total_count,
            "Job configuration published"
        );
        Ok(config.clone())
    }

    /// Load the shared configuration
    pub async fn load(&self) -> Result<JobConfig> {
        let raw = self
            .ctx
            .storage
            .get_job_node_data(CONFIG_NODE)
            .await?
            .ok_or_else(|| Error::JobNotFound(self.ctx.job_name().to_string()))?;
        JobConfig::from_json(&raw)
    }

    /// Fail when the local clock drifts from the store clock beyond the
    /// configured tolerance
    pub async fn check_max_time_diff_seconds_tolerable(&self) -> Result<()> {
        let max_seconds = self.load().await?.max_time_diff_seconds;
        self.check_time_diff(max_seconds).await
    }

    /// Clock check against an explicit tolerance, negative disables it
    pub async fn check_time_diff(&self, max_time_diff_seconds: i64) -> Result<()> {
        if max_time_diff_seconds < 0 {
            return Ok(());
        }

        let store_time = self.ctx.storage.get_registry_center_time().await?;
        let time_diff_ms = (Utc::now() - store_time).num_milliseconds().abs();
        let max_ms = max_time_diff_seconds * 1000;

        if time_diff_ms > max_ms {
            tracing::error!(
                job = self.ctx.job_name(),
                time_diff_ms,
                max_ms,
                "Local clock drifted beyond tolerance"
            );
            return Err(Error::TimeDiffIntolerable {
                time_diff_ms,
                max_ms,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::testing::node;
    use crate::store::MemoryCluster;

    fn config(class: &str) -> JobConfig {
        JobConfig::builder("billing", class, 3).build().unwrap()
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let cluster = MemoryCluster::new();
        let service = node(&cluster, "billing", "10.0.0.1").services.config;

        service.persist(&config("BillingJob")).await.unwrap();
        let loaded = service.load().await.unwrap();

        assert_eq!(loaded.job_class, "BillingJob");
        assert_eq!(loaded.sharding_total_count, 3);
    }

    #[tokio::test]
    async fn test_load_missing_config() {
        let cluster = MemoryCluster::new();
        let service = node(&cluster, "billing", "10.0.0.1").services.config;

        assert!(matches!(service.load().await, Err(Error::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_conflicting_class_rejected() {
        let cluster = MemoryCluster::new();
        let first = node(&cluster, "billing", "10.0.0.1").services.config;
        let second = node(&cluster, "billing", "10.0.0.2").services.config;

        first.persist(&config("BillingJob")).await.unwrap();
        let mut other = config("OtherJob");
        other.overwrite = true;

        let result = second.persist(&other).await;
        assert!(matches!(result, Err(Error::ConfigurationConflict { .. })));
        assert_eq!(first.load().await.unwrap().job_class, "BillingJob");
    }

    #[tokio::test]
    async fn test_existing_config_kept_without_overwrite() {
        let cluster = MemoryCluster::new();
        let service = node(&cluster, "billing", "10.0.0.1").services.config;

        service.persist(&config("BillingJob")).await.unwrap();
        let mut changed = JobConfig::builder("billing", "BillingJob", 8).build().unwrap();

        let effective = service.persist(&changed).await.unwrap();
        assert_eq!(effective.sharding_total_count, 3);

        changed.overwrite = true;
        let effective = service.persist(&changed).await.unwrap();
        assert_eq!(effective.sharding_total_count, 8);
        assert_eq!(service.load().await.unwrap().sharding_total_count, 8);
    }

    #[tokio::test]
    async fn test_time_diff_check() {
        let cluster = MemoryCluster::new();
        let service = node(&cluster, "billing", "10.0.0.1").services.config;

        cluster.set_clock_offset(chrono::Duration::seconds(120));
        assert!(service.check_time_diff(-1).await.is_ok());
        assert!(matches!(
            service.check_time_diff(60).await,
            Err(Error::TimeDiffIntolerable { .. })
        ));
        assert!(service.check_time_diff(600).await.is_ok());
    }
}

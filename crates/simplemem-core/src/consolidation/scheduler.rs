//! Periodic scheduler for consolidation passes.
//!
//! Uses tokio-cron-scheduler to run a pass over the whole space at a fixed
//! interval, off the ingest and query paths.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

use super::manager::{ConsolidationManager, ConsolidationReport, ConsolidationScope};
use crate::error::SimpleMemResult;

/// Configuration for the consolidation scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between passes in minutes (default: 15)
    pub interval_minutes: u64,
    /// Whether to run a pass immediately on start (default: false)
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 15,
            run_on_start: false,
        }
    }
}

impl SchedulerConfig {
    /// Create config with custom interval.
    pub fn with_interval(interval_minutes: u64) -> Self {
        Self {
            interval_minutes: interval_minutes.max(1), // Minimum 1 minute
            ..Default::default()
        }
    }

    /// Enable running a pass immediately on start.
    pub fn with_run_on_start(mut self) -> Self {
        self.run_on_start = true;
        self
    }
}

/// Runs `ConsolidationManager::consolidate` at regular intervals.
///
/// # Example
///
/// ```ignore
/// use simplemem_core::consolidation::{ConsolidationScheduler, SchedulerConfig};
///
/// # async fn example(memory: simplemem_core::Memory) -> simplemem_core::SimpleMemResult<()> {
/// let scheduler = ConsolidationScheduler::new(memory.consolidator(), SchedulerConfig::with_interval(5)).await?;
/// scheduler.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConsolidationScheduler {
    scheduler: JobScheduler,
    manager: Arc<ConsolidationManager>,
    config: SchedulerConfig,
}

impl ConsolidationScheduler {
    /// Create a new scheduler. Call `start()` to begin periodic execution.
    pub async fn new(
        manager: Arc<ConsolidationManager>,
        config: SchedulerConfig,
    ) -> SimpleMemResult<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            manager,
            config,
        })
    }

    /// Create a scheduler using the manager's configured interval.
    pub async fn from_manager(manager: Arc<ConsolidationManager>) -> SimpleMemResult<Self> {
        let config = SchedulerConfig::with_interval(manager.config().interval_minutes);
        Self::new(manager, config).await
    }

    /// Get the scheduler configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Start the scheduler.
    pub async fn start(&self) -> SimpleMemResult<()> {
        let manager = self.manager.clone();
        let interval_secs = self.config.interval_minutes * 60;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval_secs),
            move |_uuid, _lock| {
                let manager = manager.clone();
                Box::pin(async move {
                    debug!("Starting periodic consolidation");
                    if let Err(e) = manager.consolidate(&ConsolidationScope::default()).await {
                        error!(error = %e, "Consolidation failed");
                    }
                })
            },
        )?;

        self.scheduler.add(job).await?;

        if self.config.run_on_start {
            debug!("Running initial consolidation on start");
            if let Err(e) = self.run_now().await {
                error!(error = %e, "Initial consolidation failed");
            }
        }

        self.scheduler.start().await?;

        info!(
            interval_minutes = self.config.interval_minutes,
            "Consolidation scheduler started"
        );

        Ok(())
    }

    /// Stop the scheduler gracefully.
    pub async fn shutdown(&mut self) -> SimpleMemResult<()> {
        info!("Shutting down consolidation scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    /// Run a pass now, outside the schedule.
    pub async fn run_now(&self) -> SimpleMemResult<ConsolidationReport> {
        self.manager.consolidate(&ConsolidationScope::default()).await
    }

    /// Get the underlying manager.
    pub fn manager(&self) -> &Arc<ConsolidationManager> {
        &self.manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{ExtractiveSynthesizer, HashingEmbedder};
    use crate::consolidation::ConsolidationConfig;
    use crate::index::{InMemoryStore, TriLayerIndexer};

    #[test]
    fn test_scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.interval_minutes, 15);
        assert!(!config.run_on_start);
    }

    #[test]
    fn test_scheduler_config_with_interval() {
        let config = SchedulerConfig::with_interval(5);
        assert_eq!(config.interval_minutes, 5);

        let config_min = SchedulerConfig::with_interval(0);
        assert_eq!(config_min.interval_minutes, 1);
    }

    #[tokio::test]
    async fn test_from_manager_uses_configured_interval() {
        let indexer = Arc::new(TriLayerIndexer::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(HashingEmbedder::new(16).unwrap()),
        ));
        let manager = Arc::new(ConsolidationManager::new(
            indexer,
            Arc::new(ExtractiveSynthesizer::new()),
            ConsolidationConfig {
                interval_minutes: 30,
                ..Default::default()
            },
        ));

        let scheduler = ConsolidationScheduler::from_manager(manager).await.unwrap();
        assert_eq!(scheduler.config().interval_minutes, 30);

        let report = scheduler.run_now().await.unwrap();
        assert_eq!(report.atoms_scanned, 0);
    }
}

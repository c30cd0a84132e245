use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use shared::jobs::{BoxError, Job};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::engine::LomsEngine;
use crate::errors::LomsError;
use crate::tranman::TransactionManager;

#[derive(Debug, Clone, Copy)]
pub struct JobPeriods {
    pub unpayed_orders: Duration,
    pub stale_reservations: Duration,
    pub order_notifications: Duration,
}

impl Default for JobPeriods {
    fn default() -> Self {
        Self {
            unpayed_orders: Duration::from_secs(30),
            stale_reservations: Duration::from_secs(60),
            order_notifications: Duration::from_secs(10),
        }
    }
}

/// The periodic maintenance jobs of the service.
pub struct BackgroundJobs {
    jobs: Vec<Job>,
}

impl BackgroundJobs {
    pub fn new<T: TransactionManager>(engine: Arc<LomsEngine<T>>, periods: JobPeriods) -> Self {
        Self {
            jobs: vec![
                engine_job(
                    "unpayed orders",
                    periods.unpayed_orders,
                    engine.clone(),
                    |engine| async move { engine.unpayed_orders().await.map(drop) },
                ),
                engine_job(
                    "stale reservations",
                    periods.stale_reservations,
                    engine.clone(),
                    |engine| async move { engine.stale_reservations().await.map(drop) },
                ),
                engine_job(
                    "order notifications",
                    periods.order_notifications,
                    engine,
                    |engine| async move { engine.send_order_notifications().await.map(drop) },
                ),
            ],
        }
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Starts every job. Jobs that are already running are reported together; the others are
    /// started regardless.
    pub fn start(&self, shutdown: &CancellationToken) -> Result<(), LomsError> {
        let failures: Vec<_> = self
            .jobs
            .iter()
            .filter_map(|job| {
                let e = job.run(shutdown).err()?;
                error!(job = job.name(), "could not start job: {}", e);
                Some(e)
            })
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(LomsError::Jobs(failures))
        }
    }

    /// Stops every job and waits for in-flight runs to finish.
    pub async fn stop(&self) {
        for job in &self.jobs {
            if let Err(e) = job.stop().await {
                error!(job = job.name(), "could not stop job: {}", e);
            }
        }
    }
}

fn engine_job<T, F, Fut>(
    name: &str,
    period: Duration,
    engine: Arc<LomsEngine<T>>,
    run: F,
) -> Job
where
    T: TransactionManager,
    F: Fn(Arc<LomsEngine<T>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), LomsError>> + Send + 'static,
{
    Job::new(name, period, move |_| {
        let run = run(engine.clone());
        async move { run.await.map_err(BoxError::from) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::engine_with;
    use crate::engine::EngineSettings;
    use shared::jobs::JobError;
    use shared::OrderItem;

    #[tokio::test(start_paused = true)]
    async fn jobs_run_on_their_periods() {
        let (engine, store, sender) = engine_with(EngineSettings::default());
        store.put_stock(1, 1, 10).await;
        let engine = Arc::new(engine);
        let order_id = engine
            .create_order(1, vec![OrderItem { sku: 1, count: 2 }])
            .await
            .unwrap();
        engine.cancel_order(order_id).await.unwrap();

        let jobs = BackgroundJobs::new(engine.clone(), JobPeriods::default());
        let shutdown = CancellationToken::new();
        jobs.start(&shutdown).unwrap();
        assert!(jobs.jobs().iter().all(Job::is_running));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(sender.sent.lock().len(), 1);
        assert!(store.snapshot().await.outbox.is_empty());

        jobs.stop().await;
        assert!(jobs.jobs().iter().all(|job| !job.is_running()));
    }

    #[tokio::test]
    async fn jobs_are_named_after_their_sweeps() {
        let (engine, _, _) = engine_with(EngineSettings::default());
        let jobs = BackgroundJobs::new(Arc::new(engine), JobPeriods::default());
        let names: Vec<_> = jobs.jobs().iter().map(Job::name).collect();
        assert_eq!(
            names,
            ["unpayed orders", "stale reservations", "order notifications"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn starting_twice_reports_every_job() {
        let (engine, _, _) = engine_with(EngineSettings::default());
        let jobs = BackgroundJobs::new(Arc::new(engine), JobPeriods::default());
        let shutdown = CancellationToken::new();
        jobs.start(&shutdown).unwrap();

        match jobs.start(&shutdown) {
            Err(LomsError::Jobs(failures)) => {
                assert_eq!(failures.len(), 3);
                assert!(failures
                    .iter()
                    .all(|e| matches!(e, JobError::AlreadyRunning(_))));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        jobs.stop().await;
    }
}

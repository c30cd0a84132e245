//! Periodic background jobs.
//!
//! A [`Job`] runs its task on a fixed interval until it is stopped or its shutdown token is
//! cancelled. Ticks of one job never overlap: the next tick waits for the current run to
//! finish. A failed run is logged and the job keeps its schedule.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type Task = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("this job is already running: {0}")]
    AlreadyRunning(String),
    #[error("job is not running: {0}")]
    NotRunning(String),
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Job {
    name: String,
    period: Duration,
    task: Task,
    running: Mutex<Option<Running>>,
}

impl Job {
    pub fn new<F, Fut>(name: impl Into<String>, period: Duration, task: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            period,
            task: Arc::new(move |cancel| task(cancel).boxed()),
            running: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Spawns the job loop. The first run happens one period after the start. Cancelling
    /// `shutdown` stops the job as well.
    pub fn run(&self, shutdown: &CancellationToken) -> Result<(), JobError> {
        let mut running = self.running.lock();
        if running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
        {
            return Err(JobError::AlreadyRunning(self.name.clone()));
        }

        let cancel = shutdown.child_token();
        let handle = tokio::spawn(tick_loop(
            self.name.clone(),
            self.period,
            self.task.clone(),
            cancel.clone(),
        ));
        *running = Some(Running { cancel, handle });
        info!(job = %self.name, period = ?self.period, "job started");
        Ok(())
    }

    /// Stops the job and waits for an in-flight run to finish.
    pub async fn stop(&self) -> Result<(), JobError> {
        let running = self.running.lock().take();
        let Some(Running { cancel, handle }) = running else {
            return Err(JobError::NotRunning(self.name.clone()));
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            error!(job = %self.name, "job task panicked: {}", e);
        }
        info!(job = %self.name, "job stopped");
        Ok(())
    }
}

async fn tick_loop(name: String, period: Duration, task: Task, cancel: CancellationToken) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick of a tokio interval completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        debug!(job = %name, "running job");
        match task(cancel.clone()).await {
            Ok(()) => debug!(job = %name, "job finished successfully"),
            Err(e) => error!(job = %name, "job finished with error: {}", e),
        }
    }
}

//! The unit of work a job executes.
//!
//! Anything implementing [`Runnable`] can be scheduled: async closures,
//! blocking closures wrapped in [`BlockingJob`], or dedicated task types.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

/// Result of one job execution. The error string is logged and counted.
pub type JobOutcome = Result<(), String>;

/// A zero-argument, failure-reporting unit of work.
///
/// Bodies must not assume they run exactly once per slot; firing is
/// at-least-once.
#[async_trait]
pub trait Runnable: Send + Sync {
    async fn run(&self) -> JobOutcome;
}

#[async_trait]
impl<F, Fut> Runnable for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobOutcome> + Send + 'static,
{
    async fn run(&self) -> JobOutcome {
        (self)().await
    }
}

/// Runs a synchronous body on tokio's blocking pool.
///
/// Use this for bodies that do blocking I/O so they never occupy an async
/// worker thread.
///
/// # Example
///
/// ```
/// use catalog_scheduler::BlockingJob;
///
/// let job = BlockingJob::new(|| {
///     std::fs::metadata("/").map(|_| ()).map_err(|e| e.to_string())
/// });
/// # let _ = job;
/// ```
pub struct BlockingJob<F> {
    body: Arc<F>,
}

impl<F> BlockingJob<F>
where
    F: Fn() -> JobOutcome + Send + Sync + 'static,
{
    pub fn new(body: F) -> Self {
        Self {
            body: Arc::new(body),
        }
    }
}

#[async_trait]
impl<F> Runnable for BlockingJob<F>
where
    F: Fn() -> JobOutcome + Send + Sync + 'static,
{
    async fn run(&self) -> JobOutcome {
        let body = self.body.clone();
        tokio::task::spawn_blocking(move || body())
            .await
            .map_err(|e| format!("blocking job aborted: {}", e))?
    }
}

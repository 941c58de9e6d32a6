//! Async driver for a scheduler.
//!
//! [`SchemeRunner`] owns a [`Scheduler`] and pumps it on the current tokio
//! runtime: it starts the scheme, applies resolutions as render jobs send
//! them, runs the deferred dispatch steps, and reports progress on a fixed
//! interval. Cancellation requests a pause; the run returns once in-flight
//! work has drained, with a checkpoint ready to be saved.
//!
//! ```text
//!            ┌──────────── select (biased) ─────────────┐
//!   start ──►│ cancelled  → pause()                     │
//!            │ tick       → snapshot + progress callback│──► Finished(snapshot)
//!            │ resolution → resolve() + run_deferred()  │──► Paused(checkpoint)
//!            └──────────────────────────────────────────┘
//! ```

use std::fmt;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::checkpoint::Checkpoint;
use super::{Scheduler, Strategy, Traversal};
use crate::statistics::StatsSnapshot;

/// Default interval between progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

type ProgressCallback = Box<dyn FnMut(&StatsSnapshot) + Send>;

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Every tile was dispatched and resolved.
    Finished(StatsSnapshot),
    /// Cancelled and drained. The checkpoint is exact.
    Paused(Checkpoint),
}

impl RunOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunOutcome::Finished(_))
    }
}

/// Drives a [`Scheduler`] to completion or to a pause.
pub struct SchemeRunner<T: Traversal = Strategy> {
    scheme: Scheduler<T>,
    cancel: CancellationToken,
    interval: Duration,
    progress: Option<ProgressCallback>,
}

impl<T: Traversal> SchemeRunner<T> {
    pub fn new(scheme: Scheduler<T>) -> Self {
        Self {
            scheme,
            cancel: CancellationToken::new(),
            interval: DEFAULT_PROGRESS_INTERVAL,
            progress: None,
        }
    }

    /// Pauses the scheme when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Reports a statistics snapshot every `interval`.
    pub fn with_progress<F>(mut self, interval: Duration, callback: F) -> Self
    where
        F: FnMut(&StatsSnapshot) + Send + 'static,
    {
        self.interval = interval;
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn scheme(&self) -> &Scheduler<T> {
        &self.scheme
    }

    pub fn into_scheme(self) -> Scheduler<T> {
        self.scheme
    }

    /// Starts the scheme and drives it until it finishes or, after
    /// cancellation, until nothing is in flight.
    pub async fn run(&mut self) -> RunOutcome {
        let Self {
            scheme,
            cancel,
            interval,
            progress,
        } = self;

        let period = (*interval).max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        scheme.start();
        let mut pausing = false;

        loop {
            if scheme.is_finished() {
                return RunOutcome::Finished(scheme.stats_mut().snapshot());
            }
            if pausing && scheme.pending_count() == 0 {
                debug!("Run drained after cancellation");
                return RunOutcome::Paused(scheme.checkpoint());
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled(), if !pausing => {
                    info!(pending = scheme.pending_count(), "Cancellation requested, pausing");
                    pausing = true;
                    scheme.pause();
                }
                _ = ticker.tick() => {
                    let snapshot = scheme.stats_mut().snapshot();
                    info!(
                        processed = snapshot.processed,
                        total = snapshot.total,
                        pending = snapshot.pending,
                        failed = snapshot.failed,
                        speed = snapshot.speed,
                        "Progress"
                    );
                    if let Some(callback) = progress.as_mut() {
                        callback(&snapshot);
                    }
                }
                resolution = scheme.next_resolution() => {
                    // The scheduler holds a sender, so the channel never closes
                    let Some(resolution) = resolution else {
                        return RunOutcome::Paused(scheme.checkpoint());
                    };
                    scheme.resolve(resolution.id, resolution.outcome);
                    tokio::task::yield_now().await;
                    scheme.process_resolutions();
                }
            }
        }
    }
}

impl<T: Traversal> fmt::Debug for SchemeRunner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemeRunner")
            .field("scheme", &self.scheme)
            .field("interval", &self.interval)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemeConfig;
    use crate::scheme::{RenderJob, RenderTask, Scheme, SchemeType};
    use crate::tile::Tile;
    use rand::Rng;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Resolves every job as unique after a short random delay.
    #[derive(Clone, Default)]
    struct DelayedTask {
        rendered: Arc<Mutex<Vec<Tile>>>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl RenderTask for DelayedTask {
        fn render(&mut self, job: RenderJob) {
            let count = {
                let mut rendered = self.rendered.lock().unwrap();
                rendered.push(job.tile().clone());
                rendered.len()
            };
            if let Some((limit, token)) = &self.cancel_after {
                if count == *limit {
                    token.cancel();
                }
            }

            let delay = rand::rng().random_range(0..4u64);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                job.unique();
            });
        }

        fn finished(&mut self) {}
    }

    fn config() -> SchemeConfig {
        SchemeConfig::default().with_zoom(0, 3).with_concurrency(4)
    }

    #[tokio::test]
    async fn test_runs_to_completion() {
        let task = DelayedTask::default();
        let scheme = Scheme::create(&config(), Box::new(task.clone())).unwrap();
        let mut runner = SchemeRunner::new(scheme);

        let RunOutcome::Finished(snapshot) = runner.run().await else {
            panic!("expected the run to finish");
        };
        assert_eq!(snapshot.total, 85);
        assert_eq!(snapshot.unique, 85);
        assert_eq!(snapshot.pending, 0);
        assert_eq!(task.rendered.lock().unwrap().len(), 85);
    }

    #[tokio::test]
    async fn test_cancel_drains_then_resumes() {
        let token = CancellationToken::new();
        let first = DelayedTask {
            cancel_after: Some((10, token.clone())),
            ..Default::default()
        };
        let scheme = Scheme::create(&config(), Box::new(first.clone())).unwrap();
        let mut runner = SchemeRunner::new(scheme).with_cancellation(token);

        let RunOutcome::Paused(checkpoint) = runner.run().await else {
            panic!("expected the run to pause");
        };
        assert_eq!(checkpoint.stats.pending, 0);
        let done = checkpoint.stats.unique;
        assert!(done >= 10 && done < 85);

        let second = DelayedTask::default();
        let restored = Scheme::restore(checkpoint, Box::new(second.clone())).unwrap();
        let outcome = SchemeRunner::new(restored).run().await;
        let RunOutcome::Finished(snapshot) = outcome else {
            panic!("expected the resumed run to finish");
        };
        assert_eq!(snapshot.unique, 85);

        // Every tile rendered exactly once across both runs
        let mut all = first.rendered.lock().unwrap().clone();
        all.extend(second.rendered.lock().unwrap().iter().cloned());
        let unique: HashSet<_> = all.iter().map(|t| (t.z, t.x, t.y)).collect();
        assert_eq!(all.len(), 85);
        assert_eq!(unique.len(), 85);
    }

    #[tokio::test]
    async fn test_progress_callback_reports() {
        let task = DelayedTask::default();
        let config = config().with_zoom(0, 4).with_concurrency(2);
        let scheme = Scheme::create(&config, Box::new(task)).unwrap();

        let reports = Arc::new(AtomicUsize::new(0));
        let counter = reports.clone();
        let mut runner = SchemeRunner::new(scheme).with_progress(
            Duration::from_millis(1),
            move |snapshot| {
                assert!(snapshot.processed <= snapshot.total);
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert!(runner.run().await.is_finished());
        assert!(reports.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn test_finished_checkpoint_returns_immediately() {
        let task = DelayedTask::default();
        let config = SchemeConfig::default()
            .with_scheme(SchemeType::Pyramid)
            .with_zoom(0, 0)
            .with_maxdepth(1);
        let scheme = Scheme::create(&config, Box::new(task)).unwrap();
        let mut runner = SchemeRunner::new(scheme);
        assert!(runner.run().await.is_finished());

        let checkpoint = runner.scheme().checkpoint();
        let restored_task = DelayedTask::default();
        let restored = Scheme::restore(checkpoint, Box::new(restored_task.clone())).unwrap();
        assert!(SchemeRunner::new(restored).run().await.is_finished());
        assert!(restored_task.rendered.lock().unwrap().is_empty());
    }
}

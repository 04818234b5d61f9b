//! Scheduler
//!
//! A periodic timer with a single-flight gate. Each tick spawns the job only
//! if no other job holds the gate; otherwise the tick is skipped. Stopping
//! cancels the timer, never a job that already started.

use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Work driven by the scheduler.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    async fn run(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Started,
    AlreadyRunning,
    Stopped,
    AlreadyStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunNow {
    Started,
    /// Another job holds the gate.
    Busy,
}

struct State {
    period: Duration,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    state: Mutex<State>,
    gate: Arc<Semaphore>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns `fut` if the gate is free.
    fn spawn_gated<F>(&self, fut: F) -> RunNow
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.gate.clone().try_acquire_owned() {
            Ok(permit) => {
                tokio::spawn(async move {
                    fut.await;
                    drop(permit);
                });
                RunNow::Started
            }
            Err(_) => RunNow::Busy,
        }
    }
}

pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State { period, timer: None }),
                gate: Arc::new(Semaphore::new(1)),
            }),
        }
    }

    /// Starts ticking every `period`. The first run happens one period from now.
    pub fn start(&self, job: Arc<dyn Job>, period: Duration) -> Toggle {
        let mut state = self.inner.state();
        if state.timer.is_some() {
            return Toggle::AlreadyRunning;
        }

        state.period = period;
        state.timer = Some(tokio::spawn(timer_loop(self.inner.clone(), job)));
        debug!(?period, "Scheduler started");
        Toggle::Started
    }

    /// Prevents further ticks. A job already running is left to finish.
    pub fn stop(&self) -> Toggle {
        match self.inner.state().timer.take() {
            Some(timer) => {
                timer.abort();
                debug!("Scheduler stopped");
                Toggle::Stopped
            }
            None => Toggle::AlreadyStopped,
        }
    }

    /// Used for the next wait; the wait in progress keeps its length.
    pub fn set_period(&self, period: Duration) {
        self.inner.state().period = period;
    }

    pub fn period(&self) -> Duration {
        self.inner.state().period
    }

    pub fn is_running(&self) -> bool {
        self.inner.state().timer.is_some()
    }

    /// Whether a job is executing right now.
    pub fn is_busy(&self) -> bool {
        self.inner.gate.available_permits() == 0
    }

    /// Runs `fut` now through the same single-flight gate as the ticks.
    pub fn try_run<F>(&self, fut: F) -> RunNow
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.spawn_gated(fut)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.inner.state().timer.take() {
            timer.abort();
        }
    }
}

async fn timer_loop(inner: Arc<Inner>, job: Arc<dyn Job>) {
    loop {
        let period = inner.state().period;
        tokio::time::sleep(period).await;

        let job = job.clone();
        if inner.spawn_gated(async move { job.run().await }) == RunNow::Busy {
            warn!("Previous check still running, skipping this tick");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, Instant};

    struct Probe {
        work: Duration,
        started: AtomicUsize,
        completed: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        start_times: Mutex<Vec<Instant>>,
    }

    impl Probe {
        fn new(work: Duration) -> Arc<Self> {
            Arc::new(Self {
                work,
                started: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                start_times: Mutex::new(vec![]),
            })
        }

        fn started(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }

        fn completed(&self) -> usize {
            self.completed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Job for Probe {
        async fn run(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.start_times.lock().unwrap().push(Instant::now());
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);

            sleep(self.work).await;

            self.active.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_once_per_period() {
        let probe = Probe::new(Duration::ZERO);
        let scheduler = Scheduler::new(secs(10.0));
        scheduler.start(probe.clone(), secs(10.0));

        sleep(secs(35.0)).await;
        assert_eq!(probe.completed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_job_skips_ticks_instead_of_overlapping() {
        let probe = Probe::new(secs(2.5));
        let scheduler = Scheduler::new(secs(1.0));
        scheduler.start(probe.clone(), secs(1.0));

        // Runs start at 1s, 4s, 7s and 10s; each takes 2.5s.
        sleep(secs(10.5)).await;

        assert_eq!(probe.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(probe.started(), 4);
        assert_eq!(probe.completed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_period_applies_to_next_wait_only() {
        let origin = Instant::now();
        let probe = Probe::new(Duration::ZERO);
        let scheduler = Scheduler::new(secs(10.0));
        scheduler.start(probe.clone(), secs(10.0));

        sleep(secs(2.0)).await;
        scheduler.set_period(secs(3.0));
        assert_eq!(scheduler.period(), secs(3.0));

        sleep(secs(7.9)).await;
        assert_eq!(probe.started(), 0);

        sleep(secs(6.5)).await;
        let offsets: Vec<u128> = probe
            .start_times
            .lock()
            .unwrap()
            .iter()
            .map(|t| (*t - origin).as_millis())
            .collect();
        assert_eq!(offsets, vec![10_000, 13_000, 16_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_running_job_finish() {
        let probe = Probe::new(secs(5.0));
        let scheduler = Scheduler::new(secs(1.0));
        scheduler.start(probe.clone(), secs(1.0));

        sleep(secs(1.5)).await;
        assert!(scheduler.is_busy());
        assert_eq!(scheduler.stop(), Toggle::Stopped);
        assert!(!scheduler.is_running());

        sleep(secs(10.0)).await;
        assert_eq!(probe.started(), 1);
        assert_eq!(probe.completed(), 1);
        assert!(!scheduler.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let probe = Probe::new(Duration::ZERO);
        let scheduler = Scheduler::new(secs(60.0));

        assert_eq!(scheduler.stop(), Toggle::AlreadyStopped);
        assert_eq!(scheduler.start(probe.clone(), secs(60.0)), Toggle::Started);
        assert_eq!(scheduler.start(probe.clone(), secs(60.0)), Toggle::AlreadyRunning);
        assert!(scheduler.is_running());
        assert_eq!(scheduler.stop(), Toggle::Stopped);
        assert_eq!(scheduler.stop(), Toggle::AlreadyStopped);
        assert_eq!(scheduler.start(probe, secs(60.0)), Toggle::Started);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_run_shares_the_gate() {
        let probe = Probe::new(secs(5.0));
        let scheduler = Scheduler::new(secs(2.0));

        let first = probe.clone();
        assert_eq!(scheduler.try_run(async move { first.run().await }), RunNow::Started);
        tokio::task::yield_now().await;

        let second = probe.clone();
        assert_eq!(scheduler.try_run(async move { second.run().await }), RunNow::Busy);

        // Ticks at 2s and 4s land while the manual run is in flight.
        scheduler.start(probe.clone(), secs(2.0));
        sleep(secs(4.5)).await;
        assert_eq!(probe.started(), 1);
        assert_eq!(probe.completed(), 0);

        // The manual run ends at 5s, so the 6s tick goes through.
        sleep(secs(2.0)).await;
        assert_eq!(probe.completed(), 1);
        assert_eq!(probe.started(), 2);
    }
}

//! Idle watchdog that reclaims the node when the GPU sits unused.
//!
//! Every tick takes one GPU memory sample. Samples below the memory threshold
//! extend the idle streak; anything else (including a failed read) resets it.
//! Once the streak reaches the tick threshold the watchdog asks the
//! [`NodeController`] to terminate the node, exactly once, and stops.

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::services::jobs::JobActivity;
use crate::services::node::NodeController;
use crate::services::telemetry::{GpuTelemetrySource, TelemetrySample};

/// Thresholds and cadence for the watchdog.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    /// GPU memory use strictly below this counts as idle.
    pub idle_threshold_mb: u64,
    /// Consecutive idle ticks that trigger termination.
    pub idle_threshold_ticks: u32,
    /// Time between samples.
    pub tick_period: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            idle_threshold_mb: 1000,
            idle_threshold_ticks: 30,
            tick_period: Duration::from_secs(60),
        }
    }
}

impl WatchdogConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            idle_threshold_mb: config.vram_idle_threshold_mb,
            idle_threshold_ticks: config.idle_threshold_minutes.max(1),
            tick_period: config.idle_tick(),
        }
    }
}

/// Idle accumulator. Only ever incremented by one or reset to zero.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IdleState {
    pub consecutive_idle_ticks: u32,
}

/// What a single tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still running; carries the idle streak after this tick.
    Continue { idle_ticks: u32 },
    /// Threshold reached and termination was requested on this tick.
    Terminated { acknowledged: bool },
    /// The watchdog already fired; nothing was sampled.
    Inactive,
}

/// Why [`IdleWatchdog::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogExit {
    /// Idle ticks accumulated when termination fired.
    pub idle_ticks: u32,
    /// Whether the node-control API accepted the terminate call.
    pub acknowledged: bool,
}

pub struct IdleWatchdog {
    telemetry: Arc<dyn GpuTelemetrySource>,
    controller: Arc<dyn NodeController>,
    activity: Option<JobActivity>,
    config: WatchdogConfig,
    state: IdleState,
    terminated: bool,
}

impl IdleWatchdog {
    pub fn new(
        telemetry: Arc<dyn GpuTelemetrySource>,
        controller: Arc<dyn NodeController>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            telemetry,
            controller,
            activity: None,
            config,
            state: IdleState::default(),
            terminated: false,
        }
    }

    /// Treat every tick with a job in flight as busy.
    pub fn with_job_activity(mut self, activity: JobActivity) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn state(&self) -> IdleState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Take one sample, update the idle streak and fire termination if due.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.terminated {
            return TickOutcome::Inactive;
        }

        let sample = self.telemetry.sample().await;
        let job_running = self.activity.as_ref().is_some_and(JobActivity::is_busy);

        if !job_running && sample.is_idle(self.config.idle_threshold_mb) {
            self.state.consecutive_idle_ticks += 1;
        } else {
            self.state.consecutive_idle_ticks = 0;
        }

        metrics::gauge!("watchdog_idle_ticks").set(f64::from(self.state.consecutive_idle_ticks));

        match sample {
            TelemetrySample::UsedMemoryMb(used_mb) => tracing::debug!(
                used_mb,
                job_running,
                idle_ticks = self.state.consecutive_idle_ticks,
                "GPU sample"
            ),
            TelemetrySample::Unavailable => tracing::debug!(
                job_running,
                idle_ticks = self.state.consecutive_idle_ticks,
                "GPU sample unavailable, counted as busy"
            ),
        }

        if self.state.consecutive_idle_ticks < self.config.idle_threshold_ticks {
            return TickOutcome::Continue {
                idle_ticks: self.state.consecutive_idle_ticks,
            };
        }

        self.terminated = true;
        tracing::warn!(
            idle_ticks = self.state.consecutive_idle_ticks,
            threshold_mb = self.config.idle_threshold_mb,
            "Idle threshold reached, terminating node"
        );

        // At most once: a failed call is logged and never retried.
        let acknowledged = match self.controller.terminate().await {
            Ok(()) => {
                tracing::info!("Node termination requested");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Node termination call failed");
                false
            }
        };
        metrics::counter!("watchdog_terminations_total").increment(1);

        TickOutcome::Terminated { acknowledged }
    }

    /// Tick on the configured period until termination fires.
    pub async fn run(mut self) -> WatchdogExit {
        tracing::info!(
            idle_threshold_mb = self.config.idle_threshold_mb,
            idle_threshold_ticks = self.config.idle_threshold_ticks,
            tick_secs = self.config.tick_period.as_secs_f64(),
            "Idle watchdog started"
        );

        loop {
            match self.tick().await {
                TickOutcome::Continue { .. } => tokio::time::sleep(self.config.tick_period).await,
                TickOutcome::Terminated { acknowledged } => {
                    return WatchdogExit {
                        idle_ticks: self.state.consecutive_idle_ticks,
                        acknowledged,
                    };
                }
                TickOutcome::Inactive => {
                    return WatchdogExit {
                        idle_ticks: self.state.consecutive_idle_ticks,
                        acknowledged: false,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::node::NodeError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed list of samples, then reports `Unavailable`.
    struct ScriptedTelemetry {
        samples: Mutex<VecDeque<TelemetrySample>>,
    }

    impl ScriptedTelemetry {
        fn mb(values: &[u64]) -> Arc<Self> {
            Self::new(values.iter().map(|&v| TelemetrySample::UsedMemoryMb(v)).collect())
        }

        fn new(samples: Vec<TelemetrySample>) -> Arc<Self> {
            Arc::new(Self {
                samples: Mutex::new(samples.into()),
            })
        }
    }

    #[async_trait]
    impl GpuTelemetrySource for ScriptedTelemetry {
        async fn sample(&self) -> TelemetrySample {
            self.samples
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(TelemetrySample::Unavailable)
        }
    }

    #[derive(Default)]
    struct CountingController {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl NodeController for CountingController {
        async fn terminate(&self) -> Result<(), NodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NodeError::NotConfigured)
            } else {
                Ok(())
            }
        }
    }

    fn config(ticks: u32) -> WatchdogConfig {
        WatchdogConfig {
            idle_threshold_mb: 1000,
            idle_threshold_ticks: ticks,
            tick_period: Duration::from_millis(1),
        }
    }

    /// Tick once per scripted sample, recording the idle counter after each.
    async fn drive(watchdog: &mut IdleWatchdog, n: usize) -> (Vec<u32>, Option<usize>) {
        let mut counters = Vec::new();
        let mut fired_at = None;
        for i in 0..n {
            match watchdog.tick().await {
                TickOutcome::Continue { idle_ticks } => counters.push(idle_ticks),
                TickOutcome::Terminated { .. } => {
                    counters.push(watchdog.state().consecutive_idle_ticks);
                    fired_at = Some(i + 1);
                }
                TickOutcome::Inactive => break,
            }
        }
        (counters, fired_at)
    }

    #[tokio::test]
    async fn test_steady_descent_terminates_on_fourth_sample() {
        let controller = Arc::new(CountingController::default());
        let mut watchdog = IdleWatchdog::new(
            ScriptedTelemetry::mb(&[1200, 800, 400, 300]),
            controller.clone(),
            config(3),
        );

        let (counters, fired_at) = drive(&mut watchdog, 4).await;

        assert_eq!(counters, vec![0, 1, 2, 3]);
        assert_eq!(fired_at, Some(4));
        assert_eq!(controller.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_busy_sample_resets_streak() {
        let controller = Arc::new(CountingController::default());
        let mut watchdog = IdleWatchdog::new(
            ScriptedTelemetry::mb(&[400, 1500, 400, 400, 400]),
            controller.clone(),
            config(3),
        );

        let (counters, fired_at) = drive(&mut watchdog, 5).await;

        assert_eq!(counters, vec![1, 0, 1, 2, 3]);
        assert_eq!(fired_at, Some(5));
        assert_eq!(controller.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sample_at_threshold_is_busy() {
        let controller = Arc::new(CountingController::default());
        let mut watchdog = IdleWatchdog::new(
            ScriptedTelemetry::mb(&[999, 1000, 999]),
            controller.clone(),
            config(2),
        );

        let (counters, fired_at) = drive(&mut watchdog, 3).await;

        assert_eq!(counters, vec![1, 0, 1]);
        assert_eq!(fired_at, None);
        assert_eq!(controller.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_telemetry_failure_counts_as_busy() {
        let controller = Arc::new(CountingController::default());
        let mut with_failure = IdleWatchdog::new(
            ScriptedTelemetry::new(vec![
                TelemetrySample::UsedMemoryMb(100),
                TelemetrySample::UsedMemoryMb(100),
                TelemetrySample::Unavailable,
                TelemetrySample::UsedMemoryMb(100),
            ]),
            controller.clone(),
            config(3),
        );
        let mut with_busy = IdleWatchdog::new(
            ScriptedTelemetry::mb(&[100, 100, 5000, 100]),
            Arc::new(CountingController::default()),
            config(3),
        );

        let (failure_counters, failure_fired) = drive(&mut with_failure, 4).await;
        let (busy_counters, busy_fired) = drive(&mut with_busy, 4).await;

        assert_eq!(failure_counters, vec![1, 2, 0, 1]);
        assert_eq!(failure_counters, busy_counters);
        assert_eq!(failure_fired, busy_fired);
        assert_eq!(controller.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fires_at_most_once() {
        let controller = Arc::new(CountingController::default());
        let mut watchdog = IdleWatchdog::new(
            ScriptedTelemetry::mb(&[0, 0, 0, 0, 0]),
            controller.clone(),
            config(1),
        );

        assert_eq!(
            watchdog.tick().await,
            TickOutcome::Terminated { acknowledged: true }
        );
        assert_eq!(watchdog.tick().await, TickOutcome::Inactive);
        assert_eq!(watchdog.tick().await, TickOutcome::Inactive);
        assert!(watchdog.is_terminated());
        assert_eq!(controller.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_terminate_not_retried() {
        let controller = Arc::new(CountingController {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let watchdog = IdleWatchdog::new(
            ScriptedTelemetry::mb(&[10, 10]),
            controller.clone(),
            config(2),
        );

        let exit = watchdog.run().await;

        assert_eq!(
            exit,
            WatchdogExit {
                idle_ticks: 2,
                acknowledged: false
            }
        );
        assert_eq!(controller.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_running_job_suppresses_idle() {
        let controller = Arc::new(CountingController::default());
        let activity = JobActivity::default();
        let mut watchdog = IdleWatchdog::new(
            ScriptedTelemetry::mb(&[10, 10, 10, 10]),
            controller.clone(),
            config(2),
        )
        .with_job_activity(activity.clone());

        assert_eq!(watchdog.tick().await, TickOutcome::Continue { idle_ticks: 1 });
        {
            let _guard = activity.begin();
            assert_eq!(watchdog.tick().await, TickOutcome::Continue { idle_ticks: 0 });
            assert_eq!(watchdog.tick().await, TickOutcome::Continue { idle_ticks: 0 });
        }
        assert_eq!(watchdog.tick().await, TickOutcome::Continue { idle_ticks: 1 });
        assert_eq!(controller.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_exits_after_termination() {
        let controller = Arc::new(CountingController::default());
        let watchdog = IdleWatchdog::new(
            ScriptedTelemetry::mb(&[2000, 10, 10, 10]),
            controller.clone(),
            config(3),
        );

        let exit = tokio::time::timeout(Duration::from_secs(5), watchdog.run())
            .await
            .expect("watchdog should terminate");

        assert!(exit.acknowledged);
        assert_eq!(exit.idle_ticks, 3);
        assert_eq!(controller.calls.load(Ordering::SeqCst), 1);
    }
}

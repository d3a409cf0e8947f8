//! Contention Probe
//!
//! Estimates the fraction of wall time spent waiting on the global execution
//! lock. A background thread "knocks" on the lock at a fixed interval and
//! accumulates how long each acquisition blocked; the ratio of waited time to
//! elapsed time is the contention fraction.
//!
//! Strategies without a shared lock get [`NoopProbe`], which reports nothing.
//! The choice is made once per run by [`select_probe`].

use crate::lock::ExecutionLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default sampling interval (1000 microseconds)
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_micros(1_000);

/// Sampler of shared-lock contention for the duration of one `map` call.
pub trait ContentionProbe: Send {
    /// Begin sampling.
    fn start(&mut self);

    /// Stop sampling and return the contention fraction in `[0, 1]`, or `None`
    /// when the probe does not apply.
    fn stop(&mut self) -> Option<f64>;
}

/// Probe for strategies with no shared execution lock.
#[derive(Debug, Default)]
pub struct NoopProbe;

impl ContentionProbe for NoopProbe {
    fn start(&mut self) {}

    fn stop(&mut self) -> Option<f64> {
        None
    }
}

/// Periodically acquires the execution lock and measures the wait.
pub struct KnockerProbe {
    lock: Arc<ExecutionLock>,
    interval: Duration,
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<f64>>,
}

impl KnockerProbe {
    /// Probe `lock` every `interval`.
    pub fn new(lock: Arc<ExecutionLock>, interval: Duration) -> Self {
        Self {
            lock,
            interval,
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    fn knock(lock: &ExecutionLock, interval: Duration, stop_flag: &AtomicBool) -> f64 {
        let started = Instant::now();
        let mut waited = Duration::ZERO;

        while !stop_flag.load(Ordering::Acquire) {
            let before = Instant::now();
            let guard = lock.acquire();
            waited += before.elapsed();
            drop(guard);
            std::thread::sleep(interval);
        }

        let total = started.elapsed().as_secs_f64();
        if total > 0.0 {
            (waited.as_secs_f64() / total).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

impl ContentionProbe for KnockerProbe {
    fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.stop_flag.store(false, Ordering::Release);
        let lock = Arc::clone(&self.lock);
        let stop_flag = Arc::clone(&self.stop_flag);
        let interval = self.interval;

        let spawned = std::thread::Builder::new()
            .name("poolbench-knocker".to_string())
            .spawn(move || Self::knock(&lock, interval, &stop_flag));
        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => tracing::warn!(error = %e, "failed to start contention probe"),
        }
    }

    fn stop(&mut self) -> Option<f64> {
        let handle = self.handle.take()?;
        self.stop_flag.store(true, Ordering::Release);
        match handle.join() {
            Ok(fraction) => Some(fraction),
            Err(_) => {
                tracing::warn!("contention probe thread panicked");
                None
            }
        }
    }
}

impl Drop for KnockerProbe {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Pick the probe for a strategy: a knocker when it exposes a shared lock,
/// otherwise the no-op probe.
pub fn select_probe(
    lock: Option<Arc<ExecutionLock>>,
    interval: Duration,
) -> Box<dyn ContentionProbe> {
    match lock {
        Some(lock) => Box::new(KnockerProbe::new(lock, interval)),
        None => Box::new(NoopProbe),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_probe_reports_nothing() {
        let mut probe = select_probe(None, DEFAULT_PROBE_INTERVAL);
        probe.start();
        assert_eq!(probe.stop(), None);
    }

    #[test]
    fn test_stop_without_start() {
        let mut probe = KnockerProbe::new(Arc::new(ExecutionLock::new()), DEFAULT_PROBE_INTERVAL);
        assert_eq!(probe.stop(), None);
    }

    #[test]
    fn test_uncontended_lock_reads_low() {
        let mut probe = KnockerProbe::new(Arc::new(ExecutionLock::new()), DEFAULT_PROBE_INTERVAL);
        probe.start();
        std::thread::sleep(Duration::from_millis(30));
        let fraction = probe.stop().unwrap();
        assert!((0.0..0.5).contains(&fraction), "fraction = {fraction}");
    }

    #[test]
    fn test_held_lock_reads_high() {
        let lock = Arc::new(ExecutionLock::new());
        let mut probe = select_probe(Some(Arc::clone(&lock)), DEFAULT_PROBE_INTERVAL);

        let guard = lock.acquire();
        probe.start();
        std::thread::sleep(Duration::from_millis(100));
        drop(guard);

        let fraction = probe.stop().unwrap();
        assert!(fraction > 0.5 && fraction <= 1.0, "fraction = {fraction}");
    }
}

//! Asynchronous reflection scheduling.
//!
//! The synchronous path hands jobs to a dedicated worker over a channel and
//! returns immediately. The worker applies the scheduling policy: urgent
//! jobs (escalated or exhausted) are reflected at once, routine jobs follow
//! immediate, batched or sampled scheduling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Result, VigilError};
use crate::reflect::{ReflectionEngine, ReflectionJob, ReflectionPolicy};
use crate::util::stable_fraction;

enum Command {
    Reflect(Box<ReflectionJob>),
    Flush(SyncSender<()>),
    Shutdown,
}

/// Counters shared with the worker.
#[derive(Debug, Default)]
struct Counters {
    reflected: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

/// Queue handoff to a background reflection worker.
pub struct ReflectionScheduler {
    tx: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    policy: ReflectionPolicy,
    counters: Arc<Counters>,
}

impl ReflectionScheduler {
    /// Start the worker thread.
    pub fn start(engine: ReflectionEngine, policy: ReflectionPolicy) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let counters = Arc::new(Counters::default());
        let worker_counters = Arc::clone(&counters);

        let worker = thread::Builder::new()
            .name("vigil-reflection".to_string())
            .spawn(move || run_worker(engine, policy, rx, worker_counters))
            .map_err(|e| {
                VigilError::invalid_state(format!("failed to spawn reflection worker: {}", e))
            })?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            policy,
            counters,
        })
    }

    pub fn policy(&self) -> ReflectionPolicy {
        self.policy
    }

    /// Hand a job to the worker. Returns whether it was accepted.
    ///
    /// Jobs for interactions that never completed or escalated are dropped,
    /// as are routine jobs outside the sample under the sampled policy.
    pub fn submit(&self, job: ReflectionJob) -> bool {
        if !job.status.is_reflectable() {
            tracing::debug!(
                interaction_id = %job.interaction_id,
                "skipping reflection for {} interaction",
                job.status
            );
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if let ReflectionPolicy::Sampled { rate } = self.policy {
            if !job.is_urgent() && stable_fraction(&job.interaction_id) >= rate {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.send(Command::Reflect(Box::new(job))) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!("reflection worker is gone, dropping job");
                false
            }
        }
    }

    /// Process everything queued, waiting at most `timeout`.
    ///
    /// Returns false if the worker did not finish in time.
    pub fn flush(&self, timeout: Duration) -> bool {
        let Some(tx) = &self.tx else {
            return true;
        };
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        if tx.send(Command::Flush(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }

    /// Jobs reflected successfully so far.
    pub fn reflected(&self) -> usize {
        self.counters.reflected.load(Ordering::Relaxed)
    }

    /// Jobs whose reflection failed.
    pub fn failed(&self) -> usize {
        self.counters.failed.load(Ordering::Relaxed)
    }

    /// Jobs dropped by status or sampling.
    pub fn skipped(&self) -> usize {
        self.counters.skipped.load(Ordering::Relaxed)
    }

    /// Drain the queue and stop the worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Command::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("reflection worker panicked");
            }
        }
    }
}

impl Drop for ReflectionScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(
    engine: ReflectionEngine,
    policy: ReflectionPolicy,
    rx: Receiver<Command>,
    counters: Arc<Counters>,
) {
    let mut pending: Vec<ReflectionJob> = Vec::new();
    let reflect = |job: &ReflectionJob| match engine.reflect(job) {
        Ok(_) => {
            counters.reflected.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                interaction_id = %job.interaction_id,
                "reflection failed: {}",
                e
            );
        }
    };

    // A closed channel counts as shutdown
    while let Ok(command) = rx.recv() {
        match command {
            Command::Reflect(job) => match policy {
                ReflectionPolicy::Batched { batch_size } if !job.is_urgent() => {
                    pending.push(*job);
                    if pending.len() >= batch_size {
                        tracing::debug!("reflecting batch of {}", pending.len());
                        pending.drain(..).for_each(|j| reflect(&j));
                    }
                }
                _ => reflect(job.as_ref()),
            },
            Command::Flush(ack) => {
                pending.drain(..).for_each(|j| reflect(&j));
                let _ = ack.send(());
            }
            Command::Shutdown => break,
        }
    }

    pending.drain(..).for_each(|j| reflect(&j));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationStore, MemoryCalibrationStore};
    use crate::config::ReflectionConfig;
    use crate::core::InteractionStatus;
    use crate::reflect::engine::test_support::job;
    use crate::reflect::ReflectionLog;
    use tempfile::TempDir;

    fn scheduler(
        temp: &TempDir,
        policy: ReflectionPolicy,
    ) -> (ReflectionScheduler, Arc<ReflectionLog>, Arc<MemoryCalibrationStore>) {
        let store = Arc::new(MemoryCalibrationStore::default());
        let log = Arc::new(ReflectionLog::new(temp.path().join("reflections.jsonl")));
        let engine = ReflectionEngine::new(store.clone(), log.clone(), ReflectionConfig::default());
        (ReflectionScheduler::start(engine, policy).unwrap(), log, store)
    }

    #[test]
    fn test_immediate_policy() {
        let temp = TempDir::new().unwrap();
        let (s, log, store) = scheduler(&temp, ReflectionPolicy::Immediate);

        assert!(s.submit(job("a", "general", 0.8, "answer")));
        assert!(s.flush(Duration::from_secs(5)));
        assert_eq!(s.reflected(), 1);
        assert_eq!(log.count().unwrap(), 1);
        assert_eq!(store.sample_count("general").unwrap(), 1);
    }

    #[test]
    fn test_deferred_never_reflected() {
        let temp = TempDir::new().unwrap();
        let (s, log, _) = scheduler(&temp, ReflectionPolicy::Immediate);

        let mut j = job("a", "general", 0.8, "answer");
        j.status = InteractionStatus::Deferred;
        assert!(!s.submit(j));
        assert!(s.flush(Duration::from_secs(5)));
        assert_eq!(s.skipped(), 1);
        assert_eq!(log.count().unwrap(), 0);
    }

    #[test]
    fn test_batched_waits_for_batch_or_flush() {
        let temp = TempDir::new().unwrap();
        let (s, log, _) = scheduler(&temp, ReflectionPolicy::Batched { batch_size: 3 });

        s.submit(job("a", "general", 0.8, "answer"));
        s.submit(job("b", "general", 0.8, "answer"));

        // An urgent job jumps the batch
        let mut urgent = job("c", "general", 0.4, "answer");
        urgent.status = InteractionStatus::Escalated;
        s.submit(urgent);

        // Flush acknowledges only after draining the queue in order
        assert!(s.flush(Duration::from_secs(5)));
        let ids: Vec<String> = log
            .recent(10)
            .unwrap()
            .into_iter()
            .map(|r| r.interaction_id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_sampled_policy_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let (s, _, _) = scheduler(&temp, ReflectionPolicy::Sampled { rate: 0.0 });

        assert!(!s.submit(job("routine", "general", 0.8, "answer")));
        let mut exhausted = job("urgent", "general", 0.4, "answer");
        exhausted.exhausted = true;
        assert!(s.submit(exhausted));

        let (all, _, _) = scheduler(&temp, ReflectionPolicy::Sampled { rate: 1.0 });
        assert!(all.submit(job("routine", "general", 0.8, "answer")));
    }

    #[test]
    fn test_shutdown_drains_pending() {
        let temp = TempDir::new().unwrap();
        let (s, log, _) = scheduler(&temp, ReflectionPolicy::Batched { batch_size: 10 });
        s.submit(job("a", "general", 0.8, "answer"));
        s.shutdown();
        assert_eq!(log.count().unwrap(), 1);
    }
}

//! Contention scenario: N workers race for one resource and each holds it briefly.

use std::fmt;
use std::time::{Duration, Instant};

use futures::future::join_all;
use zoolock_client::{LockClient, LockError, LockOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioConfig {
    pub workers: usize,
    pub resource: String,
    /// How long each worker holds the lock before releasing
    pub hold: Duration,
}

#[derive(Debug)]
pub enum Outcome {
    Acquired { sequence: u64, waited: Duration },
    Rejected,
    TimedOut,
    Failed(LockError),
}

#[derive(Debug)]
pub struct WorkerReport {
    pub worker: usize,
    pub outcome: Outcome,
}

impl fmt::Display for WorkerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Acquired { sequence, waited } => write!(
                f,
                "worker {:>3}: acquired sequence {} after {:?}",
                self.worker, sequence, waited
            ),
            Outcome::Rejected => write!(f, "worker {:>3}: rejected by admission limit", self.worker),
            Outcome::TimedOut => write!(f, "worker {:>3}: timed out", self.worker),
            Outcome::Failed(e) => write!(f, "worker {:>3}: failed: {}", self.worker, e),
        }
    }
}

async fn work(client: LockClient, worker: usize, resource: String, hold: Duration) -> WorkerReport {
    let started = Instant::now();
    let outcome = match client.lock(&resource, LockOptions::new()).await {
        Ok(handle) => {
            let waited = started.elapsed();
            tracing::info!(worker, sequence = handle.sequence(), "holding {}", handle.path());
            tokio::time::sleep(hold).await;
            match handle.release().await {
                Ok(()) => Outcome::Acquired {
                    sequence: handle.sequence(),
                    waited,
                },
                Err(e) => Outcome::Failed(e),
            }
        }
        Err(e) if e.is_admission_rejected() => Outcome::Rejected,
        Err(e) if e.is_timeout() => Outcome::TimedOut,
        Err(e) => Outcome::Failed(e),
    };
    WorkerReport { worker, outcome }
}

/// Run the scenario. Reports come back with acquisitions first, in acquisition
/// order, followed by the workers that never got the lock.
pub async fn run(client: &LockClient, scenario: &ScenarioConfig) -> anyhow::Result<Vec<WorkerReport>> {
    let tasks = (0..scenario.workers).map(|worker| {
        tokio::spawn(work(
            client.clone(),
            worker,
            scenario.resource.clone(),
            scenario.hold,
        ))
    });

    let mut reports = Vec::with_capacity(scenario.workers);
    for joined in join_all(tasks).await {
        reports.push(joined?);
    }

    reports.sort_by_key(|report| match report.outcome {
        Outcome::Acquired { sequence, .. } => (0, sequence),
        _ => (1, report.worker as u64),
    });
    Ok(reports)
}

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{Local, NaiveDateTime, TimeZone};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;

use super::cron::CronExpr;

/// Identity of a recurring job: one per (feed URL, subscriber) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey {
    pub url: String,
    pub subscriber: String,
}

impl JobKey {
    pub fn new(url: impl Into<String>, subscriber: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subscriber: subscriber.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for {}", self.url, self.subscriber)
    }
}

/// Set once the job a firing belongs to has been cancelled or replaced.
///
/// A firing checks this before every side effect; once set, nothing more may
/// be delivered or committed for that firing.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// The work run on every firing.
pub type FireFn = Arc<dyn Fn(JobKey, CancelToken) -> BoxFuture<'static, ()> + Send + Sync>;

/// Owns one recurring job per [`JobKey`].
pub trait JobScheduler: Send + Sync {
    /// Register `job` to run at every occurrence of `cron`.
    ///
    /// An existing job with the same key is replaced, not duplicated.
    fn schedule(&self, key: JobKey, cron: CronExpr, job: FireFn);

    /// Remove a job. Returns `false` if no job had that key.
    fn cancel(&self, key: &JobKey) -> bool;

    /// Keys of all registered jobs, sorted.
    fn scheduled(&self) -> Vec<JobKey>;
}

// ============================================================================
// Tokio Scheduler
// ============================================================================

/// Closed while a firing for one key is in progress.
#[derive(Debug, Clone, Default)]
struct FiringGate(Arc<AtomicBool>);

impl FiringGate {
    fn try_enter(&self) -> Option<FiringPermit> {
        if self.0.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(FiringPermit(self.0.clone()))
        }
    }
}

/// Reopens the gate when dropped, including when the firing panics.
struct FiringPermit(Arc<AtomicBool>);

impl Drop for FiringPermit {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct JobEntry {
    timer: JoinHandle<()>,
    cancel: CancelToken,
    gate: FiringGate,
}

/// [`JobScheduler`] running one timer task per job on the tokio runtime.
///
/// Cron times are evaluated in the local timezone. A firing whose previous
/// run for the same key is still in progress is skipped, not queued.
#[derive(Default)]
pub struct TokioScheduler {
    jobs: Mutex<HashMap<JobKey, JobEntry>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every job.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, entry) in jobs.drain() {
            entry.cancel.cancel();
            entry.timer.abort();
        }
    }
}

impl JobScheduler for TokioScheduler {
    fn schedule(&self, key: JobKey, cron: CronExpr, job: FireFn) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);

        // Share the gate with the replaced job so its in-flight firing still
        // blocks the new one
        let gate = match jobs.remove(&key) {
            Some(old) => {
                old.cancel.cancel();
                old.timer.abort();
                tracing::debug!(url = %key.url, subscriber = %key.subscriber, "Replacing scheduled job");
                old.gate
            }
            None => FiringGate::default(),
        };

        let cancel = CancelToken::new();
        tracing::info!(
            url = %key.url,
            subscriber = %key.subscriber,
            cron = %cron,
            "Scheduled feed job"
        );
        let timer = tokio::spawn(run_timer(
            key.clone(),
            cron,
            job,
            cancel.clone(),
            gate.clone(),
        ));

        jobs.insert(
            key,
            JobEntry {
                timer,
                cancel,
                gate,
            },
        );
    }

    fn cancel(&self, key: &JobKey) -> bool {
        let entry = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);

        match entry {
            Some(entry) => {
                entry.cancel.cancel();
                entry.timer.abort();
                tracing::info!(url = %key.url, subscriber = %key.subscriber, "Cancelled feed job");
                true
            }
            None => false,
        }
    }

    fn scheduled(&self) -> Vec<JobKey> {
        let mut keys: Vec<_> = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_timer(key: JobKey, cron: CronExpr, job: FireFn, cancel: CancelToken, gate: FiringGate) {
    let mut last = Local::now().naive_local();

    loop {
        let Some(next) = cron.next_after(last) else {
            tracing::warn!(url = %key.url, subscriber = %key.subscriber, cron = %cron, "Cron expression has no future occurrence");
            return;
        };
        let Some(delay) = delay_until(next) else {
            // Local time that does not exist (DST gap)
            last = next;
            continue;
        };

        tokio::time::sleep(delay).await;
        last = next.max(Local::now().naive_local());

        if cancel.is_cancelled() {
            return;
        }

        let Some(permit) = gate.try_enter() else {
            tracing::warn!(
                url = %key.url,
                subscriber = %key.subscriber,
                "Previous firing still running, skipping this one"
            );
            continue;
        };

        let firing = job(key.clone(), cancel.clone());
        let key = key.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(panic_msg) = catch_task_panic(firing).await {
                tracing::error!(
                    url = %key.url,
                    subscriber = %key.subscriber,
                    error = %panic_msg,
                    "Feed job panicked"
                );
            }
        });
    }
}

fn delay_until(next: NaiveDateTime) -> Option<Duration> {
    let at = Local.from_local_datetime(&next).earliest()?;
    Some((at - Local::now()).to_std().unwrap_or(Duration::ZERO))
}

/// Wraps a future to catch panics and convert them to errors.
async fn catch_task_panic<F, T>(future: F) -> Result<T, String>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|panic| {
            if let Some(s) = panic.downcast_ref::<&'static str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                format!("Unknown panic: {:?}", (*panic).type_id())
            }
        })
}

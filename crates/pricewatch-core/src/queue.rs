use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use crate::job::{EnqueueResult, Job, JobPriority};

/// In-process work queue with fingerprint deduplication and priority
/// ("jump to front") insertion.
///
/// Urgent jobs are pushed to the front, so the queue behaves as a stack for
/// urgent work and FIFO for background work. This is deliberate: urgent
/// user-facing requests preempt a large backlog, at the cost of any global
/// submission-order fairness between the two classes.
///
/// Fingerprints are tracked for the process lifetime: once a fingerprint has
/// been enqueued it will never be accepted again, whether the job is still
/// pending, in flight, or long completed. Callers that need re-execution
/// mint a forced fingerprint instead.
#[derive(Debug, Default)]
pub struct WorkQueue {
    inner: Mutex<QueueInner>,
}

#[derive(Debug, Default)]
struct QueueInner {
    jobs: VecDeque<Job>,
    /// Every fingerprint ever accepted (pending, running, or done).
    seen: HashSet<String>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job unless its fingerprint was already seen.
    pub fn enqueue(&self, job: Job) -> EnqueueResult {
        let mut inner = self.inner.lock().expect("work queue lock poisoned");

        if inner.seen.contains(&job.fingerprint) {
            tracing::debug!(fingerprint = %job.fingerprint, "Enqueue deduplicated");
            return EnqueueResult {
                already_handled: true,
            };
        }

        inner.seen.insert(job.fingerprint.clone());
        match job.priority {
            JobPriority::Urgent => inner.jobs.push_front(job),
            JobPriority::Normal => inner.jobs.push_back(job),
        }

        EnqueueResult {
            already_handled: false,
        }
    }

    /// Claim the next job. The singleton loop is the only consumer, so no
    /// claim bookkeeping beyond removal is needed.
    pub fn pop(&self) -> Option<Job> {
        self.inner
            .lock()
            .expect("work queue lock poisoned")
            .jobs
            .pop_front()
    }

    /// Remove and return every queued job. Used on loop crash to reject
    /// the pending results of jobs that will never be dispatched.
    pub fn drain(&self) -> Vec<Job> {
        self.inner
            .lock()
            .expect("work queue lock poisoned")
            .jobs
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("work queue lock poisoned").jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

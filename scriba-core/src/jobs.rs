//! Process-wide admission control for transcription work.
//!
//! At most one transcription job exists at any instant, across every entry
//! point (WebSocket sessions and HTTP uploads). Cancellation is cooperative:
//! `cancel` only raises a flag on the active job's [`CancelToken`]; the
//! running engine observes it at its next poll point and returns early.
//! There is no hard-kill of in-flight GPU work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

/// Cooperative cancellation flag handed to engines alongside the audio.
///
/// Engines must poll [`is_cancelled`](CancelToken::is_cancelled) at natural
/// granularity boundaries — per segment at minimum — and stop producing
/// output once it reads true.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of [`JobTracker::try_start`].
#[derive(Debug, Clone)]
pub enum Admission {
    /// The caller now holds the single job slot.
    Granted(JobGrant),
    /// Another transcription is running; the slot stays with `active_user`.
    Busy { active_user: String },
}

/// Proof of admission: the job id to pass back to [`JobTracker::end`] and
/// the cancellation token to thread into the engine call.
#[derive(Debug, Clone)]
pub struct JobGrant {
    pub job_id: Uuid,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct JobStatus {
    pub busy: bool,
    pub active_user: Option<String>,
    pub active_job_id: Option<String>,
    pub cancellation_requested: bool,
}

struct ActiveJob {
    id: Uuid,
    user: String,
    started_at: Instant,
    cancel: CancelToken,
}

/// Tracks the single active transcription job.
#[derive(Default)]
pub struct JobTracker {
    active: Mutex<Option<ActiveJob>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the job slot for `user`.
    pub fn try_start(&self, user: &str) -> Admission {
        let mut active = self.active.lock();
        if let Some(job) = active.as_ref() {
            return Admission::Busy {
                active_user: job.user.clone(),
            };
        }

        let id = Uuid::new_v4();
        let cancel = CancelToken::new();
        *active = Some(ActiveJob {
            id,
            user: user.to_string(),
            started_at: Instant::now(),
            cancel: cancel.clone(),
        });
        info!(job_id = %id, user, "transcription job started");
        Admission::Granted(JobGrant { job_id: id, cancel })
    }

    /// Release the slot. A stale id (already ended or cancelled-and-replaced)
    /// is a silent no-op; returns whether the slot was actually released.
    pub fn end(&self, job_id: Uuid) -> bool {
        let mut active = self.active.lock();
        match active.as_ref() {
            Some(job) if job.id == job_id => {
                info!(
                    job_id = %job_id,
                    user = job.user.as_str(),
                    elapsed_ms = job.started_at.elapsed().as_millis() as u64,
                    "transcription job ended"
                );
                *active = None;
                true
            }
            _ => {
                debug!(job_id = %job_id, "stale job end ignored");
                false
            }
        }
    }

    /// Request cancellation of the active job. Returns the user whose job
    /// was cancelled, or `None` if no job was running.
    pub fn cancel(&self) -> Option<String> {
        let active = self.active.lock();
        active.as_ref().map(|job| {
            job.cancel.cancel();
            info!(job_id = %job.id, user = job.user.as_str(), "cancellation requested");
            job.user.clone()
        })
    }

    /// Whether cancellation has been requested for the active job.
    pub fn is_cancelled(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .map(|job| job.cancel.is_cancelled())
            .unwrap_or(false)
    }

    pub fn status(&self) -> JobStatus {
        let active = self.active.lock();
        match active.as_ref() {
            Some(job) => JobStatus {
                busy: true,
                active_user: Some(job.user.clone()),
                active_job_id: Some(job.id.to_string()),
                cancellation_requested: job.cancel.is_cancelled(),
            },
            None => JobStatus::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn only_one_start_succeeds() {
        let tracker = JobTracker::new();
        let grant = match tracker.try_start("alice") {
            Admission::Granted(g) => g,
            Admission::Busy { .. } => panic!("first start must succeed"),
        };

        match tracker.try_start("bob") {
            Admission::Busy { active_user } => assert_eq!(active_user, "alice"),
            Admission::Granted(_) => panic!("second start must be rejected"),
        }

        assert!(tracker.end(grant.job_id));
        assert!(matches!(tracker.try_start("bob"), Admission::Granted(_)));
    }

    #[test]
    fn stale_end_is_a_no_op() {
        let tracker = JobTracker::new();
        let grant = match tracker.try_start("alice") {
            Admission::Granted(g) => g,
            _ => unreachable!(),
        };

        assert!(!tracker.end(Uuid::new_v4()));
        assert!(tracker.status().busy);
        assert!(tracker.end(grant.job_id));
        // Double-end of the same id is also a no-op.
        assert!(!tracker.end(grant.job_id));
    }

    #[test]
    fn cancel_sets_the_token_and_reports_the_user() {
        let tracker = JobTracker::new();
        let grant = match tracker.try_start("alice") {
            Admission::Granted(g) => g,
            _ => unreachable!(),
        };

        assert!(!grant.cancel.is_cancelled());
        assert_eq!(tracker.cancel().as_deref(), Some("alice"));
        assert!(grant.cancel.is_cancelled());
        assert!(tracker.is_cancelled());
        assert!(tracker.status().cancellation_requested);

        tracker.end(grant.job_id);
        assert_eq!(tracker.cancel(), None);
        assert!(!tracker.is_cancelled());
    }

    #[test]
    fn concurrent_starts_admit_at_most_one() {
        // Admission safety: successful starts minus matching ends is always
        // in {0, 1}, under N concurrent claimants.
        let tracker = Arc::new(JobTracker::new());
        let admitted = Arc::new(AtomicUsize::new(0));

        for _round in 0..50 {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let tracker = Arc::clone(&tracker);
                    let admitted = Arc::clone(&admitted);
                    thread::spawn(move || {
                        if let Admission::Granted(grant) = tracker.try_start(&format!("user-{i}")) {
                            let now = admitted.fetch_add(1, Ordering::SeqCst) + 1;
                            assert_eq!(now, 1, "two jobs admitted concurrently");
                            admitted.fetch_sub(1, Ordering::SeqCst);
                            assert!(tracker.end(grant.job_id));
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
            assert!(!tracker.status().busy);
        }
    }
}

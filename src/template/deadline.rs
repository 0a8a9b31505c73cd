//! Deadline-bounded template execution
//!
//! A job runs on its own worker thread. When the deadline passes first the
//! job's cancellation token is set and the caller gets `DeadlineExceeded`;
//! the worker notices the token at its next check and exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::warn;

use super::TemplateError;

/// Cooperative cancellation flag shared with a running job
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token is set
    pub fn check(&self) -> Result<(), TemplateError> {
        if self.is_cancelled() {
            Err(TemplateError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Run `job` on a worker thread, giving up after `timeout`
pub fn run_with_deadline<T, F>(name: &str, timeout: Duration, job: F) -> Result<T, TemplateError>
where
    T: Send + 'static,
    F: FnOnce(CancellationToken) -> Result<T, TemplateError> + Send + 'static,
{
    let token = CancellationToken::new();
    let worker_token = token.clone();
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name(format!("templater-{}", name))
        .spawn(move || {
            // The receiver is gone after a timeout; the result is dropped then.
            let _ = tx.send(job(worker_token));
        })
        .map_err(|e| TemplateError::Worker(e.to_string()))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            token.cancel();
            warn!(template = name, ?timeout, "template execution exceeded its deadline");
            Err(TemplateError::DeadlineExceeded(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => Err(TemplateError::Worker(format!(
            "worker for {} stopped without a result",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_result_within_deadline() {
        let result = run_with_deadline("quick", Duration::from_secs(5), |_| Ok(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_deadline_cancels_job() {
        let observed = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&observed);

        let result: Result<(), _> = run_with_deadline("slow", Duration::from_millis(50), move |token| {
            while !token.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            seen.store(true, Ordering::SeqCst);
            token.check()
        });
        assert!(matches!(result, Err(TemplateError::DeadlineExceeded(_))));

        let started = Instant::now();
        while !observed.load(Ordering::SeqCst) && started.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(observed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_panicking_job_is_a_worker_error() {
        let result: Result<(), _> =
            run_with_deadline("panics", Duration::from_secs(5), |_| panic!("template engine bug"));
        assert!(matches!(result, Err(TemplateError::Worker(_))));
    }
}

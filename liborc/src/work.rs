//! The task fan-out. Stage 1 runs inside a single rayon scope: tasks may transitively submit
//! more tasks, and the scope doesn't return until every transitively spawned task has finished,
//! which is the quiescence barrier the enforcement stage waits on.
//!
//! With parallel processing disabled there is no scope at all and every submission executes
//! inline on the submitter.

use crate::error::Result;
use crate::error::report_task_error;

/// Submits a unit of work. Failures are captured and reported; they never stop the fan-out.
pub(crate) fn submit<'scope, F>(scope: Option<&rayon::Scope<'scope>>, f: F)
where
    F: FnOnce(Option<&rayon::Scope<'scope>>) -> Result + Send + 'scope,
{
    match scope {
        Some(scope) => scope.spawn(move |scope| run_task(f(Some(scope)))),
        None => run_task(f(None)),
    }
}

/// Captures a task's outcome. Errors are printed (the subscriber serializes stderr) and counted
/// for the exit-code decision.
pub(crate) fn run_task(result: Result) {
    if let Err(error) = result {
        report_task_error(&error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bail;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_inline_submission_runs_on_the_submitter() {
        let ran = AtomicUsize::new(0);
        let submitter = std::thread::current().id();
        submit(None, |_| {
            assert_eq!(std::thread::current().id(), submitter);
            ran.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        assert_eq!(ran.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_scope_waits_for_transitive_submissions() {
        let ran = AtomicUsize::new(0);
        rayon::scope(|scope| {
            submit(Some(scope), |scope| {
                ran.fetch_add(1, Ordering::Relaxed);
                submit(scope, |_| {
                    ran.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                });
                Ok(())
            });
        });
        // The scope is the barrier: both the task and the task it submitted are done.
        assert_eq!(ran.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_failures_do_not_stop_the_fan_out() {
        let ran = AtomicUsize::new(0);
        rayon::scope(|scope| {
            submit(Some(scope), |_| bail!("deliberate failure"));
            submit(Some(scope), |_| {
                ran.fetch_add(1, Ordering::Relaxed);
                Ok(())
            });
        });
        assert_eq!(ran.load(Ordering::Relaxed), 1);
    }
}

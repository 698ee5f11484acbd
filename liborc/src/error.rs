pub(crate) use anyhow::Context;
pub(crate) use anyhow::Error;

pub type Result<T = (), E = Error> = core::result::Result<T, E>;

/// Prints a warning. By using our own function for this, it'll be easier to find places that issue
/// warnings if we want to say have a flag to suppress them.
pub(crate) fn warning(message: &str) {
    eprintln!("WARNING: orc: {message}");
}

/// Reports a failure from inside a task. The fan-out is not stopped; the failure is recorded so
/// that the process can exit nonzero once all reports have been printed. The subscriber
/// serializes the output.
pub(crate) fn report_task_error(error: &Error) {
    crate::globals::globals().note_task_failure();
    tracing::error!("{error:#}");
}

pub fn report_error_and_exit(error: &Error) -> ! {
    eprintln!("orc: error: {error:#}");
    std::process::exit(1);
}

//! Process-wide counters. These exist for summary output and for the exit-code decision; they
//! deliberately have no influence on what gets parsed or reported.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

pub(crate) struct Globals {
    /// Number of DIEs materialized, including skippable ones.
    pub(crate) die_processed_count: AtomicUsize,

    /// Number of DIEs deposited into the registry.
    pub(crate) die_registered_count: AtomicUsize,

    /// Number of distinct symbol hashes seen by the registry.
    pub(crate) unique_symbol_count: AtomicUsize,

    /// Number of task failures captured during the fan-out.
    pub(crate) task_failure_count: AtomicUsize,
}

static GLOBALS: Globals = Globals {
    die_processed_count: AtomicUsize::new(0),
    die_registered_count: AtomicUsize::new(0),
    unique_symbol_count: AtomicUsize::new(0),
    task_failure_count: AtomicUsize::new(0),
};

pub(crate) fn globals() -> &'static Globals {
    &GLOBALS
}

impl Globals {
    pub(crate) fn note_task_failure(&self) {
        self.task_failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn any_task_failed(&self) -> bool {
        self.task_failure_count.load(Ordering::Relaxed) > 0
    }

    pub(crate) fn reset(&self) {
        self.die_processed_count.store(0, Ordering::Relaxed);
        self.die_registered_count.store(0, Ordering::Relaxed);
        self.unique_symbol_count.store(0, Ordering::Relaxed);
        self.task_failure_count.store(0, Ordering::Relaxed);
    }
}

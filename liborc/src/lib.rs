//! One Definition Rule violation detection for Mach-O inputs: feed it the same object files and
//! static archives a link would consume, and it parses their DWARF, groups every definition by
//! symbolic identity, and reports the identities whose definitions disagree.

use crate::error::Result;
use crate::globals::globals;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub(crate) use anyhow::bail;
pub(crate) use anyhow::ensure;

pub(crate) mod archive;
pub mod args;
pub(crate) mod die;
pub(crate) mod dwarf;
pub(crate) mod enforce;
pub mod error;
pub(crate) mod fat;
pub(crate) mod file_kind;
pub(crate) mod globals;
pub(crate) mod hash;
pub(crate) mod macho;
pub(crate) mod ofd;
pub(crate) mod parsing;
pub(crate) mod reader;
pub(crate) mod registry;
pub(crate) mod report;
pub(crate) mod string_pool;
pub(crate) mod work;

pub use args::Args;
pub use report::OdrvReport;
pub use report::filter_report;

/// The core: parses every input, registers the definitions found, and returns the sorted report
/// list. No filtering and no exit-code decisions happen in here; failures inside individual
/// inputs are reported and the rest of the graph continues.
#[tracing::instrument(skip_all, name = "Process")]
pub fn process(paths: &[PathBuf], args: &Args) -> Result<Vec<OdrvReport>> {
    // First stage: materialize and register every DIE. The scope is the quiescence barrier.
    if args.parallel {
        rayon::scope(|scope| {
            for path in paths {
                scope.spawn(move |scope| {
                    work::run_task(parsing::parse_root(path, Some(scope)));
                });
            }
        });
    } else {
        for path in paths {
            work::run_task(parsing::parse_root(path, None));
        }
    }

    // Second stage: review the registered chains for ODRVs.
    Ok(enforce::enforce_all(args.parallel))
}

/// Runs the whole tool: process, filter, print, and decide the exit code.
pub fn run(args: &Args) -> Result<i32> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    if args.inputs.is_empty() {
        crate::bail!("no input files");
    }
    args.setup_thread_pool()?;

    let reports = process(&args.inputs, args)?;

    let mut emitted = 0_usize;
    for report in &reports {
        if !filter_report(report, &args.violation_ignore, &args.violation_report) {
            continue;
        }
        print!("{}", report.display(args.graceful_exit));
        emitted += 1;
    }

    if emitted > 0 {
        println!("{emitted} violation(s) found");
    }

    if args.print_symbol_count {
        tracing::info!(
            dies_processed = globals().die_processed_count.load(Ordering::Relaxed),
            dies_registered = globals().die_registered_count.load(Ordering::Relaxed),
            unique_symbols = globals().unique_symbol_count.load(Ordering::Relaxed),
            violations = emitted,
        );
    }

    let failed = globals().any_task_failed();
    let code = if args.graceful_exit {
        0
    } else if emitted > 0 || failed {
        1
    } else {
        0
    };
    Ok(code)
}

/// Test hook: clears the DIE registry, its backbone, and the counters. The string pool and the
/// object-file descriptors deliberately survive.
pub fn reset() {
    registry::reset();
    globals().reset();
}

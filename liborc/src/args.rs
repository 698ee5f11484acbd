//! A handwritten parser for our arguments. There are few enough of them that a dependency isn't
//! warranted, and like the platform's other link-time tools we accept long options with either
//! one dash or two.

use crate::error::Result;
use crate::bail;
use rayon::ThreadPoolBuilder;
use std::num::NonZeroUsize;
use std::path::PathBuf;

#[derive(Debug)]
pub struct Args {
    pub inputs: Vec<PathBuf>,

    /// Report violations as warnings and exit zero regardless.
    pub graceful_exit: bool,

    /// When false, every task runs inline on its submitter.
    pub parallel: bool,

    pub num_threads: Option<NonZeroUsize>,

    /// Sorted category lists consulted by `filter_report`. Ignore wins over report.
    pub violation_ignore: Vec<String>,
    pub violation_report: Vec<String>,

    /// Log summary counters after the run.
    pub print_symbol_count: bool,
}

impl Default for Args {
    fn default() -> Self {
        Args {
            inputs: Vec::new(),
            graceful_exit: false,
            parallel: true,
            num_threads: None,
            violation_ignore: Vec::new(),
            violation_report: Vec::new(),
            print_symbol_count: false,
        }
    }
}

impl Args {
    pub fn parse<S: AsRef<str>, I: Iterator<Item = S>>(input: I) -> Result<Args> {
        let mut args = Args::default();

        for arg in input {
            let arg = arg.as_ref();
            if let Some(rest) = arg.strip_prefix('-') {
                let rest = rest.strip_prefix('-').unwrap_or(rest);
                if rest == "graceful-exit" {
                    args.graceful_exit = true;
                } else if rest == "no-parallel" {
                    args.parallel = false;
                } else if let Some(value) = rest.strip_prefix("threads=") {
                    args.num_threads = Some(
                        value
                            .parse::<NonZeroUsize>()
                            .map_err(|_| anyhow::anyhow!("invalid thread count `{value}`"))?,
                    );
                } else if let Some(value) = rest.strip_prefix("ignore=") {
                    args.violation_ignore.push(value.to_owned());
                } else if let Some(value) = rest.strip_prefix("report=") {
                    args.violation_report.push(value.to_owned());
                } else if rest == "print-symbol-count" {
                    args.print_symbol_count = true;
                } else {
                    bail!("unrecognized argument `{arg}`");
                }
            } else {
                args.inputs.push(PathBuf::from(arg));
            }
        }

        // filter_report does binary searches over these.
        args.violation_ignore.sort();
        args.violation_report.sort();

        Ok(args)
    }

    pub fn setup_thread_pool(&self) -> Result {
        if let Some(num_threads) = self.num_threads {
            ThreadPoolBuilder::new()
                .num_threads(num_threads.get())
                .build_global()?;
        }
        Ok(())
    }
}

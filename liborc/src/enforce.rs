//! The enforcement pass. Runs once the materialization fan-out has quiesced: every chain in the
//! registry is flattened, put into a deterministic order, and scanned for disagreement among its
//! definitions.

use crate::die::Die;
use crate::error::report_task_error;
use crate::ofd;
use crate::registry;
use crate::report::OdrvReport;
use crate::report::path_to_symbol;
use rayon::iter::IntoParallelIterator;
use rayon::iter::ParallelIterator;

/// Sweeps the registry and returns the final, symbol-sorted report list.
#[tracing::instrument(skip_all, name = "Enforce ODR")]
pub(crate) fn enforce_all(parallel: bool) -> Vec<OdrvReport> {
    let entries = registry::entries();

    let mut reports: Vec<OdrvReport> = if parallel {
        entries
            .into_par_iter()
            .filter_map(|(hash, head)| enforce_chain(hash, head))
            .collect()
    } else {
        entries
            .into_iter()
            .filter_map(|(hash, head)| enforce_chain(hash, head))
            .collect()
    };

    // Registration order across CUs is nondeterministic; the output order must not be.
    reports.sort_by(|a, b| a.symbol_bytes().cmp(b.symbol_bytes()));
    reports
}

/// Sorts one chain by object ancestry, re-links it, and reports if any two adjacent definitions
/// disagree. Returns `None` for singleton and agreeing chains.
fn enforce_chain(hash: u64, head: &'static Die) -> Option<OdrvReport> {
    let mut dies: Vec<&'static Die> = head.chain().collect();
    debug_assert!(!dies.is_empty());
    if dies.len() == 1 {
        return None;
    }

    // If multiple copies of the same source file were compiled, the ancestry might not be
    // unique. We assume that's an edge case and the ancestry is unique.
    dies.sort_by(|a, b| ofd::ancestry(a.ofd_index).cmp(ofd::ancestry(b.ofd_index)));

    let mut conflict = false;
    for i in 1..dies.len() {
        dies[i - 1].set_next(Some(dies[i]));
        if !conflict {
            conflict = dies[i - 1].fatal_attribute_hash != dies[i].fatal_attribute_hash;
        }
    }
    dies[dies.len() - 1].set_next(None);
    registry::update_head(hash, dies[0]);

    if !conflict {
        return None;
    }

    dies[0].mark_conflict();
    match OdrvReport::new(path_to_symbol(dies[0].path), dies[0]) {
        Ok(report) => Some(report),
        Err(error) => {
            report_task_error(&error);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::die::Ancestry;
    use crate::die::Arch;
    use crate::dwarf::SectionTable;
    use crate::ofd::Ofd;
    use crate::registry::register_dies;
    use crate::registry::tests::registry_test_lock;
    use crate::registry::tests::test_die;
    use crate::string_pool::empool;
    use object::Endianness;
    use std::path::Path;
    use std::sync::Arc;

    fn register_test_ofd(ancestors: &[&[u8]]) -> u32 {
        let mut ancestry = Ancestry::default();
        for ancestor in ancestors {
            ancestry.push(empool(ancestor));
        }
        ofd::register(Ofd {
            path: Arc::from(Path::new("/nonexistent")),
            ancestry,
            endian: Endianness::Little,
            arch: Arch::X86_64,
            sections: SectionTable::default(),
        })
    }

    #[test]
    fn test_agreeing_chain_is_sorted_and_relinked() {
        let _guard = registry_test_lock();
        registry::reset();

        let zebra = register_test_ofd(&[b"zebra.o"]);
        let apple = register_test_ofd(&[b"apple.o"]);
        let mango = register_test_ofd(&[b"mango.o"]);

        // Same path, same fatal hash, three objects; registered in non-sorted order.
        register_dies(vec![test_die(b"::[u]::Same", 7, zebra)]);
        register_dies(vec![test_die(b"::[u]::Same", 7, mango)]);
        register_dies(vec![test_die(b"::[u]::Same", 7, apple)]);

        let reports = enforce_all(false);
        assert!(reports.is_empty());

        let (_, head) = registry::entries().into_iter().next().unwrap();
        let order: Vec<String> = head
            .chain()
            .map(|die| ofd::ancestry(die.ofd_index).to_string())
            .collect();
        assert_eq!(order, ["apple.o", "mango.o", "zebra.o"]);
        assert!(!head.conflict());

        registry::reset();
    }

    #[test]
    fn test_singleton_chains_are_skipped() {
        let _guard = registry_test_lock();
        registry::reset();

        let ofd_index = register_test_ofd(&[b"only.o"]);
        register_dies(vec![test_die(b"::[u]::Alone", 1, ofd_index)]);
        assert!(enforce_all(false).is_empty());

        registry::reset();
    }
}

//! The global DIE registry: a backbone of immovable DIE batches plus a striped map from symbol
//! hash to head-of-chain.
//!
//! The backbone exists so that DIE addresses stay valid for the lifetime of the process - the
//! DIEs become thoroughly entangled once chains form, and the map stores plain references to
//! them. Batches are leaked on arrival; nothing here is ever freed, which costs nothing since
//! the process exits right after reporting.

use crate::die::Die;
use crate::die::Dies;
use crate::globals::globals;
use crate::hash::PassThroughHashMap;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::atomic::Ordering;

/// Prime, to help reduce any hash bias.
const STRIPE_COUNT: usize = 67;

struct Registry {
    backbone: Mutex<Vec<&'static [Die]>>,
    stripes: [Mutex<PassThroughHashMap<u64, &'static Die>>; STRIPE_COUNT],
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Registry {
        backbone: Mutex::new(Vec::new()),
        stripes: std::array::from_fn(|_| Mutex::new(PassThroughHashMap::default())),
    })
}

/// Deposits one CU's worth of DIEs. The batch is moved into the backbone wholesale, then every
/// non-skippable DIE is chained into the map.
pub(crate) fn register_dies(batch: Dies) {
    let registry = registry();
    globals()
        .die_processed_count
        .fetch_add(batch.len(), Ordering::Relaxed);

    let batch: &'static [Die] = Box::leak(batch.into_boxed_slice());
    registry.backbone.lock().unwrap().push(batch);

    let mut registered = 0_usize;
    for die in batch {
        if die.skippable {
            continue;
        }
        registered += 1;

        let mut stripe = registry.stripes[(die.hash % STRIPE_COUNT as u64) as usize]
            .lock()
            .unwrap();
        match stripe.entry(die.hash) {
            hashbrown::hash_map::Entry::Vacant(entry) => {
                entry.insert(die);
                globals().unique_symbol_count.fetch_add(1, Ordering::Relaxed);
            }
            hashbrown::hash_map::Entry::Occupied(entry) => {
                // The head pointer in the map is never replaced here; the chain grows right
                // behind it, under the stripe lock.
                let head = *entry.get();
                die.set_next(head.next());
                head.set_next(Some(die));
            }
        }
    }

    globals()
        .die_registered_count
        .fetch_add(registered, Ordering::Relaxed);
}

/// Snapshot of every `(hash, head)` entry, for the enforcement sweep.
pub(crate) fn entries() -> Vec<(u64, &'static Die)> {
    let registry = registry();
    let mut entries = Vec::new();
    for stripe in &registry.stripes {
        let stripe = stripe.lock().unwrap();
        entries.extend(stripe.iter().map(|(&hash, &die)| (hash, die)));
    }
    entries
}

/// Replaces a chain head after enforcement has re-linked the chain in sorted order.
pub(crate) fn update_head(hash: u64, head: &'static Die) {
    let registry = registry();
    let mut stripe = registry.stripes[(hash % STRIPE_COUNT as u64) as usize]
        .lock()
        .unwrap();
    stripe.insert(hash, head);
}

/// Test hook: clears the registry map and the backbone. Leaked batches stay leaked, and the
/// string pool is untouched.
pub(crate) fn reset() {
    let registry = registry();
    registry.backbone.lock().unwrap().clear();
    for stripe in &registry.stripes {
        stripe.lock().unwrap().clear();
    }
}

//! A process-wide byte-string interner. Names occur over and over across compilation units, so
//! DIEs store handles instead of owned strings. Handles carry the precomputed content hash, and
//! interning guarantees that equal content yields the same backing pointer, so both equality and
//! hashing are O(1).
//!
//! The pool is deliberately never torn down: the process exits right after reporting, and the
//! registry is full of handles into it.

use crate::hash::PassThroughHashMap;
use crate::hash::hash_bytes;
use std::borrow::Cow;
use std::sync::Mutex;
use std::sync::OnceLock;

/// Stripe count is prime to dilute any bias in the low bits of the hash.
const STRIPE_COUNT: usize = 23;

/// An interned, immutable byte string. Copyable, process-long, never dangles. The default value
/// is the distinguished empty handle, which is not the same thing as a handle over an empty byte
/// sequence (the pool never allocates one of those).
#[derive(Clone, Copy, Default)]
pub struct PoolStr {
    entry: Option<&'static Entry>,
}

#[derive(Debug)]
struct Entry {
    hash: u64,
    bytes: &'static [u8],
}

struct Pool {
    entries: colosseum::sync::Arena<Entry>,
    stripes: [Mutex<PassThroughHashMap<u64, &'static Entry>>; STRIPE_COUNT],
}

fn pool() -> &'static Pool {
    static POOL: OnceLock<Pool> = OnceLock::new();
    POOL.get_or_init(|| Pool {
        entries: colosseum::sync::Arena::new(),
        stripes: std::array::from_fn(|_| Mutex::new(PassThroughHashMap::default())),
    })
}

/// Interns `src`, returning the canonical handle for its content.
pub fn empool(src: &[u8]) -> PoolStr {
    if src.is_empty() {
        return PoolStr::default();
    }

    let pool = pool();
    let hash = hash_bytes(src);
    let mut stripe = pool.stripes[(hash % STRIPE_COUNT as u64) as usize]
        .lock()
        .unwrap();

    if let Some(entry) = stripe.get(&hash) {
        debug_assert_eq!(entry.bytes, src);
        return PoolStr { entry: Some(entry) };
    }

    // The copy is deliberately leaked; entries live until process exit.
    let bytes: &'static [u8] = Box::leak(src.to_vec().into_boxed_slice());
    let entry = &*pool.entries.alloc(Entry { hash, bytes });
    stripe.insert(hash, entry);

    PoolStr { entry: Some(entry) }
}

impl PoolStr {
    pub fn view(&self) -> &'static [u8] {
        match self.entry {
            Some(entry) => entry.bytes,
            None => &[],
        }
    }

    pub fn hash(&self) -> u64 {
        match self.entry {
            Some(entry) => entry.hash,
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }

    pub fn to_string_lossy(&self) -> Cow<'static, str> {
        String::from_utf8_lossy(self.view())
    }
}

impl PartialEq for PoolStr {
    fn eq(&self, other: &Self) -> bool {
        match (self.entry, other.entry) {
            // Interning makes pointer equality equivalent to content equality.
            (Some(a), Some(b)) => std::ptr::eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for PoolStr {}

impl Ord for PoolStr {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.view().cmp(other.view())
    }
}

impl PartialOrd for PoolStr {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::hash::Hash for PoolStr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash());
    }
}

impl std::fmt::Display for PoolStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.to_string_lossy(), f)
    }
}

impl std::fmt::Debug for PoolStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PoolStr({:?})", self.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_content_equal_pointer() {
        let a = empool(b"::[u]::Foo::bar");
        let b = empool(b"::[u]::Foo::bar");
        let c = empool(b"::[u]::Foo::baz");
        assert_eq!(a, b);
        assert_eq!(a.view().as_ptr(), b.view().as_ptr());
        assert_ne!(a, c);
        assert_eq!(a.view(), b"::[u]::Foo::bar");
    }

    #[test]
    fn test_hash_matches_content_hash() {
        let a = empool(b"some string");
        assert_eq!(a.hash(), crate::hash::hash_bytes(b"some string"));
    }

    #[test]
    fn test_empty_handle() {
        let empty = empool(b"");
        assert!(empty.is_empty());
        assert_eq!(empty, PoolStr::default());
        assert_eq!(empty.view(), b"");
        assert_ne!(empty, empool(b"x"));
    }

    #[test]
    fn test_ordering_is_byte_lexicographic() {
        let mut handles = vec![empool(b"beta"), empool(b"alpha"), empool(b""), empool(b"alp")];
        handles.sort();
        let views: Vec<&[u8]> = handles.iter().map(|h| h.view()).collect();
        assert_eq!(views, vec![&b""[..], b"alp", b"alpha", b"beta"]);
    }

    #[test]
    fn test_concurrent_interning_is_stable() {
        let strings: Vec<String> = (0..256).map(|i| format!("symbol::{i}")).collect();
        let handles: Vec<Vec<PoolStr>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| strings.iter().map(|s| empool(s.as_bytes())).collect()))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });
        for per_thread in &handles[1..] {
            for (a, b) in handles[0].iter().zip(per_thread) {
                assert_eq!(a, b);
                assert_eq!(a.view().as_ptr(), b.view().as_ptr());
            }
        }
    }
}

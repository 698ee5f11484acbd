use std::hash::BuildHasher;
use std::hash::Hasher;

/// A map keyed by a value that is itself a precomputed 64-bit hash. The hasher just passes the key
/// through rather than hashing the hash again.
pub(crate) type PassThroughHashMap<K, V> = hashbrown::HashMap<K, V, PassThroughHasher>;

#[derive(Default)]
pub(crate) struct PassThroughHasher {
    hash: u64,
}

impl Hasher for PassThroughHasher {
    fn finish(&self) -> u64 {
        self.hash
    }

    fn write_u64(&mut self, i: u64) {
        self.hash = i;
    }

    fn write(&mut self, _bytes: &[u8]) {
        panic!("PassThroughHasher used with inappropriate hash implementation");
    }
}

impl BuildHasher for PassThroughHasher {
    type Hasher = PassThroughHasher;

    fn build_hasher(&self) -> Self::Hasher {
        PassThroughHasher::default()
    }
}

pub(crate) fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = new_hasher();
    hasher.write(bytes);
    hasher.finish()
}

pub(crate) fn new_hasher() -> foldhash::fast::FoldHasher {
    foldhash::fast::FixedState::default().build_hasher()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_bytes_is_stable() {
        assert_eq!(hash_bytes(b"::[u]::Foo"), hash_bytes(b"::[u]::Foo"));
        assert_ne!(hash_bytes(b"::[u]::Foo"), hash_bytes(b"::[u]::Bar"));
    }

    #[test]
    fn test_pass_through_map_accepts_u64_keys() {
        let mut map: PassThroughHashMap<u64, u32> = PassThroughHashMap::default();
        map.insert(42, 1);
        map.insert(43, 2);
        assert_eq!(map.get(&42), Some(&1));
        assert_eq!(map.get(&43), Some(&2));
    }
}

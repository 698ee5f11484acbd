//! The object-file-descriptor registry: one entry per Mach-O image that contributed DIEs. A
//! DIE carries only a descriptor index; the descriptor gives back the ancestry for chain
//! ordering and everything needed to re-read the image when a report wants the full attribute
//! sequence of a DIE.
//!
//! Entries are appended during stage 1 and never removed, so indices stay valid for the process
//! lifetime (registration outlives `reset`, which only clears DIE state).

use crate::die::Ancestry;
use crate::die::Arch;
use crate::dwarf::SectionTable;
use object::Endianness;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;

pub(crate) struct Ofd {
    pub(crate) path: Arc<Path>,
    pub(crate) ancestry: Ancestry,
    pub(crate) endian: Endianness,
    pub(crate) arch: Arch,
    pub(crate) sections: SectionTable,
}

fn descriptors() -> &'static Mutex<Vec<&'static Ofd>> {
    static DESCRIPTORS: OnceLock<Mutex<Vec<&'static Ofd>>> = OnceLock::new();
    DESCRIPTORS.get_or_init(|| Mutex::new(Vec::new()))
}

pub(crate) fn register(ofd: Ofd) -> u32 {
    let ofd = &*Box::leak(Box::new(ofd));
    let mut descriptors = descriptors().lock().unwrap();
    let index = descriptors.len() as u32;
    descriptors.push(ofd);
    index
}

pub(crate) fn get(index: u32) -> &'static Ofd {
    descriptors().lock().unwrap()[index as usize]
}

pub(crate) fn ancestry(index: u32) -> &'static Ancestry {
    &get(index).ancestry
}

//! Universal ("fat") binary walking. The header and architecture table are big-endian on disk
//! regardless of producer; each table entry points at an embedded image that is parsed in its
//! own right, with the architecture name added to the ancestry.

use crate::error::Result;
use crate::file_kind::FileInfo;
use crate::file_kind::arch_from_cputype;
use crate::reader::Reader;
use crate::string_pool::PoolStr;
use crate::string_pool::empool;
use crate::ensure;
use std::io::SeekFrom;

pub(crate) struct FatSlice {
    pub(crate) arch_name: PoolStr,
    pub(crate) reader: Reader,
    pub(crate) end: u64,
}

/// Decodes the architecture table and produces one independent cursor per slice.
pub(crate) fn read_slices(s: &mut Reader, end_pos: u64, info: &FileInfo) -> Result<Vec<FatSlice>> {
    let e = info.endian();
    s.seek(SeekFrom::Start(info.offset));
    let _magic = s.read_u32(e)?;
    let count = s.read_u32(e)?;

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let cputype = s.read_u32(e)?;
        let _cpusubtype = s.read_u32(e)?;
        let (offset, size) = if info.is_64_bit {
            let offset = s.read_u64(e)?;
            let size = s.read_u64(e)?;
            let _align = s.read_u32(e)?;
            let _reserved = s.read_u32(e)?;
            (offset, size)
        } else {
            let offset = u64::from(s.read_u32(e)?);
            let size = u64::from(s.read_u32(e)?);
            let _align = s.read_u32(e)?;
            (offset, size)
        };
        entries.push((cputype, offset, size));
    }

    let mut slices = Vec::with_capacity(entries.len());
    for (cputype, offset, size) in entries {
        let slice_end = offset + size;
        ensure!(
            size > 0 && slice_end <= end_pos,
            "fat arch slice {offset:#x}..{slice_end:#x} is outside the file"
        );
        let arch = arch_from_cputype(cputype);
        s.seek(SeekFrom::Start(offset));
        slices.push(FatSlice {
            arch_name: empool(arch.name().as_bytes()),
            reader: s.subbuf(slice_end)?,
            end: slice_end,
        });
    }
    Ok(slices)
}

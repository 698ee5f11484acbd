//! Mach-O image walking: enumerate the load commands, locate the `__debug_*` sections, register
//! an object-file descriptor, then fan out one task per compilation unit for the DWARF reader.

use crate::die::Ancestry;
use crate::dwarf;
use crate::dwarf::Extent;
use crate::dwarf::SectionTable;
use crate::error::Context as _;
use crate::error::Result;
use crate::file_kind::FileInfo;
use crate::ofd;
use crate::ofd::Ofd;
use crate::reader::Reader;
use crate::registry;
use crate::work::submit;
use crate::ensure;
use object::macho;
use std::io::SeekFrom;

pub(crate) fn read_macho<'scope>(
    ancestry: Ancestry,
    mut s: Reader,
    end_pos: u64,
    info: FileInfo,
    scope: Option<&rayon::Scope<'scope>>,
) -> Result {
    let e = info.endian();
    let image_base = info.offset;

    s.seek(SeekFrom::Start(image_base));
    let _magic = s.read_u32(e)?;
    let _cputype = s.read_u32(e)?;
    let _cpusubtype = s.read_u32(e)?;
    let _filetype = s.read_u32(e)?;
    let ncmds = s.read_u32(e)?;
    let _sizeofcmds = s.read_u32(e)?;
    let _flags = s.read_u32(e)?;
    if info.is_64_bit {
        let _reserved = s.read_u32(e)?;
    }

    let mut sections = SectionTable::default();
    for _ in 0..ncmds {
        let command_start = s.tell();
        let command = s.read_u32(e)?;
        let command_size = s.read_u32(e)?;
        ensure!(command_size >= 8, "load command with impossible size");

        match command {
            macho::LC_SEGMENT | macho::LC_SEGMENT_64 => {
                read_segment(&mut s, &info, image_base, end_pos, &mut sections)?;
            }
            macho::LC_SYMTAB => {
                // The symbol table could map names to addresses where linkage names are
                // missing, but the DWARF of the supported producers carries what we need.
            }
            _ => {}
        }

        s.seek(SeekFrom::Start(command_start + u64::from(command_size)));
    }

    if sections.info.is_none() {
        tracing::debug!(object = %ancestry, "no __debug_info section");
        return Ok(());
    }

    let ofd_index = ofd::register(Ofd {
        path: s.path().clone(),
        ancestry,
        endian: e,
        arch: info.arch,
        sections,
    });

    let cus = dwarf::enumerate_cus(&mut s, &sections, e)?;
    for cu in cus {
        if cu.skip {
            continue;
        }
        let reader = s.clone();
        let arch = info.arch;
        submit(scope, move |_| {
            let mut reader = reader;
            let batch = dwarf::process_cu(&mut reader, &sections, e, arch, ofd_index, cu)
                .with_context(|| {
                    format!(
                        "in CU at {:#x} of `{}`",
                        cu.offset,
                        ofd::ancestry(ofd_index)
                    )
                })?;
            registry::register_dies(batch);
            Ok(())
        });
    }

    Ok(())
}

fn read_segment(
    s: &mut Reader,
    info: &FileInfo,
    image_base: u64,
    end_pos: u64,
    sections: &mut SectionTable,
) -> Result {
    let e = info.endian();

    let _segname = s.read_bytes(16)?;
    if info.is_64_bit {
        // vmaddr, vmsize, fileoff, filesize.
        s.seek(SeekFrom::Current(4 * 8));
    } else {
        s.seek(SeekFrom::Current(4 * 4));
    }
    let _maxprot = s.read_u32(e)?;
    let _initprot = s.read_u32(e)?;
    let nsects = s.read_u32(e)?;
    let _flags = s.read_u32(e)?;

    for _ in 0..nsects {
        let sectname: [u8; 16] = s.read_bytes(16)?.try_into().unwrap();
        let _segname = s.read_bytes(16)?;
        let size = if info.is_64_bit {
            let _addr = s.read_u64(e)?;
            s.read_u64(e)?
        } else {
            let _addr = s.read_u32(e)?;
            u64::from(s.read_u32(e)?)
        };
        let offset = u64::from(s.read_u32(e)?);
        let _align = s.read_u32(e)?;
        let _reloff = s.read_u32(e)?;
        let _nreloc = s.read_u32(e)?;
        let _flags = s.read_u32(e)?;
        let _reserved1 = s.read_u32(e)?;
        let _reserved2 = s.read_u32(e)?;
        if info.is_64_bit {
            let _reserved3 = s.read_u32(e)?;
        }

        let name = section_name(&sectname);
        let slot = match name {
            b"__debug_info" => &mut sections.info,
            b"__debug_abbrev" => &mut sections.abbrev,
            b"__debug_str" => &mut sections.debug_str,
            b"__debug_str_offs" => &mut sections.str_offsets,
            b"__debug_line_str" => &mut sections.line_str,
            b"__debug_line" => &mut sections.line,
            b"__debug_loc" => &mut sections.loc,
            b"__debug_ranges" => &mut sections.ranges,
            _ => continue,
        };

        let extent = Extent {
            offset: image_base + offset,
            size,
        };
        ensure!(
            extent.offset + extent.size <= end_pos,
            "section `{}` extends past the end of the image",
            String::from_utf8_lossy(name)
        );
        *slot = Some(extent);
    }

    Ok(())
}

fn section_name(sectname: &[u8; 16]) -> &[u8] {
    let len = memchr::memchr(0, sectname).unwrap_or(sectname.len());
    &sectname[..len]
}

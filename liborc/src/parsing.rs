//! The per-input driver: classify the bytes under the cursor, extend the ancestry, and descend.
//! Containers recurse by submitting one task per embedded object, each with an independent
//! cursor, so a large archive fans out instead of being walked serially.

use crate::archive::ArchiveMembers;
use crate::die::Ancestry;
use crate::error::Result;
use crate::fat;
use crate::file_kind;
use crate::file_kind::FileKind;
use crate::macho;
use crate::reader::Reader;
use crate::string_pool::PoolStr;
use crate::string_pool::empool;
use crate::work::submit;
use crate::bail;
use std::path::Path;

/// Entry point for one path from the input list.
pub(crate) fn parse_root<'scope>(
    path: &Path,
    scope: Option<&rayon::Scope<'scope>>,
) -> Result {
    let s = Reader::open(path)?;
    let end_pos = s.size();
    let name = empool(path.as_os_str().as_encoded_bytes());
    parse_file(name, &Ancestry::default(), s, end_pos, scope)
}

pub(crate) fn parse_file<'scope>(
    object_name: PoolStr,
    ancestry: &Ancestry,
    mut s: Reader,
    end_pos: u64,
    scope: Option<&rayon::Scope<'scope>>,
) -> Result {
    let info = file_kind::detect(&mut s)?;

    let mut ancestry = ancestry.clone();
    ancestry.push(object_name);
    tracing::debug!(kind = %info.kind, object = %ancestry, "parsing");

    match info.kind {
        FileKind::MachO => macho::read_macho(ancestry, s, end_pos, info, scope),
        FileKind::Archive => read_archive(ancestry, s, end_pos, scope),
        FileKind::Fat => read_fat(ancestry, s, end_pos, info, scope),
        FileKind::Unknown => bail!("unrecognized file format in `{ancestry}`"),
    }
}

fn read_archive<'scope>(
    ancestry: Ancestry,
    s: Reader,
    end_pos: u64,
    scope: Option<&rayon::Scope<'scope>>,
) -> Result {
    for member in ArchiveMembers::new(s, end_pos)? {
        let member = member?;
        let ancestry = ancestry.clone();
        submit(scope, move |scope| {
            parse_file(member.name, &ancestry, member.reader, member.end, scope)
        });
    }
    Ok(())
}

fn read_fat<'scope>(
    ancestry: Ancestry,
    mut s: Reader,
    end_pos: u64,
    info: file_kind::FileInfo,
    scope: Option<&rayon::Scope<'scope>>,
) -> Result {
    for slice in fat::read_slices(&mut s, end_pos, &info)? {
        let ancestry = ancestry.clone();
        submit(scope, move |scope| {
            parse_file(slice.arch_name, &ancestry, slice.reader, slice.end, scope)
        });
    }
    Ok(())
}

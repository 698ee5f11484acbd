//! Code to read BSD `ar` archives, the static-library variant used by Apple's toolchain:
//! 60-byte member headers, `#1/<len>` extended names stored in (and deducted from) the member
//! body, and 2-byte member alignment. Symbol-table members (`__.SYMDEF*`) are metadata, not
//! objects, and are skipped by name.

use crate::error::Context as _;
use crate::error::Result;
use crate::reader::Reader;
use crate::string_pool::PoolStr;
use crate::string_pool::empool;
use crate::ensure;
use std::io::SeekFrom;

pub(crate) const SIGNATURE: &[u8; 8] = &object::archive::MAGIC;

const HEADER_SIZE: u64 = 60;
const END_MARKER: [u8; 2] = *b"`\n";

/// One real member of the archive, ready for handoff: `reader` is an independent cursor over the
/// member body only, positioned at its start.
pub(crate) struct Member {
    pub(crate) name: PoolStr,
    pub(crate) reader: Reader,
    pub(crate) end: u64,
}

pub(crate) struct ArchiveMembers {
    s: Reader,
    end_pos: u64,
}

impl ArchiveMembers {
    /// `s` must be positioned at the archive signature.
    pub(crate) fn new(mut s: Reader, end_pos: u64) -> Result<Self> {
        let signature = s.read_bytes(SIGNATURE.len())?;
        ensure!(signature == SIGNATURE.as_slice(), "missing archive signature");
        Ok(ArchiveMembers { s, end_pos })
    }

    fn next_result(&mut self) -> Result<Option<Member>> {
        loop {
            if self.s.tell() + HEADER_SIZE > self.end_pos {
                return Ok(None);
            }

            let name_field: [u8; 16] = self.s.read_bytes(16)?.try_into().unwrap();
            // mtime, uid, gid, mode.
            self.s.seek(SeekFrom::Current(12 + 6 + 6 + 8));
            let size_field: [u8; 10] = self.s.read_bytes(10)?.try_into().unwrap();
            let end_field: [u8; 2] = self.s.read_bytes(2)?.try_into().unwrap();
            ensure!(
                end_field == END_MARKER,
                "bad archive member header at {:#x}",
                self.s.tell() - HEADER_SIZE
            );

            let mut size = parse_decimal(&size_field)
                .with_context(|| format!("bad member size at {:#x}", self.s.tell()))?;

            let name_field = trim_trailing(&name_field, b' ');
            let name = if let Some(length) = name_field.strip_prefix(b"#1/") {
                // BSD extended name: the real name occupies the first `length` bytes of the
                // member body and is not part of the member's contents.
                let length = parse_decimal(length).context("bad extended name length")?;
                ensure!(length <= size, "extended name longer than member");
                let name = self.s.read_bytes(length as usize)?;
                size -= length;
                empool(trim_trailing(name, 0))
            } else {
                empool(name_field)
            };

            let body_start = self.s.tell();
            let member_end = body_start + size;
            ensure!(
                member_end <= self.end_pos,
                "archive member `{name}` extends past the end of the archive"
            );

            let member = if name.view().starts_with(b"__.SYMDEF") || size == 0 {
                None
            } else {
                Some(Member {
                    name,
                    reader: self.s.subbuf(member_end)?,
                    end: member_end,
                })
            };

            // Member bodies are 2-byte aligned; an odd size is followed by one padding byte.
            self.s.seek(SeekFrom::Start(member_end + (member_end & 1)));

            if let Some(member) = member {
                return Ok(Some(member));
            }
        }
    }
}

impl Iterator for ArchiveMembers {
    type Item = Result<Member>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_result().transpose()
    }
}

fn parse_decimal(field: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(field)
        .ok()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .context("field is not decimal")?;
    text.parse().context("field is not decimal")
}

fn trim_trailing(mut bytes: &[u8], trim: u8) -> &[u8] {
    while let Some((&last, rest)) = bytes.split_last() {
        if last != trim {
            break;
        }
        bytes = rest;
    }
    bytes
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::reader::tests::write_temp_file;

    /// Appends one member in the BSD extended-name encoding that `ar` on macOS emits.
    pub(crate) fn append_member(archive: &mut Vec<u8>, name: &[u8], body: &[u8]) {
        // Extended names are padded to a multiple of 4.
        let padded_name_len = name.len().next_multiple_of(4);
        let mut header = Vec::new();
        header.extend(format!("#1/{padded_name_len:<13}").into_bytes());
        header.extend(b"0           ");
        header.extend(b"0     ");
        header.extend(b"0     ");
        header.extend(b"100644  ");
        header.extend(format!("{:<10}", padded_name_len + body.len()).into_bytes());
        header.extend(END_MARKER);
        assert_eq!(header.len(), HEADER_SIZE as usize);

        archive.extend(header);
        archive.extend(name);
        archive.extend(std::iter::repeat_n(0_u8, padded_name_len - name.len()));
        archive.extend(body);
        if (padded_name_len + body.len()) % 2 == 1 {
            archive.push(b'\n');
        }
    }

    fn append_plain_member(archive: &mut Vec<u8>, name: &[u8], body: &[u8]) {
        let mut header = Vec::new();
        let mut name_field = name.to_vec();
        name_field.resize(16, b' ');
        header.extend(name_field);
        header.extend(b"0           ");
        header.extend(b"0     ");
        header.extend(b"0     ");
        header.extend(b"100644  ");
        header.extend(format!("{:<10}", body.len()).into_bytes());
        header.extend(END_MARKER);
        archive.extend(header);
        archive.extend(body);
        if body.len() % 2 == 1 {
            archive.push(b'\n');
        }
    }

    fn members_of(archive: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let path = write_temp_file("archive", archive);
        let s = Reader::open(&path).unwrap();
        let end = s.size();
        ArchiveMembers::new(s, end)
            .unwrap()
            .map(|member| {
                let mut member = member.unwrap();
                let len = (member.end - member.reader.tell()) as usize;
                let body = member.reader.read_bytes(len).unwrap().to_vec();
                (member.name.view().to_vec(), body)
            })
            .collect()
    }

    #[test]
    fn test_iterates_members_with_extended_names() {
        let mut archive = SIGNATURE.to_vec();
        append_member(&mut archive, b"first.o", b"AAAA");
        append_member(&mut archive, b"second_longer_name.o", b"BBBBBB");
        let members = members_of(&archive);
        assert_eq!(
            members,
            vec![
                (b"first.o".to_vec(), b"AAAA".to_vec()),
                (b"second_longer_name.o".to_vec(), b"BBBBBB".to_vec()),
            ]
        );
    }

    #[test]
    fn test_odd_sized_member_is_padded() {
        let mut archive = SIGNATURE.to_vec();
        append_plain_member(&mut archive, b"odd.o", b"xyz");
        append_plain_member(&mut archive, b"even.o", b"pq");
        let members = members_of(&archive);
        assert_eq!(
            members,
            vec![
                (b"odd.o".to_vec(), b"xyz".to_vec()),
                (b"even.o".to_vec(), b"pq".to_vec()),
            ]
        );
    }

    #[test]
    fn test_symbol_table_members_are_skipped() {
        let mut archive = SIGNATURE.to_vec();
        append_member(&mut archive, b"__.SYMDEF SORTED", b"symbol table bytes");
        append_member(&mut archive, b"real.o", b"CC");
        let members = members_of(&archive);
        assert_eq!(members, vec![(b"real.o".to_vec(), b"CC".to_vec())]);
    }

    #[test]
    fn test_truncated_member_is_an_error() {
        let mut archive = SIGNATURE.to_vec();
        append_plain_member(&mut archive, b"a.o", b"data");
        archive.truncate(archive.len() - 2);
        let path = write_temp_file("archive-truncated", &archive);
        let s = Reader::open(&path).unwrap();
        let end = s.size();
        let result: Result<Vec<Member>> = ArchiveMembers::new(s, end).unwrap().collect();
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_signature_is_an_error() {
        let path = write_temp_file("archive-bad", b"not an archive at all");
        let s = Reader::open(&path).unwrap();
        let end = s.size();
        assert!(ArchiveMembers::new(s, end).is_err());
    }
}

//! Identifies what sort of file the cursor is looking at based on the magic at its current
//! position, without moving it.

use crate::die::Arch;
use crate::error::Result;
use crate::reader::Reader;
use crate::ensure;
use object::Endianness;
use object::macho;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum FileKind {
    MachO,
    Fat,
    Archive,
    Unknown,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FileInfo {
    pub(crate) kind: FileKind,

    /// Position of the magic within the file; the image base for Mach-O section offsets.
    pub(crate) offset: u64,

    pub(crate) arch: Arch,
    pub(crate) is_64_bit: bool,

    /// Whether the file's multi-byte fields are in the opposite byte order to the host.
    pub(crate) needs_byteswap: bool,
}

impl FileInfo {
    pub(crate) fn endian(&self) -> Endianness {
        let host = if cfg!(target_endian = "little") {
            Endianness::Little
        } else {
            Endianness::Big
        };
        if self.needs_byteswap {
            match host {
                Endianness::Little => Endianness::Big,
                Endianness::Big => Endianness::Little,
            }
        } else {
            host
        }
    }
}

const AR_MAGIC_PREFIX: [u8; 4] = *b"!<ar";

/// Peeks at the magic under the cursor and classifies the file. The cursor position is
/// unchanged on return.
pub(crate) fn detect(s: &mut Reader) -> Result<FileInfo> {
    let offset = s.tell();
    s.with_temp_seek(offset, |s| {
        let raw: [u8; 4] = s.read_bytes(4)?.try_into().unwrap();
        let header = u32::from_ne_bytes(raw);

        let kind = if matches!(
            header,
            macho::MH_MAGIC | macho::MH_CIGAM | macho::MH_MAGIC_64 | macho::MH_CIGAM_64
        ) {
            FileKind::MachO
        } else if matches!(
            header,
            macho::FAT_MAGIC | macho::FAT_CIGAM | macho::FAT_MAGIC_64 | macho::FAT_CIGAM_64
        ) {
            FileKind::Fat
        } else if raw == AR_MAGIC_PREFIX || raw == reversed(AR_MAGIC_PREFIX) {
            FileKind::Archive
        } else {
            FileKind::Unknown
        };

        let is_64_bit = matches!(
            header,
            macho::MH_MAGIC_64 | macho::MH_CIGAM_64 | macho::FAT_MAGIC_64 | macho::FAT_CIGAM_64
        );

        // The CIGAM spellings are what a magic looks like when read in the wrong byte order, so
        // matching one means the file disagrees with the host - on any host.
        let needs_byteswap = matches!(
            header,
            macho::MH_CIGAM | macho::MH_CIGAM_64 | macho::FAT_CIGAM | macho::FAT_CIGAM_64
        ) || raw == reversed(AR_MAGIC_PREFIX);

        let mut info = FileInfo {
            kind,
            offset,
            arch: Arch::Unknown,
            is_64_bit,
            needs_byteswap,
        };

        if kind == FileKind::MachO {
            let raw: [u8; 4] = s.read_bytes(4)?.try_into().unwrap();
            let mut cputype = u32::from_ne_bytes(raw);
            if info.needs_byteswap {
                cputype = cputype.swap_bytes();
            }
            ensure!(
                (cputype & macho::CPU_ARCH_ABI64 != 0) == is_64_bit,
                "Mach-O cputype {cputype:#x} disagrees with magic about 64-bitness"
            );
            info.arch = arch_from_cputype(cputype);
            if info.arch == Arch::Unknown {
                crate::error::warning(&format!("Unknown Mach-O cputype {cputype:#x}"));
            }
        }

        Ok(info)
    })
}

pub(crate) fn arch_from_cputype(cputype: u32) -> Arch {
    match cputype {
        macho::CPU_TYPE_X86 => Arch::X86,
        macho::CPU_TYPE_X86_64 => Arch::X86_64,
        macho::CPU_TYPE_ARM => Arch::Arm,
        macho::CPU_TYPE_ARM64 => Arch::Arm64,
        macho::CPU_TYPE_ARM64_32 => Arch::Arm64_32,
        _ => Arch::Unknown,
    }
}

fn reversed(mut bytes: [u8; 4]) -> [u8; 4] {
    bytes.reverse();
    bytes
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileKind::MachO => "Mach-O",
            FileKind::Fat => "universal binary",
            FileKind::Archive => "archive",
            FileKind::Unknown => "unknown",
        };
        std::fmt::Display::fmt(s, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::tests::write_temp_file;

    fn detect_bytes(bytes: &[u8]) -> FileInfo {
        let path = write_temp_file("file-kind", bytes);
        let mut s = Reader::open(&path).unwrap();
        detect(&mut s).unwrap()
    }

    #[test]
    fn test_detect_macho_64_little_endian() {
        let mut bytes = macho::MH_MAGIC_64.to_le_bytes().to_vec();
        bytes.extend((macho::CPU_TYPE_X86_64).to_le_bytes());
        bytes.extend([0; 24]);
        let info = detect_bytes(&bytes);
        assert_eq!(info.kind, FileKind::MachO);
        assert!(info.is_64_bit);
        assert!(!info.needs_byteswap);
        assert_eq!(info.arch, Arch::X86_64);
        assert_eq!(info.endian(), Endianness::Little);
    }

    #[test]
    fn test_detect_macho_32_swapped() {
        let mut bytes = macho::MH_MAGIC.to_be_bytes().to_vec();
        bytes.extend(macho::CPU_TYPE_ARM.to_be_bytes());
        bytes.extend([0; 24]);
        let info = detect_bytes(&bytes);
        assert_eq!(info.kind, FileKind::MachO);
        assert!(!info.is_64_bit);
        assert!(info.needs_byteswap);
        assert_eq!(info.arch, Arch::Arm);
        assert_eq!(info.endian(), Endianness::Big);
    }

    #[test]
    fn test_detect_fat() {
        // Fat headers are big-endian on disk.
        let mut bytes = macho::FAT_MAGIC.to_be_bytes().to_vec();
        bytes.extend(2_u32.to_be_bytes());
        let info = detect_bytes(&bytes);
        assert_eq!(info.kind, FileKind::Fat);
        assert!(!info.is_64_bit);
        assert_eq!(info.endian(), Endianness::Big);
    }

    #[test]
    fn test_detect_archive_and_unknown() {
        assert_eq!(detect_bytes(b"!<arch>\n").kind, FileKind::Archive);
        assert_eq!(detect_bytes(b"garbage!").kind, FileKind::Unknown);
    }

    #[test]
    fn test_detect_leaves_cursor_in_place() {
        let path = write_temp_file("file-kind-cursor", b"!<arch>\nrest");
        let mut s = Reader::open(&path).unwrap();
        detect(&mut s).unwrap();
        assert_eq!(s.tell(), 0);
    }

    #[test]
    fn test_mismatched_abi64_bit_is_an_error() {
        // 64-bit magic with a 32-bit cputype.
        let mut bytes = macho::MH_MAGIC_64.to_le_bytes().to_vec();
        bytes.extend(macho::CPU_TYPE_X86.to_le_bytes());
        let path = write_temp_file("file-kind-abi", &bytes);
        let mut s = Reader::open(&path).unwrap();
        assert!(detect(&mut s).is_err());
    }
}

//! A cursor over a memory-mapped, read-only input file. All positions are absolute byte offsets
//! within the file, regardless of which window of the file is currently mapped, so offsets taken
//! from container headers can be used directly after a `subbuf`.

use crate::error::Context as _;
use crate::error::Result;
use crate::bail;
use crate::ensure;
use memmap2::Mmap;
use object::Endian as _;
use object::Endianness;
use std::fs::File;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

pub(crate) struct Reader {
    file: Arc<File>,
    map: Arc<Mmap>,
    path: Arc<Path>,

    /// File offset of the first mapped byte.
    window_start: u64,

    /// Current position (absolute file offset).
    pos: u64,

    /// One past the last readable byte (absolute file offset).
    end: u64,
}

impl Clone for Reader {
    fn clone(&self) -> Self {
        Reader {
            file: self.file.clone(),
            map: self.map.clone(),
            path: self.path.clone(),
            window_start: self.window_start,
            pos: self.pos,
            end: self.end,
        }
    }
}

impl Reader {
    pub(crate) fn open(path: &Path) -> Result<Reader> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open input file `{}`", path.display()))?;

        let size = file
            .metadata()
            .with_context(|| format!("Failed to read metadata for `{}`", path.display()))?
            .len();

        // Safety: Unfortunately, this is a bit of a compromise. This is only safe if our users
        // manage to avoid editing the input files while we've got them mapped. There's no way to
        // protect against unsoundness if the files are modified externally - the bytes could
        // change without notice, or the mapped file could be truncated, causing any access to
        // result in a SIGBUS. For our use case, mmap still wins: large parts of the inputs are
        // never read, and the kernel can reclaim our pages under memory pressure.
        let map = unsafe { memmap2::MmapOptions::new().map(&file) }
            .with_context(|| format!("Failed to mmap input file `{}`", path.display()))?;

        Ok(Reader {
            file: Arc::new(file),
            map: Arc::new(map),
            path: Arc::from(path),
            window_start: 0,
            pos: 0,
            end: size,
        })
    }

    /// Creates a new cursor backed by a fresh mapping of the page-aligned range covering
    /// `[tell(), end)`. The new cursor is independent, so the original (typically much larger)
    /// mapping can be dropped once per-slice work has been split out.
    pub(crate) fn subbuf(&self, end: u64) -> Result<Reader> {
        ensure!(
            self.pos < end && end <= self.end,
            "invalid subbuf range {:#x}..{:#x} in `{}`",
            self.pos,
            end,
            self.path.display()
        );

        let page_size = page_size();
        let window_start = self.pos / page_size * page_size;
        let window_end = end.div_ceil(page_size) * page_size;

        let map = unsafe {
            memmap2::MmapOptions::new()
                .offset(window_start)
                .len((window_end - window_start) as usize)
                .map(&*self.file)
        }
        .with_context(|| format!("Failed to remap `{}`", self.path.display()))?;

        Ok(Reader {
            file: self.file.clone(),
            map: Arc::new(map),
            path: self.path.clone(),
            window_start,
            pos: self.pos,
            end,
        })
    }

    pub(crate) fn path(&self) -> &Arc<Path> {
        &self.path
    }

    pub(crate) fn tell(&self) -> u64 {
        self.pos
    }

    /// The absolute offset one past the last readable byte. For a cursor fresh from `open`, this
    /// is the file size.
    pub(crate) fn size(&self) -> u64 {
        self.end
    }

    pub(crate) fn seek(&mut self, from: SeekFrom) {
        self.pos = match from {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(offset) => self.pos.wrapping_add_signed(offset),
            SeekFrom::End(offset) => self.end.wrapping_add_signed(offset),
        };
    }

    /// Runs `f` with the cursor at `pos`, restoring the current position afterwards whether or
    /// not `f` succeeded.
    pub(crate) fn with_temp_seek<T>(
        &mut self,
        pos: u64,
        f: impl FnOnce(&mut Reader) -> Result<T>,
    ) -> Result<T> {
        let saved = self.pos;
        self.pos = pos;
        let result = f(self);
        self.pos = saved;
        result
    }

    pub(crate) fn read_bytes(&mut self, n: usize) -> Result<&[u8]> {
        let start = self.pos;
        ensure!(
            start >= self.window_start && start + n as u64 <= self.end,
            "read of {n} bytes at {start:#x} is outside `{}` (window {:#x}..{:#x})",
            self.path.display(),
            self.window_start,
            self.end
        );
        let offset = (start - self.window_start) as usize;
        self.pos = start + n as u64;
        Ok(&self.map[offset..offset + n])
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub(crate) fn read_u16(&mut self, e: Endianness) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(e.read_u16_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_u32(&mut self, e: Endianness) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(e.read_u32_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_u64(&mut self, e: Endianness) -> Result<u64> {
        let bytes: [u8; 8] = self.read_bytes(8)?.try_into().unwrap();
        Ok(e.read_u64_bytes(bytes))
    }

    /// Reads bytes up to (and consuming) the next NUL, returning a view that excludes it.
    pub(crate) fn read_c_str(&mut self) -> Result<&[u8]> {
        let start = self.pos;
        ensure!(
            start >= self.window_start && start < self.end,
            "C string read at {start:#x} is outside `{}`",
            self.path.display()
        );
        let offset = (start - self.window_start) as usize;
        let limit = (self.end - self.window_start) as usize;
        let Some(len) = memchr::memchr(0, &self.map[offset..limit]) else {
            bail!(
                "unterminated string at {start:#x} in `{}`",
                self.path.display()
            );
        };
        self.pos = start + len as u64 + 1;
        Ok(&self.map[offset..offset + len])
    }

    /// DWARF unsigned LEB128. Accumulates into 64 bits; bits past the accumulator width are
    /// drained but discarded.
    pub(crate) fn read_uleb128(&mut self) -> Result<u64> {
        let mut result = 0_u64;
        let mut shift = 0_u32;
        loop {
            let byte = self.read_u8()?;
            if shift < 64 {
                result |= u64::from(byte & 0x7f) << shift;
            }
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// DWARF signed LEB128, sign-extended from bit 6 of the final byte.
    pub(crate) fn read_sleb128(&mut self) -> Result<i64> {
        let mut result = 0_i64;
        let mut shift = 0_u32;
        loop {
            let byte = self.read_u8()?;
            if shift < 64 {
                result |= i64::from(byte & 0x7f) << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1_i64 << shift;
                }
                return Ok(result);
            }
        }
    }
}

fn page_size() -> u64 {
    // Safety: sysconf has no preconditions.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as u64 }
}

//! ELF image parser.
//!
//! Accepts 32-bit and 64-bit ELF, both byte orders, machine PPC (20) or
//! PPC64 (21). Exposes the entry point, the PT_LOAD segments (file bytes
//! plus the zero-filled tail size) and the `.symtab`/`.strtab` symbols
//! used for diagnostics labels. Placing segments into emulator memory is
//! the machine's job; this crate never touches a bus.

use std::fmt;

pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// e_machine values this loader accepts.
pub const EM_PPC: u16 = 20;
pub const EM_PPC64: u16 = 21;

const PT_LOAD: u32 = 1;
const SHT_SYMTAB: u32 = 2;

/// Parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElfError {
    TooShort(usize),
    BadMagic([u8; 4]),
    BadClass(u8),
    BadEncoding(u8),
    BadVersion(u32),
    BadMachine(u16),
    Truncated(&'static str),
    Misaligned { paddr: u64, align: u64 },
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort(len) => write!(f, "file too short for an ELF header: {len} bytes"),
            Self::BadMagic(magic) => write!(f, "bad ELF magic: {magic:02X?}"),
            Self::BadClass(class) => write!(f, "unsupported ELF class {class}"),
            Self::BadEncoding(enc) => write!(f, "unsupported data encoding {enc}"),
            Self::BadVersion(version) => write!(f, "unsupported ELF version {version}"),
            Self::BadMachine(machine) => {
                write!(f, "machine {machine} is not PPC ({EM_PPC}) or PPC64 ({EM_PPC64})")
            }
            Self::Truncated(what) => write!(f, "file truncated while reading {what}"),
            Self::Misaligned { paddr, align } => {
                write!(f, "segment paddr {paddr:#X} violates alignment {align:#X}")
            }
        }
    }
}

impl std::error::Error for ElfError {}

/// ELF file class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Elf32,
    Elf64,
}

/// ELF data encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Lsb,
    Msb,
}

/// One PT_LOAD segment: the file bytes plus the zero tail implied by
/// `mem_size > data.len()`.
#[derive(Debug, Clone)]
pub struct LoadSegment {
    pub paddr: u64,
    pub data: Vec<u8>,
    pub mem_size: u64,
    pub align: u64,
}

/// A `.symtab` entry with its resolved name.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub value: u64,
    pub size: u64,
}

/// A parsed ELF image.
#[derive(Debug, Clone)]
pub struct ElfImage {
    pub class: Class,
    pub encoding: Encoding,
    pub machine: u16,
    pub entry: u64,
    pub segments: Vec<LoadSegment>,
    pub symbols: Vec<Symbol>,
}

/// Quick magic check, for choosing between ELF and raw loading.
#[must_use]
pub fn looks_like_elf(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == ELF_MAGIC
}

/// Byte-order-aware field reader.
struct Reader<'a> {
    data: &'a [u8],
    encoding: Encoding,
}

impl<'a> Reader<'a> {
    fn bytes(&self, offset: usize, len: usize, what: &'static str) -> Result<&'a [u8], ElfError> {
        self.data
            .get(offset..offset + len)
            .ok_or(ElfError::Truncated(what))
    }

    fn u16(&self, offset: usize, what: &'static str) -> Result<u16, ElfError> {
        let b = self.bytes(offset, 2, what)?;
        Ok(match self.encoding {
            Encoding::Lsb => u16::from_le_bytes([b[0], b[1]]),
            Encoding::Msb => u16::from_be_bytes([b[0], b[1]]),
        })
    }

    fn u32(&self, offset: usize, what: &'static str) -> Result<u32, ElfError> {
        let b = self.bytes(offset, 4, what)?;
        let b = [b[0], b[1], b[2], b[3]];
        Ok(match self.encoding {
            Encoding::Lsb => u32::from_le_bytes(b),
            Encoding::Msb => u32::from_be_bytes(b),
        })
    }

    fn u64(&self, offset: usize, what: &'static str) -> Result<u64, ElfError> {
        let b = self.bytes(offset, 8, what)?;
        let b = [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]];
        Ok(match self.encoding {
            Encoding::Lsb => u64::from_le_bytes(b),
            Encoding::Msb => u64::from_be_bytes(b),
        })
    }

    /// Class-sized address/offset field.
    fn addr(&self, offset: usize, class: Class, what: &'static str) -> Result<u64, ElfError> {
        match class {
            Class::Elf32 => Ok(u64::from(self.u32(offset, what)?)),
            Class::Elf64 => self.u64(offset, what),
        }
    }
}

impl ElfImage {
    /// Parse an ELF image from raw bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ElfError> {
        if data.len() < 20 {
            return Err(ElfError::TooShort(data.len()));
        }
        if data[..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic([data[0], data[1], data[2], data[3]]));
        }

        let class = match data[4] {
            1 => Class::Elf32,
            2 => Class::Elf64,
            other => return Err(ElfError::BadClass(other)),
        };
        let encoding = match data[5] {
            1 => Encoding::Lsb,
            2 => Encoding::Msb,
            other => return Err(ElfError::BadEncoding(other)),
        };
        if data[6] != 1 {
            return Err(ElfError::BadVersion(u32::from(data[6])));
        }

        let r = Reader { data, encoding };

        // Field offsets differ between the classes from e_entry onward
        let (entry_off, phoff_off, shoff_off, phentsize_off, phnum_off, shentsize_off, shnum_off) =
            match class {
                Class::Elf32 => (24, 28, 32, 42, 44, 46, 48),
                Class::Elf64 => (24, 32, 40, 54, 56, 58, 60),
            };

        let machine = r.u16(18, "e_machine")?;
        if machine != EM_PPC && machine != EM_PPC64 {
            return Err(ElfError::BadMachine(machine));
        }
        let version = r.u32(20, "e_version")?;
        if version != 1 {
            return Err(ElfError::BadVersion(version));
        }

        let entry = r.addr(entry_off, class, "e_entry")?;
        let phoff = r.addr(phoff_off, class, "e_phoff")? as usize;
        let shoff = r.addr(shoff_off, class, "e_shoff")? as usize;
        let phentsize = r.u16(phentsize_off, "e_phentsize")? as usize;
        let phnum = r.u16(phnum_off, "e_phnum")? as usize;
        let shentsize = r.u16(shentsize_off, "e_shentsize")? as usize;
        let shnum = r.u16(shnum_off, "e_shnum")? as usize;

        let segments = Self::parse_segments(&r, class, phoff, phentsize, phnum)?;
        let symbols = Self::parse_symbols(&r, class, shoff, shentsize, shnum).unwrap_or_default();

        Ok(Self {
            class,
            encoding,
            machine,
            entry,
            segments,
            symbols,
        })
    }

    fn parse_segments(
        r: &Reader<'_>,
        class: Class,
        phoff: usize,
        phentsize: usize,
        phnum: usize,
    ) -> Result<Vec<LoadSegment>, ElfError> {
        let mut segments = Vec::new();
        for i in 0..phnum {
            let base = phoff + i * phentsize;
            let p_type = r.u32(base, "p_type")?;
            if p_type != PT_LOAD {
                continue;
            }
            // 32-bit: type off vaddr paddr filesz memsz flags align
            // 64-bit: type flags off vaddr paddr filesz memsz align
            let (off_off, paddr_off, filesz_off, memsz_off, align_off) = match class {
                Class::Elf32 => (4, 12, 16, 20, 28),
                Class::Elf64 => (8, 24, 32, 40, 48),
            };
            let offset = r.addr(base + off_off, class, "p_offset")? as usize;
            let paddr = r.addr(base + paddr_off, class, "p_paddr")?;
            let filesz = r.addr(base + filesz_off, class, "p_filesz")? as usize;
            let mem_size = r.addr(base + memsz_off, class, "p_memsz")?;
            let align = r.addr(base + align_off, class, "p_align")?;

            if align > 1 && paddr % align != 0 {
                return Err(ElfError::Misaligned { paddr, align });
            }
            let bytes = r.bytes(offset, filesz, "segment contents")?;
            segments.push(LoadSegment {
                paddr,
                data: bytes.to_vec(),
                mem_size,
                align,
            });
        }
        Ok(segments)
    }

    fn parse_symbols(
        r: &Reader<'_>,
        class: Class,
        shoff: usize,
        shentsize: usize,
        shnum: usize,
    ) -> Result<Vec<Symbol>, ElfError> {
        // Section header field offsets: name type flags addr offset size link
        let (type_off, offset_off, size_off, link_off) = match class {
            Class::Elf32 => (4, 16, 20, 24),
            Class::Elf64 => (4, 24, 32, 40),
        };

        let mut symbols = Vec::new();
        for i in 0..shnum {
            let base = shoff + i * shentsize;
            if r.u32(base + type_off, "sh_type")? != SHT_SYMTAB {
                continue;
            }
            let symtab_off = r.addr(base + offset_off, class, "symtab offset")? as usize;
            let symtab_size = r.addr(base + size_off, class, "symtab size")? as usize;
            let link = r.u32(base + link_off, "sh_link")? as usize;

            // The linked string table holds the names
            let str_base = shoff + link * shentsize;
            let strtab_off = r.addr(str_base + offset_off, class, "strtab offset")? as usize;
            let strtab_size = r.addr(str_base + size_off, class, "strtab size")? as usize;
            let strtab = r.bytes(strtab_off, strtab_size, "strtab contents")?;

            let entsize = match class {
                Class::Elf32 => 16,
                Class::Elf64 => 24,
            };
            for j in 0..symtab_size / entsize {
                let sym = symtab_off + j * entsize;
                let name_idx = r.u32(sym, "st_name")? as usize;
                let (value, size) = match class {
                    Class::Elf32 => (
                        u64::from(r.u32(sym + 4, "st_value")?),
                        u64::from(r.u32(sym + 8, "st_size")?),
                    ),
                    Class::Elf64 => (r.u64(sym + 8, "st_value")?, r.u64(sym + 16, "st_size")?),
                };
                let name = read_cstr(strtab, name_idx);
                if name.is_empty() {
                    continue;
                }
                symbols.push(Symbol { name, value, size });
            }
        }
        Ok(symbols)
    }
}

fn read_cstr(strtab: &[u8], start: usize) -> String {
    let Some(tail) = strtab.get(start..) else {
        return String::new();
    };
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    String::from_utf8_lossy(&tail[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Assemble a minimal big-endian ELF32 PPC image with one PT_LOAD.
    fn sample_elf(entry: u32, paddr: u32, payload: &[u8], memsz: u32) -> Vec<u8> {
        let mut elf = vec![0u8; 52];
        elf[..4].copy_from_slice(&ELF_MAGIC);
        elf[4] = 1; // ELFCLASS32
        elf[5] = 2; // big-endian
        elf[6] = 1; // EV_CURRENT
        elf[16..18].copy_from_slice(&2u16.to_be_bytes()); // ET_EXEC
        elf[18..20].copy_from_slice(&EM_PPC.to_be_bytes());
        elf[20..24].copy_from_slice(&1u32.to_be_bytes());
        elf[24..28].copy_from_slice(&entry.to_be_bytes());
        elf[28..32].copy_from_slice(&52u32.to_be_bytes()); // phoff right after header
        elf[42..44].copy_from_slice(&32u16.to_be_bytes()); // phentsize
        elf[44..46].copy_from_slice(&1u16.to_be_bytes()); // phnum

        let mut ph = vec![0u8; 32];
        ph[0..4].copy_from_slice(&1u32.to_be_bytes()); // PT_LOAD
        let data_off = 52 + 32;
        ph[4..8].copy_from_slice(&(data_off as u32).to_be_bytes());
        ph[12..16].copy_from_slice(&paddr.to_be_bytes());
        ph[16..20].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        ph[20..24].copy_from_slice(&memsz.to_be_bytes());
        ph[28..32].copy_from_slice(&4u32.to_be_bytes()); // align

        elf.extend_from_slice(&ph);
        elf.extend_from_slice(payload);
        elf
    }

    #[test]
    fn parses_segments_and_entry() {
        let image = sample_elf(0x8001_0000, 0x8001_0000, &[1, 2, 3, 4], 16);
        let elf = ElfImage::from_bytes(&image).unwrap();
        assert_eq!(elf.entry, 0x8001_0000);
        assert_eq!(elf.machine, EM_PPC);
        assert_eq!(elf.class, Class::Elf32);
        assert_eq!(elf.encoding, Encoding::Msb);
        assert_eq!(elf.segments.len(), 1);
        assert_eq!(elf.segments[0].data, vec![1, 2, 3, 4]);
        assert_eq!(elf.segments[0].mem_size, 16);
    }

    #[test]
    fn rejects_bad_magic_and_machine() {
        assert!(matches!(
            ElfImage::from_bytes(&[0u8; 64]),
            Err(ElfError::BadMagic(_))
        ));

        let mut image = sample_elf(0, 0, &[], 0);
        image[18..20].copy_from_slice(&62u16.to_be_bytes()); // x86-64
        assert!(matches!(
            ElfImage::from_bytes(&image),
            Err(ElfError::BadMachine(62))
        ));
    }

    #[test]
    fn rejects_misaligned_segment() {
        let image = sample_elf(0, 0x8001_0002, &[1, 2], 2);
        assert!(matches!(
            ElfImage::from_bytes(&image),
            Err(ElfError::Misaligned { .. })
        ));
    }

    #[test]
    fn magic_probe() {
        assert!(looks_like_elf(&sample_elf(0, 0, &[], 0)));
        assert!(!looks_like_elf(&[0, 1, 2, 3, 4]));
    }
}

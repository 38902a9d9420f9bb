//! Reads the metadata the resolver needs out of one ELF file: format kind,
//! interpreter declaration, machine, OS ABI, segment count, `DT_NEEDED`
//! names and the declared search path (`DT_RUNPATH` preferred over the
//! legacy `DT_RPATH`).

use std::fs;
use std::path::Path;
use std::str;

use anyhow::{anyhow, Context, Result};
use object::elf::{
    FileHeader32, FileHeader64, DT_NEEDED, DT_NULL, DT_RPATH, DT_RUNPATH, DT_STRSZ, DT_STRTAB,
    ELFOSABI_FREEBSD, ELFOSABI_GNU, ELFOSABI_NETBSD, ELFOSABI_NONE, ELFOSABI_OPENBSD,
    ELFOSABI_SOLARIS, EM_386, EM_AARCH64, EM_ARM, EM_LOONGARCH, EM_MIPS, EM_PPC64, EM_RISCV,
    EM_S390, EM_X86_64, ET_EXEC, PT_DYNAMIC, PT_INTERP,
};
use object::read::elf::{Dyn, FileHeader, ProgramHeader};
use object::read::StringTable;
use object::Endianness;

/// Metadata of one artifact. Constructed per file, consumed by the cache or
/// the planner, then dropped.
#[derive(Debug)]
pub struct ElfMeta {
    /// `e_type == ET_EXEC`. Position-independent executables are `ET_DYN`
    /// and are recognized by `has_interp` instead.
    pub is_exec: bool,
    pub has_interp: bool,
    pub machine: u16,
    pub osabi: u8,
    pub segments: usize,
    pub needed: Vec<String>,
    pub search_paths: Vec<String>,
}

pub fn read_meta(path: &Path) -> Result<ElfMeta> {
    let data = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    parse_meta(&data)
}

pub fn parse_meta(data: &[u8]) -> Result<ElfMeta> {
    match object::FileKind::parse(data) {
        Ok(object::FileKind::Elf32) => {
            let header = FileHeader32::<Endianness>::parse(data)
                .map_err(|err| anyhow!("parse ELF32 header: {err}"))?;
            parse_header(header, data)
        }
        Ok(object::FileKind::Elf64) => {
            let header = FileHeader64::<Endianness>::parse(data)
                .map_err(|err| anyhow!("parse ELF64 header: {err}"))?;
            parse_header(header, data)
        }
        Ok(kind) => Err(anyhow!("not an ELF file ({kind:?})")),
        Err(err) => Err(anyhow!("unrecognized binary: {err}")),
    }
}

fn parse_header<Elf: FileHeader<Endian = Endianness>>(header: &Elf, data: &[u8]) -> Result<ElfMeta> {
    let endian = header.endian().map_err(|err| anyhow!("invalid endianness: {err}"))?;
    let segments = header
        .program_headers(endian, data)
        .map_err(|err| anyhow!("invalid program headers: {err}"))?;

    let has_interp = segments
        .iter()
        .any(|segment| segment.p_type(endian) == PT_INTERP);

    let (needed, search_paths) = segments
        .iter()
        .find(|segment| segment.p_type(endian) == PT_DYNAMIC)
        .and_then(|segment| segment.dynamic(endian, data).ok().flatten())
        .map(|entries| dynamic_info::<Elf>(endian, data, segments, entries))
        .unwrap_or_default();

    Ok(ElfMeta {
        is_exec: header.e_type(endian) == ET_EXEC,
        has_interp,
        machine: header.e_machine(endian),
        osabi: header.e_ident().os_abi,
        segments: segments.len(),
        needed,
        search_paths,
    })
}

fn dynamic_info<Elf: FileHeader>(
    endian: Elf::Endian,
    data: &[u8],
    segments: &[Elf::ProgramHeader],
    entries: &[Elf::Dyn],
) -> (Vec<String>, Vec<String>) {
    let mut strtab = 0;
    let mut strsz = 0;
    for entry in entries {
        let tag: u64 = entry.d_tag(endian).into();
        if tag == u64::from(DT_STRTAB) {
            strtab = entry.d_val(endian).into();
        } else if tag == u64::from(DT_STRSZ) {
            strsz = entry.d_val(endian).into();
        }
    }
    let Some(dynstr) = string_table::<Elf>(endian, data, segments, strtab, strsz) else {
        return (Vec::new(), Vec::new());
    };

    let mut needed = Vec::new();
    let mut runpath = None;
    let mut rpath = None;
    for entry in entries {
        let tag64: u64 = entry.d_tag(endian).into();
        if tag64 == u64::from(DT_NULL) {
            break;
        }
        let Some(tag) = entry.tag32(endian) else {
            continue;
        };
        if !matches!(tag, DT_NEEDED | DT_RUNPATH | DT_RPATH) {
            continue;
        }
        let Ok(bytes) = entry.string(endian, dynstr) else {
            continue;
        };
        let Ok(value) = str::from_utf8(bytes) else {
            continue;
        };
        match tag {
            DT_NEEDED => needed.push(value.to_string()),
            DT_RUNPATH => runpath = Some(value.to_string()),
            _ => rpath = Some(value.to_string()),
        }
    }

    let search_paths = runpath
        .or(rpath)
        .map(|paths| {
            paths
                .split(':')
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    (needed, search_paths)
}

fn string_table<'data, Elf: FileHeader>(
    endian: Elf::Endian,
    data: &'data [u8],
    segments: &[Elf::ProgramHeader],
    strtab: u64,
    strsz: u64,
) -> Option<StringTable<'data>> {
    for segment in segments {
        if let Ok(Some(part)) = segment.data_range(endian, data, strtab, strsz) {
            return Some(StringTable::new(part, 0, part.len() as u64));
        }
    }
    None
}

/// OS ABI compatibility. The base ABI (`ELFOSABI_NONE`, readelf's
/// "UNIX - System V") is broadly compatible in both directions; anything
/// else must match exactly.
pub fn osabi_compatible(wanted: u8, got: u8) -> bool {
    wanted == ELFOSABI_NONE || got == ELFOSABI_NONE || wanted == got
}

pub fn machine_name(machine: u16) -> String {
    match machine {
        EM_386 => "i386",
        EM_ARM => "arm",
        EM_MIPS => "mips",
        EM_PPC64 => "ppc64",
        EM_S390 => "s390",
        EM_X86_64 => "x86_64",
        EM_AARCH64 => "aarch64",
        EM_RISCV => "riscv",
        EM_LOONGARCH => "loongarch",
        other => return format!("machine({other})"),
    }
    .to_string()
}

pub fn osabi_name(osabi: u8) -> String {
    match osabi {
        ELFOSABI_NONE => "UNIX - System V",
        ELFOSABI_GNU => "GNU/Linux",
        ELFOSABI_FREEBSD => "FreeBSD",
        ELFOSABI_NETBSD => "NetBSD",
        ELFOSABI_OPENBSD => "OpenBSD",
        ELFOSABI_SOLARIS => "Solaris",
        other => return format!("osabi({other})"),
    }
    .to_string()
}

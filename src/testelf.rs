//! Minimal little-endian ELF64 image builder so tests exercise the reader,
//! the cache, and the planner against real on-disk binaries.

use std::fs;
use std::path::Path;

const EHSIZE: usize = 64;
const PHENTSIZE: usize = 56;

const ET_REL: u16 = 1;
const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;

#[derive(Clone, Copy)]
enum Kind {
    Exec,
    Dyn,
    Rel,
}

#[derive(Clone)]
pub struct Image {
    machine: u16,
    osabi: u8,
    kind: Kind,
    interp: bool,
    dynamic: bool,
    needed: Vec<String>,
    runpath: Option<String>,
    rpath: Option<String>,
}

impl Image {
    fn new(machine: u16, osabi: u8, kind: Kind, interp: bool, dynamic: bool) -> Self {
        Image {
            machine,
            osabi,
            kind,
            interp,
            dynamic,
            needed: Vec::new(),
            runpath: None,
            rpath: None,
        }
    }

    /// Shared library: `ET_DYN`, no interpreter.
    pub fn library(machine: u16, osabi: u8) -> Self {
        Image::new(machine, osabi, Kind::Dyn, false, true)
    }

    /// Dynamically linked (PIE-style) executable: `ET_DYN` with `PT_INTERP`.
    pub fn executable(machine: u16, osabi: u8) -> Self {
        Image::new(machine, osabi, Kind::Dyn, true, true)
    }

    /// Statically linked executable: `ET_EXEC`, no interpreter, no dynamic
    /// segment.
    pub fn static_executable(machine: u16, osabi: u8) -> Self {
        Image::new(machine, osabi, Kind::Exec, false, false)
    }

    /// Relocatable object: no program headers at all.
    pub fn relocatable(machine: u16, osabi: u8) -> Self {
        Image::new(machine, osabi, Kind::Rel, false, false)
    }

    pub fn needed(mut self, names: &[&str]) -> Self {
        self.needed = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn runpath(mut self, paths: &str) -> Self {
        self.runpath = Some(paths.to_string());
        self
    }

    pub fn rpath(mut self, paths: &str) -> Self {
        self.rpath = Some(paths.to_string());
        self
    }

    pub fn write(&self, path: &Path) {
        fs::write(path, self.build()).unwrap();
    }

    pub fn build(&self) -> Vec<u8> {
        let rel = matches!(self.kind, Kind::Rel);
        let mut phnum = 0usize;
        if !rel {
            phnum += 1; // PT_LOAD
            if self.interp {
                phnum += 1;
            }
            if self.dynamic {
                phnum += 1;
            }
        }

        // String table with offsets for every name it holds.
        let mut dynstr = vec![0u8];
        let mut needed_offs = Vec::new();
        for name in &self.needed {
            needed_offs.push(dynstr.len() as u64);
            dynstr.extend_from_slice(name.as_bytes());
            dynstr.push(0);
        }
        let mut str_off = |value: &Option<String>, dynstr: &mut Vec<u8>| {
            value.as_ref().map(|v| {
                let off = dynstr.len() as u64;
                dynstr.extend_from_slice(v.as_bytes());
                dynstr.push(0);
                off
            })
        };
        let runpath_off = str_off(&self.runpath, &mut dynstr);
        let rpath_off = str_off(&self.rpath, &mut dynstr);

        let interp_bytes: &[u8] = b"/lib/ld-test.so\0";
        let phdrs_end = EHSIZE + phnum * PHENTSIZE;
        let interp_off = phdrs_end;
        let interp_len = if self.interp { interp_bytes.len() } else { 0 };
        let dynstr_off = interp_off + interp_len;
        let mut dyn_off = dynstr_off + dynstr.len();
        dyn_off += (8 - dyn_off % 8) % 8;

        let mut dynamic: Vec<(u64, u64)> = Vec::new();
        if self.dynamic {
            for off in &needed_offs {
                dynamic.push((1, *off)); // DT_NEEDED
            }
            if let Some(off) = runpath_off {
                dynamic.push((29, off)); // DT_RUNPATH
            }
            if let Some(off) = rpath_off {
                dynamic.push((15, off)); // DT_RPATH
            }
            dynamic.push((5, dynstr_off as u64)); // DT_STRTAB
            dynamic.push((10, dynstr.len() as u64)); // DT_STRSZ
            dynamic.push((0, 0)); // DT_NULL
        }
        let dyn_len = dynamic.len() * 16;
        let total = dyn_off + dyn_len;

        let mut out = Vec::with_capacity(total);
        // e_ident: magic, ELFCLASS64, ELFDATA2LSB, EV_CURRENT, osabi, pad.
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, self.osabi]);
        out.extend_from_slice(&[0u8; 8]);
        let e_type = match self.kind {
            Kind::Exec => ET_EXEC,
            Kind::Dyn => ET_DYN,
            Kind::Rel => ET_REL,
        };
        p16(&mut out, e_type);
        p16(&mut out, self.machine);
        p32(&mut out, 1); // e_version
        p64(&mut out, 0); // e_entry
        p64(&mut out, if phnum > 0 { EHSIZE as u64 } else { 0 }); // e_phoff
        p64(&mut out, 0); // e_shoff
        p32(&mut out, 0); // e_flags
        p16(&mut out, EHSIZE as u16);
        p16(&mut out, PHENTSIZE as u16);
        p16(&mut out, phnum as u16);
        p16(&mut out, 0); // e_shentsize
        p16(&mut out, 0); // e_shnum
        p16(&mut out, 0); // e_shstrndx

        if !rel {
            // PT_LOAD mapping the whole file at vaddr 0, so string-table
            // addresses equal file offsets.
            phdr(&mut out, 1, 5, 0, total as u64, 0x1000);
            if self.interp {
                phdr(&mut out, 3, 4, interp_off as u64, interp_len as u64, 1);
            }
            if self.dynamic {
                phdr(&mut out, 2, 6, dyn_off as u64, dyn_len as u64, 8);
            }
        }

        if self.interp {
            out.extend_from_slice(interp_bytes);
        }
        out.extend_from_slice(&dynstr);
        out.resize(dyn_off, 0);
        for (tag, val) in dynamic {
            p64(&mut out, tag);
            p64(&mut out, val);
        }

        debug_assert_eq!(out.len(), total);
        out
    }
}

fn p16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn p32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn p64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn phdr(out: &mut Vec<u8>, p_type: u32, p_flags: u32, offset: u64, size: u64, align: u64) {
    p32(out, p_type);
    p32(out, p_flags);
    p64(out, offset); // p_offset
    p64(out, offset); // p_vaddr
    p64(out, offset); // p_paddr
    p64(out, size); // p_filesz
    p64(out, size); // p_memsz
    p64(out, align);
}

use std::path::PathBuf;

use serde::Serialize;

pub const REPORT_SCHEMA_VERSION: &str = "auto-patchelf.report@0.1.0";

/// Verbosity-gated stderr output. Warnings and errors always print; `-v`
/// adds progress, `-vv` the per-file resolution trace.
#[derive(Debug, Clone, Copy)]
pub struct Reporter {
    verbosity: u8,
}

impl Reporter {
    pub fn new(verbosity: u8) -> Self {
        Reporter { verbosity }
    }

    pub fn debug(&self, msg: &str) {
        if self.verbosity >= 2 {
            eprintln!("{msg}");
        }
    }

    pub fn info(&self, msg: &str) {
        if self.verbosity >= 1 {
            eprintln!("{msg}");
        }
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("warning: {msg}");
    }

    pub fn error(&self, msg: &str) {
        eprintln!("error: {msg}");
    }
}

/// Machine-readable outcome of one batch, printed with `--json`.
#[derive(Debug, Serialize)]
pub struct Report {
    pub schema_version: String,
    pub ok: bool,
    pub patched: usize,
    pub missing: Vec<MissingDependency>,
}

impl Report {
    pub fn new(ok: bool, patched: usize, missing: Vec<MissingDependency>) -> Self {
        Report {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            ok,
            patched,
            missing,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MissingDependency {
    pub file: PathBuf,
    pub name: String,
    pub ignored: bool,
}

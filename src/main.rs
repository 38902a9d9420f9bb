mod cache;
mod elf;
mod patch;
mod planner;
mod report;
mod scan;
#[cfg(test)]
mod testelf;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;

use crate::patch::{BatchOptions, PatchContext};
use crate::report::Reporter;

/// auto-patchelf tries as hard as possible to patch the provided binary
/// files by looking for compatible libraries in the provided paths.
#[derive(Debug, Parser)]
#[command(name = "auto-patchelf")]
struct Cli {
    /// Paths whose content needs to be patched. Single files and directories
    /// are accepted. Directories are traversed recursively by default.
    #[arg(long, value_name = "PATH", num_args = 0..)]
    paths: Vec<PathBuf>,

    /// Paths where libraries are searched for. Single files and directories
    /// are accepted. Directories are not searched recursively.
    #[arg(long, value_name = "PATH", num_args = 0..)]
    libs: Vec<PathBuf>,

    /// Paths to prepend to the runtime path of executable binaries.
    /// Subject to deduplication, which may imply some reordering.
    #[arg(long, value_name = "PATH", num_args = 0..)]
    runtime_dependencies: Vec<PathBuf>,

    /// Paths to append to all runtime paths unconditionally.
    #[arg(long, value_name = "PATH", num_args = 0..)]
    append_rpaths: Vec<PathBuf>,

    /// Do not fail when dependencies matching these patterns are not found.
    #[arg(long, value_name = "GLOB", num_args = 0..)]
    ignore_missing: Vec<String>,

    /// Disable the recursive traversal of paths to patch.
    #[arg(long)]
    no_recurse: bool,

    /// Path to the patchelf binary.
    #[arg(long, value_name = "PATH", default_value = "patchelf")]
    patchelf: PathBuf,

    /// Path to the bintools package supplying the dynamic linker and libc
    /// locations. Defaults to $NIX_BINTOOLS.
    #[arg(long, value_name = "PATH")]
    bintools: Option<PathBuf>,

    /// Print a machine-readable run report to stdout.
    #[arg(long)]
    json: bool,

    /// Increase output verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let reporter = Reporter::new(cli.verbose);

    let bintools = effective_bintools(cli.bintools)?;
    let ctx = toolchain_context(&bintools, cli.patchelf)?;

    let opts = BatchOptions {
        paths: cli.paths,
        libs: cli.libs,
        runtime_deps: cli.runtime_dependencies,
        append_rpaths: cli.append_rpaths,
        ignore_missing: cli.ignore_missing,
        recursive: !cli.no_recurse,
    };

    let report = patch::run_batch(&ctx, &opts, &reporter)?;
    if cli.json {
        println!("{}", serde_json::to_string(&report)?);
    }

    if !report.ok {
        eprintln!(
            "auto-patchelf failed to find all the required dependencies.\n\
             Add the missing dependencies to --libs or use \
             `--ignore-missing=\"foo.so.1 bar.so etc.so\"`."
        );
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn effective_bintools(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path);
    }
    if let Some(value) = std::env::var_os("NIX_BINTOOLS") {
        if !value.is_empty() {
            return Ok(PathBuf::from(value));
        }
    }
    bail!("failed to find bintools (pass --bintools or set NIX_BINTOOLS)");
}

/// Reads the toolchain description: the default dynamic linker path and the
/// libc location, then the linker binary itself for the target machine and
/// OS ABI every patched artifact must be compatible with.
fn toolchain_context(bintools: &Path, patchelf: PathBuf) -> Result<PatchContext> {
    let nix_support = bintools.join("nix-support");

    let dynamic_linker = nix_support.join("dynamic-linker");
    let interpreter = PathBuf::from(
        fs::read_to_string(&dynamic_linker)
            .with_context(|| format!("read {}", dynamic_linker.display()))?
            .trim(),
    );

    let orig_libc = nix_support.join("orig-libc");
    let libc_lib = PathBuf::from(
        fs::read_to_string(&orig_libc)
            .with_context(|| format!("read {}", orig_libc.display()))?
            .trim(),
    )
    .join("lib");

    let meta = elf::read_meta(&interpreter).with_context(|| {
        format!(
            "determine target properties from interpreter {}",
            interpreter.display()
        )
    })?;

    Ok(PatchContext {
        interpreter,
        interpreter_machine: meta.machine,
        interpreter_osabi: meta.osabi,
        libc_lib,
        patchelf,
    })
}

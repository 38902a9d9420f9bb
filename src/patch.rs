//! Batch orchestration: builds the library cache, plans every target file,
//! applies non-empty plans through the external patchelf tool, and
//! aggregates unresolved dependencies so one run surfaces the complete set
//! of missing libraries.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::cache::LibraryCache;
use crate::planner::{self, DependencyRecord, PatchPlan};
use crate::report::{MissingDependency, Report, Reporter};
use crate::scan;

/// Immutable per-run configuration resolved from the toolchain metadata.
#[derive(Debug, Clone)]
pub struct PatchContext {
    pub interpreter: PathBuf,
    pub interpreter_machine: u16,
    pub interpreter_osabi: u8,
    pub libc_lib: PathBuf,
    pub patchelf: PathBuf,
}

/// Batch inputs, one field per CLI flag.
#[derive(Debug, Default)]
pub struct BatchOptions {
    pub paths: Vec<PathBuf>,
    pub libs: Vec<PathBuf>,
    pub runtime_deps: Vec<PathBuf>,
    pub append_rpaths: Vec<PathBuf>,
    pub ignore_missing: Vec<String>,
    pub recursive: bool,
}

pub fn run_batch(ctx: &PatchContext, opts: &BatchOptions, reporter: &Reporter) -> Result<Report> {
    if opts.paths.is_empty() {
        bail!("no paths to patch, stopping");
    }

    let ignore = ignore_set(&opts.ignore_missing)?;

    // Artifact roots are cached before --libs so that a library shipped in
    // the output wins over an external copy of the same name.
    let mut cache = LibraryCache::new();
    cache.populate(&opts.paths, opts.recursive, reporter);
    cache.populate(&opts.libs, false, reporter);

    let mut records: Vec<DependencyRecord> = Vec::new();
    let mut patched = 0;
    for root in &opts.paths {
        for file in scan::patch_targets(root, opts.recursive) {
            let (plan, file_records) = planner::plan_file(
                ctx,
                &file,
                &cache,
                &opts.runtime_deps,
                &opts.append_rpaths,
                reporter,
            );
            if !plan.is_empty() {
                apply_plan(ctx, &plan, reporter)?;
                patched += 1;
            }
            records.extend(file_records);
        }
    }

    let missing: Vec<&DependencyRecord> = records.iter().filter(|rec| !rec.found).collect();
    reporter.info(&format!(
        "{} dependencies could not be satisfied",
        missing.len()
    ));

    let mut ok = true;
    let mut report_missing = Vec::new();
    for rec in missing {
        let bare = Path::new(&rec.name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(rec.name.as_str());
        let ignored = ignore.is_match(bare);
        if ignored {
            reporter.warn(&format!(
                "ignoring missing {} wanted by {}",
                rec.name,
                rec.file.display()
            ));
        } else {
            reporter.error(&format!(
                "could not satisfy dependency {} wanted by {}",
                rec.name,
                rec.file.display()
            ));
            ok = false;
        }
        report_missing.push(MissingDependency {
            file: rec.file.clone(),
            name: rec.name.clone(),
            ignored,
        });
    }

    Ok(Report::new(ok, patched, report_missing))
}

/// Rewrites one artifact through patchelf. A non-zero exit is fatal for the
/// whole batch.
fn apply_plan(ctx: &PatchContext, plan: &PatchPlan, reporter: &Reporter) -> Result<()> {
    let mut cmd = Command::new(&ctx.patchelf);
    if let Some(interpreter) = &plan.interpreter {
        cmd.arg("--set-interpreter").arg(interpreter);
    }
    if !plan.rpath.is_empty() {
        let joined = plan
            .rpath
            .iter()
            .map(|dir| dir.to_string_lossy())
            .collect::<Vec<_>>()
            .join(":");
        reporter.debug(&format!(
            "setting RPATH of {} to {joined}",
            plan.path.display()
        ));
        cmd.arg("--set-rpath").arg(joined);
    }
    cmd.arg(&plan.path);

    let status = cmd
        .status()
        .with_context(|| format!("exec {}", ctx.patchelf.display()))?;
    if !status.success() {
        bail!(
            "{} failed on {} ({status})",
            ctx.patchelf.display(),
            plan.path.display()
        );
    }
    Ok(())
}

fn ignore_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .with_context(|| format!("invalid --ignore-missing pattern {pattern:?}"))?,
        );
    }
    Ok(builder.build()?)
}

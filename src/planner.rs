//! Per-artifact decision procedure. Planning only reads the artifact and
//! queries the cache; applying a plan is the orchestrator's job, so this
//! stage stays pure and independently testable.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::cache::LibraryCache;
use crate::elf;
use crate::patch::PatchContext;
use crate::report::Reporter;

/// Everything that must be rewritten in one artifact. An empty plan means
/// the file needs no mutation.
#[derive(Debug, Default)]
pub struct PatchPlan {
    pub path: PathBuf,
    pub interpreter: Option<PathBuf>,
    pub rpath: Vec<PathBuf>,
}

impl PatchPlan {
    fn empty(path: &Path) -> Self {
        PatchPlan {
            path: path.to_path_buf(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.interpreter.is_none() && self.rpath.is_empty()
    }
}

/// One required dependency of one artifact and whether anything satisfies it.
#[derive(Debug, Clone)]
pub struct DependencyRecord {
    pub file: PathBuf,
    pub name: String,
    pub found: bool,
}

/// Decides what must be rewritten in `path`. Unreadable, statically linked,
/// segment-less, or target-incompatible files yield an empty plan and no
/// records.
pub fn plan_file(
    ctx: &PatchContext,
    path: &Path,
    cache: &LibraryCache,
    runtime_deps: &[PathBuf],
    append_rpaths: &[PathBuf],
    reporter: &Reporter,
) -> (PatchPlan, Vec<DependencyRecord>) {
    let skip = (PatchPlan::empty(path), Vec::new());

    let Ok(meta) = elf::read_meta(path) else {
        return skip;
    };

    if meta.is_exec && !meta.has_interp {
        reporter.debug(&format!(
            "skipping {} because it is statically linked",
            path.display()
        ));
        return skip;
    }

    if meta.segments == 0 {
        reporter.debug(&format!(
            "skipping {} because it contains no segment",
            path.display()
        ));
        return skip;
    }

    if meta.machine != ctx.interpreter_machine {
        reporter.debug(&format!(
            "skipping {} because its architecture ({}) differs from target ({})",
            path.display(),
            elf::machine_name(meta.machine),
            elf::machine_name(ctx.interpreter_machine)
        ));
        return skip;
    }

    if !elf::osabi_compatible(ctx.interpreter_osabi, meta.osabi) {
        reporter.debug(&format!(
            "skipping {} because its OS ABI ({}) is not compatible with target ({})",
            path.display(),
            elf::osabi_name(meta.osabi),
            elf::osabi_name(ctx.interpreter_osabi)
        ));
        return skip;
    }

    let (mut plan, _) = skip;
    let mut records = Vec::new();

    if meta.has_interp {
        reporter.debug(&format!("setting interpreter of {}", path.display()));
        plan.interpreter = Some(ctx.interpreter.clone());
        plan.rpath.extend(runtime_deps.iter().cloned());
    }

    reporter.debug(&format!("searching for dependencies of {}", path.display()));

    // Keep going after a miss so one run reports every missing library.
    for dep in &meta.needed {
        let dep_path = Path::new(dep);

        if dep_path.is_absolute() && dep_path.is_file() {
            // The linker finds this one without help; if it goes missing
            // later, rewriting the rpath would not satisfy it either.
            continue;
        }
        if ctx.libc_lib.join(dep_path).is_file() {
            // Present in the system libc directory, resolved by the linker.
            continue;
        }

        let name = dep_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(dep.as_str());
        match cache.find_dependency(name, meta.machine, meta.osabi) {
            Some(found) => {
                reporter.debug(&format!("    {dep} -> found: {}", found.display()));
                plan.rpath.push(found.to_path_buf());
                records.push(DependencyRecord {
                    file: path.to_path_buf(),
                    name: dep.clone(),
                    found: true,
                });
            }
            None => {
                reporter.debug(&format!("    {dep} -> not found!"));
                records.push(DependencyRecord {
                    file: path.to_path_buf(),
                    name: dep.clone(),
                    found: false,
                });
            }
        }
    }

    plan.rpath.extend(append_rpaths.iter().cloned());

    let mut seen = HashSet::new();
    plan.rpath.retain(|dir| seen.insert(dir.clone()));

    (plan, records)
}

//! Cache of discovered shared libraries, keyed by (file name, machine).
//! Candidates keep directory-scan order and the list is never reordered, so
//! the first compatible candidate always wins at lookup time. That ordering
//! is what makes in-output libraries beat externally supplied ones and
//! earlier-listed directories beat later ones.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use crate::elf;
use crate::report::Reporter;
use crate::scan;

#[derive(Debug, Default)]
pub struct LibraryCache {
    visited: HashSet<PathBuf>,
    entries: HashMap<(String, u16), Vec<Candidate>>,
}

#[derive(Debug)]
struct Candidate {
    dir: PathBuf,
    osabi: u8,
}

impl LibraryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans `initial` for shared objects and records them. Absolute search
    /// path entries declared by a discovered library are queued for scanning
    /// too, so libraries pull in the directories that satisfy their own
    /// dependencies. A directory is marked visited before it is scanned,
    /// which terminates mutually referencing search paths. Files that are
    /// not parseable ELF are ignored.
    pub fn populate(&mut self, initial: &[PathBuf], recursive: bool, reporter: &Reporter) {
        let mut queue: VecDeque<PathBuf> = initial.iter().cloned().collect();

        while let Some(dir) = queue.pop_front() {
            if !self.visited.insert(dir.clone()) {
                continue;
            }

            for path in scan::shared_objects(&dir, recursive) {
                let Ok(meta) = elf::read_meta(&path) else {
                    continue;
                };

                for entry in &meta.search_paths {
                    if entry.contains("$ORIGIN") {
                        continue;
                    }
                    let entry = Path::new(entry);
                    if entry.is_absolute() {
                        queue.push_back(entry.to_path_buf());
                    }
                }

                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let exposed = candidate_dir(&path);
                reporter.debug(&format!(
                    "caching {} ({}) found in {}",
                    name,
                    elf::machine_name(meta.machine),
                    exposed.display()
                ));
                self.entries
                    .entry((name.to_string(), meta.machine))
                    .or_default()
                    .push(Candidate {
                        dir: exposed,
                        osabi: meta.osabi,
                    });
            }
        }
    }

    /// Directory of the first candidate for `name` on `machine` whose OS ABI
    /// is compatible with the requesting artifact's.
    pub fn find_dependency(&self, name: &str, machine: u16, osabi: u8) -> Option<&Path> {
        self.entries
            .get(&(name.to_string(), machine))?
            .iter()
            .find(|candidate| elf::osabi_compatible(osabi, candidate.osabi))
            .map(|candidate| candidate.dir.as_path())
    }
}

/// Directory a discovered library is exposed under. A pure alias (a symlink
/// whose target keeps the same base name) collapses to the target's
/// directory; a version-suffixed target does not, since that directory is
/// not known to carry the alias name.
fn candidate_dir(path: &Path) -> PathBuf {
    let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let owner = if resolved.file_name() == path.file_name() {
        resolved.as_path()
    } else {
        path
    };
    match owner.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

//! Filesystem enumeration. Roots may be directories or single files; a file
//! root is matched against the same rules as a directory entry would be.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};
use once_cell::sync::Lazy;
use walkdir::WalkDir;

/// Bare-name pattern a discoverable shared object must match.
pub const SHARED_OBJECT_GLOB: &str = "*.so*";

static SHARED_OBJECT_MATCHER: Lazy<GlobMatcher> = Lazy::new(|| {
    Glob::new(SHARED_OBJECT_GLOB)
        .expect("static glob")
        .compile_matcher()
});

fn walk_files(root: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }
    walker
        .into_iter()
        .flatten()
        .map(walkdir::DirEntry::into_path)
        .filter(|path| path.is_file())
        .collect()
}

/// Shared-object candidates under `root`. Symlinks to regular files are
/// included; the cache decides which directory an alias is exposed under.
pub fn shared_objects(root: &Path, recursive: bool) -> Vec<PathBuf> {
    walk_files(root, recursive)
        .into_iter()
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| SHARED_OBJECT_MATCHER.is_match(name))
        })
        .collect()
}

/// Regular files under `root` that are candidates for patching. Symlinks
/// are skipped; their targets are visited on their own.
pub fn patch_targets(root: &Path, recursive: bool) -> Vec<PathBuf> {
    walk_files(root, recursive)
        .into_iter()
        .filter(|path| !path.is_symlink())
        .collect()
}

use std::path::{Path, PathBuf};

use crate::{
    config::PathFilter,
    error::{Error, Result},
};

/// Walk `root` and return the canonical paths of every file accepted by
/// `filter`, sorted.
///
/// Hidden directories (names starting with `.`) are never entered. Without
/// `recursive` only the files directly under `root` are returned. Any
/// failure to list a directory aborts the walk.
pub fn discover_files(
    root: &Path,
    recursive: bool,
    filter: &PathFilter,
) -> Result<Vec<PathBuf>> {
    let canonical_root =
        root.canonicalize().map_err(|source| Error::Traversal {
            path: root.to_path_buf(),
            source,
        })?;

    let mut results = Vec::new();
    walk_dir(&canonical_root, recursive, filter, &mut results)?;
    results.sort();
    results.dedup();
    Ok(results)
}

fn walk_dir(
    current: &Path,
    recursive: bool,
    filter: &PathFilter,
    results: &mut Vec<PathBuf>,
) -> Result<()> {
    let traversal = |source| Error::Traversal {
        path: current.to_path_buf(),
        source,
    };

    for entry in std::fs::read_dir(current).map_err(traversal)? {
        let entry = entry.map_err(traversal)?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(traversal)?;

        if file_type.is_dir() {
            if recursive && !is_hidden(&path) {
                walk_dir(&path, recursive, filter, results)?;
            }
        } else if file_type.is_symlink() {
            let Ok(resolved) = path.canonicalize() else {
                continue; // broken link
            };
            // Links to directories are not followed, which also rules out
            // cycles back into the tree.
            if resolved.is_file() && filter.matches(&resolved) {
                results.push(resolved);
            }
        } else if file_type.is_file() && filter.matches(&path) {
            results.push(path.canonicalize().map_err(traversal)?);
        }
    }

    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(root: &Path, files: &[PathBuf]) -> Vec<String> {
        let root = root.canonicalize().unwrap();
        files
            .iter()
            .map(|f| f.strip_prefix(&root).unwrap().to_string_lossy().into())
            .collect()
    }

    fn go_only() -> PathFilter {
        PathFilter::new(&["*.go".to_string()], &[]).unwrap()
    }

    #[test]
    fn applies_include_patterns() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("main.go"), "func main").unwrap();
        std::fs::write(tmp.path().join("image.png"), "binary").unwrap();

        let files = discover_files(tmp.path(), true, &go_only()).unwrap();
        assert_eq!(names(tmp.path(), &files), vec!["main.go"]);
    }

    #[test]
    fn recursion_is_optional() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("pkg");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("deep.go"), "deep").unwrap();
        std::fs::write(tmp.path().join("top.go"), "top").unwrap();

        let all = discover_files(tmp.path(), true, &go_only()).unwrap();
        assert_eq!(names(tmp.path(), &all), vec!["pkg/deep.go", "top.go"]);

        let flat = discover_files(tmp.path(), false, &go_only()).unwrap();
        assert_eq!(names(tmp.path(), &flat), vec!["top.go"]);
    }

    #[test]
    fn skips_hidden_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".cache");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("gen.go"), "generated").unwrap();
        std::fs::write(tmp.path().join("lib.go"), "lib").unwrap();

        let files = discover_files(tmp.path(), true, &go_only()).unwrap();
        assert_eq!(names(tmp.path(), &files), vec!["lib.go"]);
    }

    #[test]
    fn exclude_patterns_prune_subtrees() {
        let tmp = tempfile::tempdir().unwrap();
        let vendor = tmp.path().join("vendor").join("dep");
        std::fs::create_dir_all(&vendor).unwrap();
        std::fs::write(vendor.join("x.go"), "x").unwrap();
        std::fs::write(tmp.path().join("y.go"), "y").unwrap();

        let filter = PathFilter::new(
            &["*.go".to_string()],
            &["vendor/*".to_string()],
        )
        .unwrap();
        let files = discover_files(tmp.path(), true, &filter).unwrap();
        assert_eq!(names(tmp.path(), &files), vec!["y.go"]);
    }

    #[test]
    fn missing_root_is_a_traversal_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = discover_files(
            &tmp.path().join("missing"),
            true,
            &PathFilter::allow_all(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Traversal { .. }));
    }

    #[test]
    fn results_are_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["z.go", "a.go", "m.go"] {
            std::fs::write(tmp.path().join(name), name).unwrap();
        }

        let files = discover_files(tmp.path(), true, &go_only()).unwrap();
        assert_eq!(names(tmp.path(), &files), vec!["a.go", "m.go", "z.go"]);
    }
}

use crate::error::{Result, SplitError};
use std::path::{Component, Path, PathBuf};

/// A part name from a descriptor must name a file directly inside the
/// parts directory: one normal path component, no separators of either
/// platform, no NUL.
pub fn validate_part_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("empty part file name".to_string());
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(format!("part file name contains a path separator: {name:?}"));
    }
    let mut comps = Path::new(name).components();
    match (comps.next(), comps.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(format!("part file name is not a plain file name: {name:?}")),
    }
}

/// Join `name` onto `dir` after validating it. A symlinked part is
/// followed only while its target stays under `dir`.
pub fn resolve_part(dir: &Path, name: &str) -> Result<PathBuf> {
    validate_part_name(name).map_err(SplitError::InvalidDescriptor)?;
    let candidate = dir.join(name);
    if let Ok(meta) = std::fs::symlink_metadata(&candidate) {
        if meta.file_type().is_symlink() {
            let dir_can = std::fs::canonicalize(dir)
                .map_err(|e| SplitError::io(format!("canonicalize {}", dir.display()), e))?;
            if let Ok(target) = std::fs::canonicalize(&candidate) {
                if !target.starts_with(&dir_can) {
                    return Err(SplitError::InvalidArgument(format!(
                        "part {name:?} links outside {}",
                        dir.display()
                    )));
                }
            }
        }
    }
    Ok(candidate)
}

//! Filename and path validation for the directory scanner (`spec.md` §4.1, §8 "Security").
//!
//! A rejected entry is excluded from consideration, never fatal to the scan as a whole.

use std::fs;
use std::path::Path;

const WINDOWS_RESERVED: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
    "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Returns `true` if `name` (a bare filename, not a full path) is safe to treat as part of
/// a scanned image sequence.
pub fn is_safe_filename(name: &str) -> bool {
    if name.contains("..") {
        return false;
    }
    if name.contains('\0') {
        return false;
    }
    if Path::new(name).is_absolute() {
        return false;
    }
    let stem = name.split('.').next().unwrap_or(name);
    if WINDOWS_RESERVED
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
    {
        return false;
    }
    true
}

/// Returns `true` if the directory entry at `path` is a symbolic link. Symlinks are
/// disallowed per `spec.md` §4.1 step 1; entries are checked without following the link.
pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;

    #[test]
    fn rejects_parent_traversal() {
        assert!(!is_safe_filename("../escape.tif"));
        assert!(!is_safe_filename("slice..tif"));
    }

    #[test]
    fn rejects_null_bytes() {
        assert!(!is_safe_filename("slice\01.tif"));
    }

    #[test]
    fn rejects_absolute_paths() {
        assert!(!is_safe_filename("/etc/passwd"));
    }

    #[test]
    fn rejects_windows_reserved_names() {
        assert!(!is_safe_filename("con.tif"));
        assert!(!is_safe_filename("COM1.tiff"));
    }

    #[test]
    fn accepts_normal_filenames() {
        assert!(is_safe_filename("slice0001.tif"));
        assert!(is_safe_filename("CT-0001.png"));
    }

    #[test]
    fn detects_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.tif");
        stdfs::write(&real, b"x").unwrap();
        assert!(!is_symlink(&real));

        #[cfg(unix)]
        {
            let link = dir.path().join("link.tif");
            std::os::unix::fs::symlink(&real, &link).unwrap();
            assert!(is_symlink(&link));
        }
    }
}

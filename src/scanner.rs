//! Directory Scanner — `spec.md` §4.1.
//!
//! Parses a directory of sequentially numbered grayscale images into a [`StackDescriptor`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::codec;
use crate::error::{CoreError, Result};
use crate::path_safety::{is_safe_filename, is_symlink};

const ALLOWED_EXTENSIONS: &[&str] = &["bmp", "jpg", "jpeg", "png", "tif", "tiff"];

/// Describes a validated input image sequence. See `spec.md` §3.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackDescriptor {
    pub directory_path: PathBuf,
    pub file_prefix: String,
    pub index_width: usize,
    pub extension: String,
    pub seq_begin: usize,
    pub seq_end: usize,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
}

impl StackDescriptor {
    /// Number of slices in `[seq_begin, seq_end]`.
    pub fn slice_count(&self) -> usize {
        self.seq_end - self.seq_begin + 1
    }

    /// Path of the source file at sequence index `i`.
    pub fn path_for_index(&self, i: usize) -> PathBuf {
        let name = format!(
            "{}{:0width$}.{}",
            self.file_prefix,
            i,
            self.extension,
            width = self.index_width
        );
        self.directory_path.join(name)
    }
}

/// Split a bare filename into `(prefix, digit_run, extension)`, equivalent to matching
/// `^(.*?)(\d+)\.([A-Za-z]+)$` non-greedily on the prefix (the digit run is the trailing
/// contiguous run of ASCII digits in the stem).
fn split_name(name: &str) -> Option<(String, String, String)> {
    let dot = name.rfind('.')?;
    let (stem, ext) = (&name[..dot], &name[dot + 1..]);
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let digit_start = stem
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    if digit_start == stem.len() {
        return None;
    }
    let prefix = &stem[..digit_start];
    let digits = &stem[digit_start..];
    Some((prefix.to_string(), digits.to_string(), ext.to_string()))
}

#[derive(Default)]
struct Group {
    index_width: usize,
    extension: String,
    indices: Vec<usize>,
}

/// Scan `directory_path` and build a [`StackDescriptor`], or fail with
/// [`CoreError::InvalidInputDir`].
pub fn scan(directory_path: &Path) -> Result<StackDescriptor> {
    let entries = std::fs::read_dir(directory_path).map_err(|e| CoreError::InvalidInputDir {
        path: directory_path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut groups: HashMap<(String, usize, String), Group> = HashMap::new();

    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if is_symlink(&path) {
            debug!(?path, "skipping symlink");
            continue;
        }
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !is_safe_filename(name) {
            debug!(name, "skipping unsafe filename");
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let ext_lower = ext.to_ascii_lowercase();
        if !ALLOWED_EXTENSIONS.contains(&ext_lower.as_str()) {
            continue;
        }
        let Some((prefix, digits, parsed_ext)) = split_name(name) else {
            continue;
        };
        let Ok(index) = digits.parse::<usize>() else {
            continue;
        };
        let key = (prefix.clone(), digits.len(), parsed_ext.to_ascii_lowercase());
        let group = groups.entry(key).or_insert_with(|| Group {
            index_width: digits.len(),
            extension: ext_lower.clone(),
            indices: Vec::new(),
        });
        group.indices.push(index);
    }

    // Choose the group with the most members; ties break by lexicographically smallest prefix.
    let best = groups
        .into_iter()
        .max_by(|(ka, va), (kb, vb)| {
            va.indices
                .len()
                .cmp(&vb.indices.len())
                .then_with(|| kb.0.cmp(&ka.0))
        })
        .map(|((prefix, _, _), group)| (prefix, group));

    let Some((file_prefix, group)) = best else {
        return Err(CoreError::InvalidInputDir {
            path: directory_path.to_path_buf(),
            reason: "no recognizable image sequence found".to_string(),
        });
    };

    if group.indices.is_empty() {
        return Err(CoreError::InvalidInputDir {
            path: directory_path.to_path_buf(),
            reason: "matched group has no files".to_string(),
        });
    }

    let seq_begin = *group.indices.iter().min().unwrap();
    let seq_end = *group.indices.iter().max().unwrap();

    let mut descriptor = StackDescriptor {
        directory_path: directory_path.to_path_buf(),
        file_prefix,
        index_width: group.index_width,
        extension: group.extension,
        seq_begin,
        seq_end,
        width: 0,
        height: 0,
        bit_depth: 0,
    };

    let probe_path = descriptor.path_for_index(seq_begin);
    let (width, height, bit_depth) =
        codec::probe(&probe_path).map_err(|e| CoreError::InvalidInputDir {
            path: directory_path.to_path_buf(),
            reason: format!("failed to probe {}: {e}", probe_path.display()),
        })?;
    descriptor.width = width;
    descriptor.height = height;
    descriptor.bit_depth = bit_depth;

    Ok(descriptor)
}

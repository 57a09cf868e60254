//! Pyramid Builder — `spec.md` §4.7. Top-level orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::codec::{self, Slice};
use crate::config::PyramidConfig;
use crate::coordinator::{self, InputSource, LevelResult};
use crate::error::{CoreError, Result};
use crate::planner::{self, PyramidPlan};
use crate::progress::{CancelToken, Phase, ProgressSink, ProgressState};
use crate::scanner::{self, StackDescriptor};
use crate::volume::MinimumVolume;

const MANIFEST_NAME: &str = "manifest.json";

/// Result of a successful, non-cancelled [`build`].
#[derive(Debug)]
pub struct BuildOutcome {
    pub plan: PyramidPlan,
    pub minimum_volume: MinimumVolume,
    pub elapsed: Duration,
}

/// Outcome of [`build`]: a completed pyramid, or a cooperative cancellation. Cancellation
/// is an outcome, not an error — see `spec.md` §7.
#[derive(Debug)]
pub enum BuildStatus {
    Completed(BuildOutcome),
    Cancelled,
}

#[derive(Serialize, Deserialize)]
struct LevelManifest {
    expected_count: usize,
    source_width: u32,
    source_height: u32,
    source_bit_depth: u8,
}

fn level_dir(base_out: &Path, level_index: usize) -> PathBuf {
    base_out.join(level_index.to_string())
}

fn count_tif_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .filter(|e| {
                    e.path()
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .map(|ext| ext.eq_ignore_ascii_case("tif"))
                        .unwrap_or(false)
                })
                .count()
        })
        .unwrap_or(0)
}

fn write_manifest(dir: &Path, descriptor: &StackDescriptor, expected_count: usize) {
    let manifest = LevelManifest {
        expected_count,
        source_width: descriptor.width,
        source_height: descriptor.height,
        source_bit_depth: descriptor.bit_depth,
    };
    let path = dir.join(MANIFEST_NAME);
    match serde_json::to_vec_pretty(&manifest) {
        Ok(bytes) => {
            if let Err(e) = std::fs::write(&path, bytes) {
                warn!(?path, error = %e, "failed to write cache manifest");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize cache manifest"),
    }
}

fn read_manifest(dir: &Path) -> Option<LevelManifest> {
    let bytes = std::fs::read(dir.join(MANIFEST_NAME)).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Returns true if `dir` already holds exactly `expected_count` outputs, optionally
/// cross-checked against a cache manifest (`SPEC_FULL.md` §4.7 supplement).
fn level_is_cached(
    dir: &Path,
    expected_count: usize,
    descriptor: &StackDescriptor,
    cache_manifest: bool,
) -> bool {
    if !dir.exists() {
        return false;
    }
    if count_tif_files(dir) != expected_count {
        return false;
    }
    if !cache_manifest {
        return true;
    }
    match read_manifest(dir) {
        Some(m) => {
            m.expected_count == expected_count
                && m.source_width == descriptor.width
                && m.source_height == descriptor.height
                && m.source_bit_depth == descriptor.bit_depth
        }
        None => false,
    }
}

/// Build the full pyramid for the image stack in `directory`, per `spec.md` §6.
pub fn build(
    directory: &Path,
    config: &PyramidConfig,
    sink: Arc<dyn ProgressSink>,
    cancel: CancelToken,
) -> Result<BuildStatus> {
    let descriptor = scanner::scan(directory)?;
    info!(
        width = descriptor.width,
        height = descriptor.height,
        bit_depth = descriptor.bit_depth,
        slices = descriptor.slice_count(),
        "scanned input directory"
    );

    let base_out = directory.join(".thumbnail");
    std::fs::create_dir_all(&base_out).map_err(|e| CoreError::IoFailure {
        path: base_out.clone(),
        source: e,
    })?;

    let plan = planner::plan(&descriptor, config.min_dim, config.sample_size_override);
    let progress = ProgressState::new(plan.total_work.max(0.0), plan.sample_size);
    progress.start();

    let worker_count =
        config.resolve_worker_count(descriptor.width, descriptor.height, descriptor.bit_depth);

    for level in &plan.levels {
        if cancel.is_cancelled() {
            progress.set_phase(Phase::Cancelled);
            return Ok(BuildStatus::Cancelled);
        }

        let out_dir = level_dir(&base_out, level.level_index);
        let level_weight_raw = level.weight * plan.total_work;

        if level_is_cached(&out_dir, level.slice_count, &descriptor, config.cache_manifest) {
            info!(level = level.level_index, "level cached, skipping");
            progress.advance(level_weight_raw, sink.as_ref());
            continue;
        }

        let per_slice_weight = if level.slice_count > 0 {
            level_weight_raw / level.slice_count as f64
        } else {
            0.0
        };

        let input: InputSource<'_> = if level.level_index == 1 {
            let descriptor = descriptor.clone();
            let index_width = descriptor.index_width;
            InputSource {
                len: descriptor.slice_count(),
                path_for: Box::new(move |i| descriptor.path_for_index(descriptor.seq_begin + i)),
                index_width,
            }
        } else {
            let prev_dir = level_dir(&base_out, level.level_index - 1);
            let prev_count = plan.levels[level.level_index - 2].slice_count;
            let index_width = descriptor.index_width;
            InputSource {
                len: prev_count,
                path_for: Box::new(move |i| {
                    prev_dir.join(format!("{:0width$}.tif", i, width = index_width))
                }),
                index_width,
            }
        };

        let result = coordinator::run_level(
            level.level_index,
            level.slice_count,
            &input,
            &out_dir,
            worker_count,
            per_slice_weight,
            &progress,
            sink.as_ref(),
            &cancel,
        )?;

        match result {
            LevelResult::Completed { .. } => {
                if config.cache_manifest {
                    write_manifest(&out_dir, &descriptor, level.slice_count);
                }
            }
            LevelResult::Cancelled { .. } => {
                progress.set_phase(Phase::Cancelled);
                return Ok(BuildStatus::Cancelled);
            }
        }
    }

    let minimum_volume = load_minimum_volume(&plan, &descriptor, &base_out)?;
    progress.set_phase(Phase::Completed);

    Ok(BuildStatus::Completed(BuildOutcome {
        plan,
        minimum_volume,
        elapsed: progress.elapsed(),
    }))
}

/// Load the smallest computed level (or the source stack itself, if the plan is empty)
/// into a dense in-memory [`MinimumVolume`], downscaling 16-bit slices to 8-bit per
/// `spec.md` §4.3.
fn load_minimum_volume(
    plan: &PyramidPlan,
    descriptor: &StackDescriptor,
    base_out: &Path,
) -> Result<MinimumVolume> {
    let index_width = descriptor.index_width;
    let (count, width, height, path_for): (usize, u32, u32, Box<dyn Fn(usize) -> PathBuf>) =
        if let Some(last) = plan.levels.last() {
            let dir = level_dir(base_out, last.level_index);
            (
                last.slice_count,
                last.width,
                last.height,
                Box::new(move |i| dir.join(format!("{:0width$}.tif", i, width = index_width))),
            )
        } else {
            let descriptor = descriptor.clone();
            (
                descriptor.slice_count(),
                descriptor.width,
                descriptor.height,
                Box::new(move |i| descriptor.path_for_index(descriptor.seq_begin + i)),
            )
        };

    let mut data = Array3::<u8>::zeros((count, height as usize, width as usize));
    for i in 0..count {
        let path = path_for(i);
        let slice = codec::load_slice(&path)?;
        let (h, w) = slice.dim();
        if h != height as usize || w != width as usize {
            return Err(CoreError::ShapeMismatch {
                expected_w: width as usize,
                expected_h: height as usize,
                actual_w: w,
                actual_h: h,
            });
        }
        let plane = match slice {
            Slice::U8(arr) => arr,
            Slice::U16(arr) => codec::downscale_16_to_8(&arr),
        };
        data.slice_mut(ndarray::s![i, .., ..]).assign(&plane);
    }

    Ok(MinimumVolume::new(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoOpSink;
    use image::{ImageBuffer, Luma};

    fn write_8bit(path: &Path, w: u32, h: u32, value: u8) {
        let img = ImageBuffer::<Luma<u8>, _>::from_pixel(w, h, Luma([value]));
        img.save(path).unwrap();
    }

    #[test]
    fn below_min_dim_skips_pyramid_and_loads_source_as_minimum_volume() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            write_8bit(&dir.path().join(format!("{:04}.tif", i)), 16, 16, i as u8 * 10);
        }
        let config = PyramidConfig::default(); // min_dim 512 > 16
        let status = build(dir.path(), &config, Arc::new(NoOpSink), CancelToken::new()).unwrap();
        match status {
            BuildStatus::Completed(outcome) => {
                assert!(outcome.plan.is_empty());
                assert_eq!(outcome.minimum_volume.depth(), 4);
                assert_eq!(outcome.minimum_volume.width(), 16);
                assert_eq!(outcome.minimum_volume.height(), 16);
            }
            BuildStatus::Cancelled => panic!("unexpected cancellation"),
        }
    }

    #[test]
    fn second_run_reuses_cached_levels() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..8 {
            write_8bit(&dir.path().join(format!("{:04}.tif", i)), 1024, 1024, i as u8);
        }
        let config = PyramidConfig {
            min_dim: 512,
            ..Default::default()
        };
        let first = build(dir.path(), &config, Arc::new(NoOpSink), CancelToken::new()).unwrap();
        let second = build(dir.path(), &config, Arc::new(NoOpSink), CancelToken::new()).unwrap();

        let (BuildStatus::Completed(a), BuildStatus::Completed(b)) = (first, second) else {
            panic!("expected both builds to complete");
        };
        assert_eq!(a.minimum_volume.data(), b.minimum_volume.data());
    }

    #[test]
    fn cancel_before_start_yields_cancelled_status() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..8 {
            write_8bit(&dir.path().join(format!("{:04}.tif", i)), 1024, 1024, i as u8);
        }
        let config = PyramidConfig {
            min_dim: 512,
            ..Default::default()
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let status = build(dir.path(), &config, Arc::new(NoOpSink), cancel).unwrap();
        assert!(matches!(status, BuildStatus::Cancelled));
    }
}

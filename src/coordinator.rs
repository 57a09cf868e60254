//! Worker Coordinator — `spec.md` §4.6.
//!
//! Drives one level's worth of pair-downsampling work across a `rayon` thread pool bounded
//! to the configured worker count (`spec.md` §5), rather than the process-wide default
//! pool, so concurrent levels or co-located callers don't oversubscribe the machine.
//! Collects completions keyed by `output_index` and feeds the shared [`ProgressState`].

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::codec;
use crate::config::LEVEL_FAILURE_TOLERANCE;
use crate::downsample::downsample_pair;
use crate::error::{CoreError, Result};
use crate::progress::{ProgressSink, ProgressState};

/// Describes where a level's input slices live: either the caller's source directory
/// (level 1) or a previous level's thumbnail directory (level `L > 1`).
pub struct InputSource<'a> {
    pub len: usize,
    pub path_for: Box<dyn Fn(usize) -> PathBuf + Sync + 'a>,
    /// Zero-padding width for this level's *output* filenames, carried from the scanned
    /// `StackDescriptor.index_width` and held constant across the run (`spec.md` §3, §5).
    pub index_width: usize,
}

/// Outcome of running one level.
pub enum LevelResult {
    Completed { produced: usize },
    Cancelled { produced: usize },
}

enum UnitOutcome {
    Success,
    Failed { output_index: usize, error: CoreError },
    SkippedForCancel,
}

/// Run one level: build work units, submit to a bounded pool, collect, and check the
/// escalation policy documented in `SPEC_FULL.md` §4.6.
#[allow(clippy::too_many_arguments)]
pub fn run_level(
    level_index: usize,
    slice_count: usize,
    input: &InputSource<'_>,
    output_dir: &Path,
    worker_count: usize,
    per_slice_weight: f64,
    progress: &ProgressState,
    sink: &dyn ProgressSink,
    cancel: &crate::progress::CancelToken,
) -> Result<LevelResult> {
    std::fs::create_dir_all(output_dir).map_err(|e| CoreError::IoFailure {
        path: output_dir.to_path_buf(),
        source: e,
    })?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(worker_count.max(1))
        .build()
        .expect("bounded thread pool");

    let output_dir_owned = output_dir.to_path_buf();
    let outcomes: Vec<UnitOutcome> = pool.install(|| {
        use rayon::prelude::*;
        (0..slice_count)
            .into_par_iter()
            .map(|output_index| {
                if cancel.is_cancelled() {
                    return UnitOutcome::SkippedForCancel;
                }
                process_unit(output_index, input, &output_dir_owned)
            })
            .collect()
    });

    let mut produced = 0usize;
    let mut failed = 0usize;
    let mut any_cancelled = false;

    for outcome in outcomes {
        match outcome {
            UnitOutcome::Success => {
                produced += 1;
                progress.advance(per_slice_weight, sink);
            }
            UnitOutcome::Failed { output_index, error } => {
                failed += 1;
                warn!(output_index, level = level_index, error = %error, "unit failed");
                progress.advance(per_slice_weight, sink);
            }
            UnitOutcome::SkippedForCancel => {
                any_cancelled = true;
            }
        }
    }

    if any_cancelled || cancel.is_cancelled() {
        return Ok(LevelResult::Cancelled { produced });
    }

    let escalate = if level_index == 1 {
        failed > 0
    } else {
        (failed as f64) > (slice_count.max(1) as f64) * LEVEL_FAILURE_TOLERANCE
    };
    if escalate {
        return Err(CoreError::BuildFailed {
            level: level_index,
            failed,
            total: slice_count,
        });
    }

    // Consistency check: every non-failed unit must have produced an output file.
    let expected_on_disk = slice_count - failed;
    let found_on_disk = count_output_files(output_dir);
    if found_on_disk < expected_on_disk {
        return Err(CoreError::ConsistencyError {
            level: level_index,
            expected: expected_on_disk,
            found: found_on_disk,
        });
    }

    Ok(LevelResult::Completed { produced })
}

fn process_unit(output_index: usize, input: &InputSource<'_>, output_dir: &Path) -> UnitOutcome {
    let i0 = output_index * 2;
    let i1 = i0 + 1;

    let result = (|| -> Result<()> {
        let path_a = (input.path_for)(i0);
        let slice_a = codec::load_slice(&path_a)?;
        let slice_b = if i1 < input.len {
            let path_b = (input.path_for)(i1);
            Some(codec::load_slice(&path_b)?)
        } else {
            None
        };
        let merged = downsample_pair(&slice_a, slice_b.as_ref())?;
        let output_path = output_dir.join(format!(
            "{:0width$}.tif",
            output_index,
            width = input.index_width
        ));
        codec::write_slice(&output_path, &merged)?;
        Ok(())
    })();

    match result {
        Ok(()) => UnitOutcome::Success,
        Err(error) => UnitOutcome::Failed { output_index, error },
    }
}

fn count_output_files(dir: &Path) -> usize {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Slice;
    use crate::progress::{CancelToken, NoOpSink};
    use image::{ImageBuffer, Luma};
    use ndarray::Array2;

    fn write_8bit(path: &Path, w: u32, h: u32, value: u8) {
        let img = ImageBuffer::<Luma<u8>, _>::from_pixel(w, h, Luma([value]));
        img.save(path).unwrap();
    }

    #[test]
    fn runs_level_and_produces_expected_outputs() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        for i in 0..6 {
            write_8bit(&src.path().join(format!("{i}.tif")), 8, 8, 10 + i as u8);
        }
        let src_path = src.path().to_path_buf();
        let input = InputSource {
            len: 6,
            path_for: Box::new(move |i| src_path.join(format!("{i}.tif"))),
            index_width: 4,
        };
        let progress = ProgressState::new(3.0, 20);
        progress.start();
        let sink = NoOpSink;
        let cancel = CancelToken::new();

        let result = run_level(1, 3, &input, out.path(), 2, 1.0, &progress, &sink, &cancel).unwrap();
        match result {
            LevelResult::Completed { produced } => assert_eq!(produced, 3),
            _ => panic!("expected completion"),
        }
        assert_eq!(count_output_files(out.path()), 3);
    }

    #[test]
    fn level1_any_failure_escalates() {
        let out = tempfile::tempdir().unwrap();
        // input_for always points at a nonexistent file -> every unit fails.
        let input = InputSource {
            len: 2,
            path_for: Box::new(|i| PathBuf::from(format!("/nonexistent/{i}.tif"))),
            index_width: 4,
        };
        let progress = ProgressState::new(1.0, 20);
        progress.start();
        let sink = NoOpSink;
        let cancel = CancelToken::new();
        let err = run_level(1, 1, &input, out.path(), 1, 1.0, &progress, &sink, &cancel).unwrap_err();
        assert!(matches!(err, CoreError::BuildFailed { .. }));
    }

    #[test]
    fn cancellation_stops_level_and_reports_cancelled() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        for i in 0..20 {
            write_8bit(&src.path().join(format!("{i}.tif")), 8, 8, i as u8);
        }
        let src_path = src.path().to_path_buf();
        let input = InputSource {
            len: 20,
            path_for: Box::new(move |i| src_path.join(format!("{i}.tif"))),
            index_width: 4,
        };
        let progress = ProgressState::new(10.0, 20);
        progress.start();
        let sink = NoOpSink;
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = run_level(1, 10, &input, out.path(), 2, 1.0, &progress, &sink, &cancel).unwrap();
        match result {
            LevelResult::Cancelled { .. } => {}
            LevelResult::Completed { .. } => panic!("expected cancellation"),
        }
    }

    #[test]
    fn slice_passthrough_on_odd_tail_uses_single_input() {
        // Exercises process_unit's b=None branch indirectly through downsample_pair.
        let a = Slice::U8(Array2::from_elem((2, 2), 9u8));
        let out = downsample_pair(&a, None).unwrap();
        assert_eq!(out.dim(), (1, 1));
    }
}

//! Pyramid Planner — `spec.md` §4.2.

use crate::scanner::StackDescriptor;

/// One level of the pyramid. See `spec.md` §3.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelSpec {
    pub level_index: usize,
    pub width: u32,
    pub height: u32,
    pub slice_count: usize,
    /// Normalized weight, i.e. `weight_L / total_work`. Sums to 1.0 across all levels.
    pub weight: f64,
}

/// Ordered list of [`LevelSpec`]s plus planning metadata. See `spec.md` §3.
#[derive(Clone, Debug, PartialEq)]
pub struct PyramidPlan {
    pub levels: Vec<LevelSpec>,
    /// Sum of unnormalized per-level weights (`spec.md` §4.2).
    pub total_work: f64,
    /// Number of completed work units after which the Progress Model begins computing ETA.
    pub sample_size: usize,
}

impl PyramidPlan {
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Build a [`PyramidPlan`] from a [`StackDescriptor`], per `spec.md` §4.2.
pub fn plan(descriptor: &StackDescriptor, min_dim: u32, sample_size_override: Option<usize>) -> PyramidPlan {
    plan_from_dims(
        descriptor.width,
        descriptor.height,
        descriptor.slice_count(),
        min_dim,
        sample_size_override,
    )
}

/// Core planning algorithm, parameterized directly over base dimensions and slice count so
/// it can be driven from synthetic `(W, H, N)` tuples in tests without a `StackDescriptor`.
pub fn plan_from_dims(
    width: u32,
    height: u32,
    slice_count: usize,
    min_dim: u32,
    sample_size_override: Option<usize>,
) -> PyramidPlan {
    let mut levels = Vec::new();
    let (mut w, mut h, mut n) = (width, height, slice_count);

    let mut unnormalized = Vec::new();
    let mut level_index = 1usize;
    while w.min(h) >= min_dim {
        let nw = w / 2;
        let nh = h / 2;
        let nn = n.div_ceil(2);

        let size_factor = (nw as f64 / width as f64).powi(2);
        let level_weight = nn as f64 * size_factor;

        unnormalized.push((level_index, nw, nh, nn, level_weight));

        w = nw;
        h = nh;
        n = nn;
        level_index += 1;
    }

    let total_work: f64 = unnormalized.iter().map(|(_, _, _, _, wt)| wt).sum();

    for (idx, lw, lh, ln, lwt) in unnormalized {
        levels.push(LevelSpec {
            level_index: idx,
            width: lw,
            height: lh,
            slice_count: ln,
            weight: if total_work > 0.0 { lwt / total_work } else { 0.0 },
        });
    }

    let sample_size = sample_size_override.unwrap_or_else(|| {
        ((total_work * 0.02).floor() as usize).clamp(20, 30)
    });

    PyramidPlan {
        levels,
        total_work,
        sample_size,
    }
}

//! Pair Downsampler — `spec.md` §4.4.
//!
//! Given up to two same-shape, same-dtype slices, produces one slice at half the spatial
//! resolution. Step 1 averages the pair at full resolution (floor division, widened to
//! avoid overflow); step 2 spatially decimates the averaged result by 2. Decimation uses
//! 2×2 block-mean uniformly at every level — an allowed alternative to nearest-neighbor per
//! `spec.md` §4.4, applied the same way at every level so the in-memory minimum volume
//! stays derivable from the on-disk thumbnails.
//!
//! Both stages are implemented once, generically over the sample type, rather than
//! duplicated per bit depth (`spec.md` §9 explicitly asks for this).

use ndarray::Array2;
use rayon::prelude::*;

use crate::codec::Slice;
use crate::error::{CoreError, Result};

/// A pixel sample type wide enough to be promoted to `u32` for overflow-safe arithmetic.
pub trait Sample: Copy + Send + Sync + 'static {
    fn widen(self) -> u32;
    fn narrow(v: u32) -> Self;
}

impl Sample for u8 {
    fn widen(self) -> u32 {
        self as u32
    }
    fn narrow(v: u32) -> Self {
        v as u8
    }
}

impl Sample for u16 {
    fn widen(self) -> u32 {
        self as u32
    }
    fn narrow(v: u32) -> Self {
        v as u16
    }
}

/// 2×2 block-mean decimation, round-to-nearest. Rows/columns beyond `2*floor(h/2)` /
/// `2*floor(w/2)` are dropped, per `spec.md` §4.4 step 3.
pub fn decimate_half<T: Sample>(src: &Array2<T>) -> Array2<T> {
    let (h, w) = src.dim();
    let (dh, dw) = (h / 2, w / 2);
    let src_flat = src.as_slice().expect("slice is contiguous");
    let mut out = vec![T::narrow(0); dh * dw];
    out.par_chunks_mut(dw).enumerate().for_each(|(y, row)| {
        let base0 = (2 * y) * w;
        let base1 = (2 * y + 1) * w;
        for x in 0..dw {
            let a = src_flat[base0 + 2 * x].widen();
            let b = src_flat[base0 + 2 * x + 1].widen();
            let c = src_flat[base1 + 2 * x].widen();
            let d = src_flat[base1 + 2 * x + 1].widen();
            row[x] = T::narrow((a + b + c + d + 2) >> 2);
        }
    });
    Array2::from_shape_vec((dh, dw), out).expect("dh*dw matches buffer length")
}

/// Pairwise average of two equal-shape slices at full resolution, floor division,
/// width-promoted to avoid overflow (`spec.md` §4.4 step 1).
pub fn average_pair<T: Sample>(a: &Array2<T>, b: &Array2<T>) -> Array2<T> {
    debug_assert_eq!(a.dim(), b.dim());
    let a_flat = a.as_slice().expect("slice is contiguous");
    let b_flat = b.as_slice().expect("slice is contiguous");
    let out: Vec<T> = a_flat
        .par_iter()
        .zip(b_flat.par_iter())
        .map(|(&x, &y)| T::narrow((x.widen() + y.widen()) / 2))
        .collect();
    Array2::from_shape_vec(a.dim(), out).expect("matching length")
}

/// Produce one output slice from up to two input slices, per `spec.md` §4.4.
///
/// When `b` is `None` (odd slice count, last output of a level), the lone input is
/// decimated directly. When both are present, they are averaged first at full resolution
/// (step 1) and the averaged result is decimated once (step 2) — averaging after decimating
/// would discard half the pair's information before the average ever sees it, and the two
/// orderings diverge under integer rounding for non-constant data.
pub fn downsample_pair(a: &Slice, b: Option<&Slice>) -> Result<Slice> {
    if let Some(b) = b {
        if a.bit_depth() != b.bit_depth() || a.dim() != b.dim() {
            let (ew, eh) = a.dim();
            let (aw, ah) = b.dim();
            return Err(CoreError::ShapeMismatch {
                expected_w: ew,
                expected_h: eh,
                actual_w: aw,
                actual_h: ah,
            });
        }
    }

    match (a, b) {
        (Slice::U8(a), Some(Slice::U8(b))) => {
            let merged = average_pair(a, b);
            Ok(Slice::U8(decimate_half(&merged)))
        }
        (Slice::U16(a), Some(Slice::U16(b))) => {
            let merged = average_pair(a, b);
            Ok(Slice::U16(decimate_half(&merged)))
        }
        (Slice::U8(a), None) => Ok(Slice::U8(decimate_half(a))),
        (Slice::U16(a), None) => Ok(Slice::U16(decimate_half(a))),
        _ => unreachable!("bit-depth equality checked above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_constant_8bit_pair_without_overflow() {
        let a = Array2::from_elem((2, 2), 100u8);
        let b = Array2::from_elem((2, 2), 200u8);
        let out = downsample_pair(&Slice::U8(a), Some(&Slice::U8(b))).unwrap();
        match out {
            Slice::U8(arr) => {
                assert_eq!(arr.dim(), (1, 1));
                assert_eq!(arr[[0, 0]], 150);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn averages_constant_16bit_pair_preserves_dtype() {
        let a = Array2::from_elem((2, 2), 10000u16);
        let b = Array2::from_elem((2, 2), 20000u16);
        let out = downsample_pair(&Slice::U16(a), Some(&Slice::U16(b))).unwrap();
        match out {
            Slice::U16(arr) => assert_eq!(arr[[0, 0]], 15000),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn odd_slice_passes_through_decimated_only() {
        let a = Array2::from_elem((4, 4), 40u8);
        let out = downsample_pair(&Slice::U8(a), None).unwrap();
        match out {
            Slice::U8(arr) => assert_eq!(arr.dim(), (2, 2)),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let a = Array2::from_elem((4, 4), 1u8);
        let b = Array2::from_elem((2, 2), 1u8);
        let err = downsample_pair(&Slice::U8(a), Some(&Slice::U8(b))).unwrap_err();
        assert!(matches!(err, CoreError::ShapeMismatch { .. }));
    }

    #[test]
    fn decimate_drops_odd_trailing_row_and_column() {
        let src = Array2::from_shape_fn((5, 5), |(y, x)| (y * 5 + x) as u8);
        let out = decimate_half(&src);
        assert_eq!(out.dim(), (2, 2));
    }

    #[test]
    fn averages_before_decimating_for_non_constant_input() {
        // A single 2x2 block where averaging first and decimating first diverge:
        // average-then-decimate gives M=[[1,0],[0,0]] -> (1+0+0+0+2)>>2 = 0;
        // decimate-then-average would give (3+2)>>2=1, (0+2)>>2=0, then (1+0+1)>>1=1.
        let a = Array2::from_shape_vec((2, 2), vec![3u8, 0, 0, 0]).unwrap();
        let b = Array2::from_elem((2, 2), 0u8);
        let out = downsample_pair(&Slice::U8(a), Some(&Slice::U8(b))).unwrap();
        match out {
            Slice::U8(arr) => {
                assert_eq!(arr.dim(), (1, 1));
                assert_eq!(arr[[0, 0]], 0);
            }
            _ => panic!("wrong variant"),
        }
    }
}

//! Volume Extractor — `spec.md` §4.8.
//!
//! Holds the smallest computed pyramid level as a dense in-memory 3D array and serves
//! half-open cropped-volume queries in normalized XY / integer Z coordinates.

use ndarray::{s, Array3};

use crate::error::{CoreError, Result};

/// The smallest computed level, held in memory as `u8` (`depth, height, width`). See
/// `spec.md` §3.
#[derive(Clone, Debug)]
pub struct MinimumVolume {
    data: Array3<u8>,
}

impl MinimumVolume {
    pub fn new(data: Array3<u8>) -> Self {
        Self { data }
    }

    pub fn depth(&self) -> usize {
        self.data.dim().0
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn data(&self) -> &Array3<u8> {
        &self.data
    }
}

/// A crop request in the coordinates described by `spec.md` §4.8.
#[derive(Clone, Copy, Debug)]
pub struct CropRequest {
    /// Exclusive upper Z bound.
    pub z_top: i64,
    /// Inclusive lower Z bound.
    pub z_bottom: i64,
    /// Normalized X/Y rectangle, each in `[0.0, 1.0]`.
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

/// A cropped sub-volume, `u8`, shape `(z_top - z_bottom, y1_i - y0_i, x1_i - x0_i)`.
pub type CroppedVolume = Array3<u8>;

/// Produce a cropped sub-volume per `spec.md` §4.8. Half-open on every axis; no `-1`
/// adjustment on the upper XY bound (the off-by-one the source repo's devlog fixed).
pub fn crop(volume: &MinimumVolume, request: CropRequest) -> Result<CroppedVolume> {
    let depth = volume.depth() as i64;

    if request.z_top <= request.z_bottom {
        return Err(CoreError::InvalidCrop {
            reason: format!(
                "z_top ({}) must be greater than z_bottom ({})",
                request.z_top, request.z_bottom
            ),
        });
    }
    if request.z_top > depth {
        return Err(CoreError::InvalidCrop {
            reason: format!("z_top ({}) exceeds depth ({depth})", request.z_top),
        });
    }
    if request.z_bottom < 0 {
        return Err(CoreError::InvalidCrop {
            reason: format!("z_bottom ({}) must be >= 0", request.z_bottom),
        });
    }

    let width = volume.width();
    let height = volume.height();
    let x0_i = (request.x0 * width as f64).floor() as i64;
    let x1_i = (request.x1 * width as f64).floor() as i64;
    let y0_i = (request.y0 * height as f64).floor() as i64;
    let y1_i = (request.y1 * height as f64).floor() as i64;

    if x1_i <= x0_i || y1_i <= y0_i {
        return Err(CoreError::InvalidCrop {
            reason: format!(
                "XY box must have positive extent: x=[{x0_i},{x1_i}), y=[{y0_i},{y1_i})"
            ),
        });
    }
    if x0_i < 0 || y0_i < 0 || x1_i > width as i64 || y1_i > height as i64 {
        return Err(CoreError::InvalidCrop {
            reason: format!(
                "XY box [{x0_i},{x1_i}) x [{y0_i},{y1_i}) exceeds volume bounds {width}x{height}"
            ),
        });
    }

    let (zb, zt, x0, x1, y0, y1) = (
        request.z_bottom as usize,
        request.z_top as usize,
        x0_i as usize,
        x1_i as usize,
        y0_i as usize,
        y1_i as usize,
    );

    let cropped = volume
        .data()
        .slice(s![zb..zt, y0..y1, x0..x1])
        .to_owned();
    Ok(cropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_volume() -> MinimumVolume {
        let data = Array3::from_shape_fn((10, 10, 10), |(z, y, x)| (z * 100 + y * 10 + x) as u8);
        MinimumVolume::new(data)
    }

    #[test]
    fn full_crop_equals_whole_volume() {
        let vol = test_volume();
        let cropped = crop(
            &vol,
            CropRequest {
                z_bottom: 0,
                z_top: 10,
                x0: 0.0,
                y0: 0.0,
                x1: 1.0,
                y1: 1.0,
            },
        )
        .unwrap();
        assert_eq!(cropped, *vol.data());
    }

    #[test]
    fn corner_crop_includes_far_boundary_pixel() {
        let vol = test_volume();
        let cropped = crop(
            &vol,
            CropRequest {
                z_bottom: 9,
                z_top: 10,
                x0: 0.9,
                y0: 0.9,
                x1: 1.0,
                y1: 1.0,
            },
        )
        .unwrap();
        assert_eq!(cropped.dim(), (1, 1, 1));
        assert_eq!(cropped[[0, 0, 0]], 999);
    }

    #[test]
    fn rejects_inverted_z_range() {
        let vol = test_volume();
        let err = crop(
            &vol,
            CropRequest {
                z_bottom: 5,
                z_top: 5,
                x0: 0.0,
                y0: 0.0,
                x1: 1.0,
                y1: 1.0,
            },
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCrop { .. }));
    }

    #[test]
    fn rejects_z_top_beyond_depth() {
        let vol = test_volume();
        let err = crop(
            &vol,
            CropRequest {
                z_bottom: 0,
                z_top: 11,
                x0: 0.0,
                y0: 0.0,
                x1: 1.0,
                y1: 1.0,
            },
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCrop { .. }));
    }

    #[test]
    fn rejects_non_positive_xy_extent() {
        let vol = test_volume();
        let err = crop(
            &vol,
            CropRequest {
                z_bottom: 0,
                z_top: 1,
                x0: 0.5,
                y0: 0.0,
                x1: 0.5,
                y1: 1.0,
            },
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCrop { .. }));
    }
}

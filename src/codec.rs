//! Image Codec — `spec.md` §4.3.
//!
//! Probes bit depth/dimensions, loads a slice as a 2D numeric array of the declared
//! dtype, and writes a 2D array as a lossless TIFF thumbnail.

use std::path::Path;

use image::{DynamicImage, ImageBuffer, ImageReader, Luma};
use ndarray::Array2;

use crate::error::{CoreError, Result};

/// A decoded 2D slice, preserving the source bit depth.
#[derive(Clone, Debug)]
pub enum Slice {
    U8(Array2<u8>),
    U16(Array2<u16>),
}

impl Slice {
    pub fn bit_depth(&self) -> u8 {
        match self {
            Slice::U8(_) => 8,
            Slice::U16(_) => 16,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        match self {
            Slice::U8(a) => a.dim(),
            Slice::U16(a) => a.dim(),
        }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> CoreError {
    CoreError::IoFailure {
        path: path.to_path_buf(),
        source,
    }
}

fn decode_err(path: &Path, reason: impl std::fmt::Display) -> CoreError {
    CoreError::DecodeError {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Classify a decoded [`DynamicImage`] per `spec.md` §4.3: 16-bit single-channel sources
/// (and 16-bit-capable multi-channel/float sources) yield 16; everything else yields 8.
/// Mode is never inferred from extension.
fn classify_and_convert(img: DynamicImage) -> (Array2<u16>, bool) {
    match img {
        DynamicImage::ImageLuma16(buf) => {
            let (w, h) = buf.dimensions();
            (to_array(buf.into_raw(), w, h), true)
        }
        DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgba16(_) => {
            let buf = img.to_luma16();
            let (w, h) = buf.dimensions();
            (to_array(buf.into_raw(), w, h), true)
        }
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            let buf = img.to_luma16();
            let (w, h) = buf.dimensions();
            (to_array(buf.into_raw(), w, h), true)
        }
        other => {
            let buf = other.to_luma8();
            let (w, h) = buf.dimensions();
            let widened: Vec<u16> = buf.into_raw().into_iter().map(u16::from).collect();
            (to_array(widened, w, h), false)
        }
    }
}

fn to_array<T: Clone>(raw: Vec<T>, w: u32, h: u32) -> Array2<T> {
    Array2::from_shape_vec((h as usize, w as usize), raw).expect("raw buffer matches w*h")
}

/// Probe a file's dimensions and bit depth without retaining the decoded pixels.
pub fn probe(path: &Path) -> Result<(u32, u32, u8)> {
    let img = ImageReader::open(path)
        .map_err(|e| io_err(path, e))?
        .with_guessed_format()
        .map_err(|e| io_err(path, e))?
        .decode()
        .map_err(|e| decode_err(path, e))?;
    let (w16, is_16bit) = classify_and_convert(img);
    let (h, w) = w16.dim();
    Ok((w as u32, h as u32, if is_16bit { 16 } else { 8 }))
}

/// Load a slice, returning it at its native bit depth.
pub fn load_slice(path: &Path) -> Result<Slice> {
    let img = ImageReader::open(path)
        .map_err(|e| io_err(path, e))?
        .with_guessed_format()
        .map_err(|e| io_err(path, e))?
        .decode()
        .map_err(|e| decode_err(path, e))?;
    let (arr16, is_16bit) = classify_and_convert(img);
    if is_16bit {
        Ok(Slice::U16(arr16))
    } else {
        Ok(Slice::U8(arr16.mapv(|v| v as u8)))
    }
}

/// Write a slice as a lossless TIFF thumbnail, matching the input dtype.
pub fn write_slice(path: &Path, slice: &Slice) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(path, e))?;
    }
    match slice {
        Slice::U8(arr) => {
            let (h, w) = arr.dim();
            let raw: Vec<u8> = arr.iter().copied().collect();
            let img = ImageBuffer::<Luma<u8>, _>::from_raw(w as u32, h as u32, raw)
                .ok_or_else(|| decode_err(path, "buffer size mismatch"))?;
            img.save(path).map_err(|e| io_err(path, std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        }
        Slice::U16(arr) => {
            let (h, w) = arr.dim();
            let raw: Vec<u16> = arr.iter().copied().collect();
            let img = ImageBuffer::<Luma<u16>, _>::from_raw(w as u32, h as u32, raw)
                .ok_or_else(|| decode_err(path, "buffer size mismatch"))?;
            img.save(path).map_err(|e| io_err(path, std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        }
    }
    Ok(())
}

/// Downscale 16-bit samples to 8-bit by right-shifting 8 bits (`spec.md` §4.3), used when
/// the Pyramid Builder loads the smallest level into a [`crate::volume::MinimumVolume`].
pub fn downscale_16_to_8(arr: &Array2<u16>) -> Array2<u8> {
    arr.mapv(|v| (v >> 8) as u8)
}

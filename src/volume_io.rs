// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::{DynamicImage, GrayImage, ImageReader};
use log::{debug, info};
use ndarray::{Array3, ArrayView3, Axis};

use crate::errors::{InputError, VolumeError};

struct Slice {
    width: u32,
    height: u32,
    pixels: Vec<u16>,
}

fn read_slice(path: &Path) -> Result<Slice, VolumeError> {
    let img = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|source| VolumeError::Io{path: path.to_path_buf(), source})?
        .decode()
        .map_err(|source| VolumeError::Decode{path: path.to_path_buf(), source})?;
    let (width, height) = (img.width(), img.height());
    let pixels: Vec<u16> = match img {
        DynamicImage::ImageLuma8(gray) => gray.into_raw().into_iter().map(u16::from).collect(),
        DynamicImage::ImageLuma16(gray) => gray.into_raw(),
        other => {
            return Err(VolumeError::WrongType{
                path: path.to_path_buf(),
                source: InputError::WrongType{actual: format!("{:?}", other.color())}});
        },
    };
    Ok(Slice{width, height, pixels})
}

/// Assembles a `(z, y, x)` volume from a directory holding one grayscale
/// image file per z-slice. Slices are ordered by file name, so zero-padded
/// plane numbers are expected. 8-bit slices are widened to 16 bits.
pub fn load_volume_from_slices(dir: &Path) -> Result<Array3<u16>, VolumeError> {
    let load_start = Instant::now();
    let io_err = |source| VolumeError::Io{path: dir.to_path_buf(), source};
    let mut paths = Vec::<PathBuf>::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut slices = Vec::<Slice>::with_capacity(paths.len());
    for path in &paths {
        let slice = read_slice(path)?;
        if let Some(first) = slices.first() {
            if (slice.width, slice.height) != (first.width, first.height) {
                return Err(VolumeError::SliceShape{
                    path: path.clone(),
                    expected: (first.width, first.height),
                    actual: (slice.width, slice.height)});
            }
        }
        debug!("Read slice {:?}", path);
        slices.push(slice);
    }
    let Some(first) = slices.first() else {
        return Err(VolumeError::Empty(dir.to_path_buf()));
    };
    let (width, height) = (first.width as usize, first.height as usize);
    let volume = Array3::from_shape_fn(
        (slices.len(), height, width),
        |(z, y, x)| slices[z].pixels[y * width + x]);
    info!("Loaded {:?} volume from {:?} in {:?}",
          volume.dim(), dir, load_start.elapsed());
    Ok(volume)
}

/// Maximum intensity projection along z, scaled so that the brightest
/// projected voxel is 255.
pub fn max_projection_image(volume: &ArrayView3<u16>) -> GrayImage {
    let (_, height, width) = volume.dim();
    let projection = volume.fold_axis(Axis(0), 0u16, |acc, &v| (*acc).max(v));
    let peak = projection.iter().copied().max().unwrap_or(0).max(1) as u32;
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let v = projection[[y as usize, x as usize]] as u32;
        image::Luma([(v * 255 / peak) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, RgbImage};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(
            format!("spot_detect_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_volume_orders_slices_by_name() {
        let dir = scratch_dir("ordered");
        // Written out of order; plane value identifies the slice.
        for z in [2u16, 0, 1] {
            let slice = ImageBuffer::<Luma<u16>, Vec<u16>>::from_fn(
                4, 3, |x, y| Luma([1000 * z + (y * 4 + x) as u16]));
            slice.save(dir.join(format!("plane_{:03}.png", z))).unwrap();
        }
        let volume = load_volume_from_slices(&dir);
        fs::remove_dir_all(&dir).unwrap();
        let volume = volume.unwrap();
        assert_eq!(volume.dim(), (3, 3, 4));
        assert_eq!(volume[[0, 0, 0]], 0);
        assert_eq!(volume[[1, 0, 0]], 1000);
        assert_eq!(volume[[2, 2, 3]], 2011);
    }

    #[test]
    fn test_load_volume_widens_8_bit() {
        let dir = scratch_dir("eight_bit");
        GrayImage::from_pixel(2, 2, Luma([200u8])).save(dir.join("z0.png")).unwrap();
        let volume = load_volume_from_slices(&dir);
        fs::remove_dir_all(&dir).unwrap();
        assert!(volume.unwrap().iter().all(|&v| v == 200));
    }

    #[test]
    fn test_load_volume_rejects_color() {
        let dir = scratch_dir("color");
        RgbImage::new(2, 2).save(dir.join("z0.png")).unwrap();
        let err = load_volume_from_slices(&dir).unwrap_err();
        fs::remove_dir_all(&dir).unwrap();
        match err {
            VolumeError::WrongType{source, ..} => assert_eq!(
                source, InputError::WrongType{actual: "Rgb8".to_string()}),
            other => panic!("Unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_load_volume_rejects_mismatched_slices() {
        let dir = scratch_dir("mismatched");
        GrayImage::new(4, 4).save(dir.join("z0.png")).unwrap();
        GrayImage::new(4, 5).save(dir.join("z1.png")).unwrap();
        let err = load_volume_from_slices(&dir).unwrap_err();
        fs::remove_dir_all(&dir).unwrap();
        assert!(matches!(err, VolumeError::SliceShape{expected: (4, 4), actual: (4, 5), ..}));
    }

    #[test]
    fn test_load_volume_empty_dir() {
        let dir = scratch_dir("empty");
        let err = load_volume_from_slices(&dir).unwrap_err();
        fs::remove_dir_all(&dir).unwrap();
        assert!(matches!(err, VolumeError::Empty(_)));
    }

    #[test]
    fn test_max_projection_image() {
        let mut volume = Array3::<u16>::zeros((3, 2, 4));
        volume[[0, 1, 2]] = 100;
        volume[[2, 1, 2]] = 400;
        volume[[1, 0, 0]] = 200;
        let mip = max_projection_image(&volume.view());
        assert_eq!(mip.dimensions(), (4, 2));
        assert_eq!(mip.get_pixel(2, 1).0[0], 255);
        assert_eq!(mip.get_pixel(0, 0).0[0], 127);
        assert_eq!(mip.get_pixel(3, 0).0[0], 0);
    }
}  // mod tests.

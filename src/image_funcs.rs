// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Filtering primitives over 3D volumes indexed `(z, y, x)`. Everything here
//! works in `f64`; callers convert their pixel type once with [to_f64()].

use ndarray::{Array3, ArrayView3, Axis, Zip};

/// Pixel types accepted by the detectors. Any fixed-width numeric type that
/// converts losslessly to `f64` qualifies (u8, u16, u32, i8, i16, i32, f32,
/// f64).
pub trait PixelValue: Copy + Into<f64> + std::fmt::Debug + Send + Sync + 'static {}

impl<T> PixelValue for T
where T: Copy + Into<f64> + std::fmt::Debug + Send + Sync + 'static {}

pub fn to_f64<T: PixelValue>(image: &ArrayView3<T>) -> Array3<f64> {
    image.mapv(|v| v.into())
}

// Gaussian kernels are truncated at this many standard deviations.
const TRUNCATE: f64 = 4.0;

fn gaussian_kernel_1d(sigma: f64) -> Vec<f64> {
    let radius = (TRUNCATE * sigma + 0.5) as usize;
    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-0.5 * x * x / (sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    for w in kernel.iter_mut() {
        *w /= sum;
    }
    kernel
}

// Correlates every lane along `axis` with `kernel`. Samples that fall off
// the end of a lane take the value of the nearest edge sample.
fn correlate_axis_nearest(input: &Array3<f64>, axis: Axis, kernel: &[f64])
                          -> Array3<f64> {
    let radius = (kernel.len() / 2) as isize;
    let mut output = Array3::<f64>::zeros(input.raw_dim());
    let mut lane_buf = Vec::<f64>::new();
    for (src, mut dst) in input.lanes(axis).into_iter()
        .zip(output.lanes_mut(axis))
    {
        lane_buf.clear();
        lane_buf.extend(src.iter().copied());
        let last = lane_buf.len() as isize - 1;
        for (i, out) in dst.iter_mut().enumerate() {
            let mut acc = 0.0;
            for (k, w) in kernel.iter().enumerate() {
                let j = (i as isize + k as isize - radius).clamp(0, last);
                acc += w * lane_buf[j as usize];
            }
            *out = acc;
        }
    }
    output
}

/// Smooths `image` with an isotropic Gaussian of standard deviation `sigma`
/// (in voxels), applied separably along z, y and x. A `sigma` of zero
/// returns an unmodified copy.
pub fn gaussian_filter(image: &ArrayView3<f64>, sigma: f64) -> Array3<f64> {
    let mut smoothed = image.to_owned();
    if sigma <= 0.0 {
        return smoothed;
    }
    let kernel = gaussian_kernel_1d(sigma);
    for axis in 0..3 {
        smoothed = correlate_axis_nearest(&smoothed, Axis(axis), &kernel);
    }
    smoothed
}

/// Offsets `(dz, dy, dx)` of a ball-shaped footprint: all integer offsets
/// within `radius` of the center, center included.
pub fn ball(radius: usize) -> Vec<(isize, isize, isize)> {
    let r = radius as isize;
    let mut offsets = Vec::new();
    for dz in -r..=r {
        for dy in -r..=r {
            for dx in -r..=r {
                if dz * dz + dy * dy + dx * dx <= r * r {
                    offsets.push((dz, dy, dx));
                }
            }
        }
    }
    offsets
}

// Half-sample symmetric reflection: for a length 4 axis, index -1 maps to 0,
// -2 to 1, 4 to 3 and 5 to 2.
fn reflect_index(i: isize, n: usize) -> usize {
    let n = n as isize;
    if n == 1 {
        return 0;
    }
    let period = 2 * n;
    let m = i.rem_euclid(period);
    (if m >= n { period - 1 - m } else { m }) as usize
}

// Grey-level rank filter: each output voxel is the min (or max) of the
// input over `footprint` centered at that voxel.
fn grey_filter(image: &Array3<f64>, footprint: &[(isize, isize, isize)],
               take_max: bool) -> Array3<f64> {
    let (nz, ny, nx) = image.dim();
    Array3::from_shape_fn((nz, ny, nx), |(z, y, x)| {
        let mut extreme = if take_max { f64::NEG_INFINITY } else { f64::INFINITY };
        for &(dz, dy, dx) in footprint {
            let v = image[[reflect_index(z as isize + dz, nz),
                           reflect_index(y as isize + dy, ny),
                           reflect_index(x as isize + dx, nx)]];
            extreme = if take_max { extreme.max(v) } else { extreme.min(v) };
        }
        extreme
    })
}

/// Morphological white top-hat with a ball footprint: the image minus its
/// grey opening. Keeps bright features smaller than the ball and removes
/// the slowly varying background beneath them.
pub fn white_tophat(image: &ArrayView3<f64>, radius: usize) -> Array3<f64> {
    let image = image.to_owned();
    if image.is_empty() {
        return image;
    }
    let footprint = ball(radius);
    let eroded = grey_filter(&image, &footprint, /*take_max=*/false);
    let opened = grey_filter(&eroded, &footprint, /*take_max=*/true);
    image - opened
}

/// Returns (mean, population standard deviation) over the whole volume.
pub fn mean_and_stddev(image: &ArrayView3<f64>) -> (f64, f64) {
    let count = image.len() as f64;
    let mean = image.sum() / count;
    let second_moment = image.fold(0.0, |acc, &v| acc + (v - mean) * (v - mean));
    (mean, (second_moment / count).sqrt())
}

/// Rescales to zero mean and unit standard deviation. A constant image has
/// zero spread and standardises to NaN everywhere.
pub fn standardise(image: Array3<f64>) -> Array3<f64> {
    let (mean, stddev) = mean_and_stddev(&image.view());
    image.mapv_into(|v| (v - mean) / stddev)
}

/// Element-wise `numerator / denominator`.
pub fn divide(numerator: Array3<f64>, denominator: &Array3<f64>) -> Array3<f64> {
    let mut quotient = numerator;
    Zip::from(&mut quotient).and(denominator).for_each(|q, &d| *q /= d);
    quotient
}

// mod tests.

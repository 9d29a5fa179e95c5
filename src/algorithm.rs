// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Spot detection in 3D fluorescence microscopy volumes. Given a volume
//! indexed `(z, y, x)`, a detector returns a [DetectionResult]: a table
//! of the detected spots (intensity-weighted centroid, voxel count and mean
//! intensity of each), the image that was thresholded, and the label volume
//! assigning each voxel to a spot.
//!
//! Two strategies are provided:
//!
//! * [detect_spots_dog()] thresholds a difference of Gaussians (DoG)
//!   band-passed copy of the volume. The band-pass suppresses both pixel
//!   noise and slowly varying background, so the threshold is in units of
//!   the transformed image (standard deviations, when the transformation
//!   standardises).
//! * [detect_spots_int()] thresholds raw intensity directly. Holes inside
//!   each foreground object are filled, and when more than one object is
//!   found the tiny ones (fewer than [MIN_OBJECT_SIZE] voxels) are
//!   discarded.
//!
//! Either strategy can grow each spot outward by a fixed Euclidean distance
//! (`expand_px`) before measuring. Grown spots never overwrite each other.
//!
//! # Measurement
//!
//! Whatever image was thresholded, spot measurements are always taken on the
//! raw input volume. Centroids are intensity weighted; a spot whose raw
//! intensities sum to zero has an undefined (NaN) centroid.
//!
//! # Connectivity
//!
//! DoG foreground is grouped by face adjacency only (each voxel has 6
//! neighbors). Intensity foreground is grouped by face or edge adjacency (18
//! neighbors), so diagonally touching bright voxels in one plane join the
//! same spot.

use std::time::Instant;

use log::{debug, info};
use ndarray::{Array3, ArrayBase, ArrayView3, Data, Dimension, Ix3};

use crate::detection_result::{DetectionResult, SpotTable};
use crate::dog_transform::DifferenceOfGaussiansTransformation;
use crate::errors::{DetectionError, InputError};
use crate::image_funcs::{to_f64, PixelValue};
use crate::labeling::{expand_labels, fill_holes, label, remove_small_objects,
                      Connectivity};
use crate::region_props::extract_spot_table;

/// Objects smaller than this many voxels are dropped by [detect_spots_int()]
/// when it finds more than one object.
pub const MIN_OBJECT_SIZE: usize = 5;

/// Returns a 3D view of `image`, or an error reporting its actual
/// dimensionality.
pub fn check_input_image<A, S, D>(image: &ArrayBase<S, D>)
                                  -> Result<ArrayView3<'_, A>, InputError>
where S: Data<Elem = A>, D: Dimension
{
    image.view().into_dimensionality::<Ix3>()
        .map_err(|_| InputError::Dimensionality{ndim: image.ndim()})
}

/// Detects spots by thresholding a DoG transformation of `image`.
///
/// # Arguments
///   `image` - The volume to search. Must be 3 dimensional.
///
///   `threshold` - Voxels whose transformed value is strictly greater than
///   this are foreground.
///
///   `expand_px` - If given and non-zero, each spot is grown by this
///   Euclidean distance (in voxels) before measurement.
///
///   `transform` - The DoG transformation to apply before thresholding.
///
/// # Returns
/// [DetectionResult] whose image is the transformed volume.
pub fn detect_spots_dog<T, S, D>(image: &ArrayBase<S, D>, threshold: f64,
                                 expand_px: Option<f64>,
                                 transform: &DifferenceOfGaussiansTransformation)
                                 -> Result<DetectionResult<f64>, DetectionError>
where T: PixelValue, S: Data<Elem = T>, D: Dimension
{
    let image = check_input_image(image)?;
    let transformed = transform.transform(&image);

    let label_start = Instant::now();
    let foreground = transformed.mapv(|v| v > threshold);
    let (labels, num_labels) = label(&foreground.view(), Connectivity::FACES);
    info!("DoG thresholding at {} found {} regions in {:?}",
          threshold, num_labels, label_start.elapsed());

    let raw = to_f64(&image);
    build_detection_result(labels, &raw.view(), transformed, expand_px)
}

/// Detects spots by thresholding raw intensity.
///
/// # Arguments
///   `image` - The volume to search. Must be 3 dimensional.
///
///   `threshold` - Voxels whose value is strictly greater than this are
///   foreground.
///
///   `expand_px` - As for [detect_spots_dog()].
///
/// # Returns
/// [DetectionResult] whose image is a copy of the input volume.
pub fn detect_spots_int<T, S, D>(image: &ArrayBase<S, D>, threshold: f64,
                                 expand_px: Option<f64>)
                                 -> Result<DetectionResult<T>, DetectionError>
where T: PixelValue, S: Data<Elem = T>, D: Dimension
{
    let image = check_input_image(image)?;
    let raw = to_f64(&image);

    let label_start = Instant::now();
    let foreground = fill_holes(&raw.mapv(|v| v > threshold).view());
    let (mut labels, num_labels) =
        label(&foreground.view(), Connectivity::FACES_AND_EDGES);
    if num_labels > 1 {
        labels = remove_small_objects(labels, MIN_OBJECT_SIZE);
    }
    info!("Intensity thresholding at {} found {} regions in {:?}",
          threshold, num_labels, label_start.elapsed());

    build_detection_result(labels, &raw.view(), image.to_owned(), expand_px)
}

// Common to both strategies: optional expansion, measurement on the raw
// intensities, and result validation.
fn build_detection_result<A>(labels: Array3<u32>, raw: &ArrayView3<f64>,
                             image: Array3<A>, expand_px: Option<f64>)
                             -> Result<DetectionResult<A>, DetectionError> {
    let labels = match expand_px {
        Some(distance) if distance != 0.0 => {
            let expand_start = Instant::now();
            let expanded = expand_labels(&labels.view(), distance);
            debug!("Expanded labels by {} in {:?}", distance, expand_start.elapsed());
            expanded
        },
        _ => labels,
    };
    let table = if labels.iter().all(|&l| l == 0) {
        SpotTable::empty()
    } else {
        extract_spot_table(&labels.view(), raw)
    };
    info!("Detected {} spots", table.len());
    Ok(DetectionResult::new(table, image.into_dyn(), labels.into_dyn())?)
}

// mod tests.

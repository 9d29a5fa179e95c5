// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::PathBuf;

use thiserror::Error;

/// Problems with an image handed to one of the detectors, found before any
/// numeric work is done.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    /// The value is not a pixel array at all.
    #[error("Expected pixel array for input image but got {actual}")]
    WrongType { actual: String },

    #[error("Expected 3D input image but got {ndim}-dimensional")]
    Dimensionality { ndim: usize },
}

/// Invalid parameters for a difference of Gaussians transformation.
#[derive(Debug, Error, PartialEq)]
pub enum TransformationError {
    #[error("At least one sigma is non-numeric! narrow={narrow}, wide={wide}")]
    NonNumericSigma { narrow: f64, wide: f64 },

    #[error("Sigma values must be non-negative: narrow={narrow}, wide={wide}")]
    NegativeSigma { narrow: f64, wide: f64 },

    #[error("sigma for narrow Gaussian must be strictly less than sigma for \
             wide Gaussian, but {narrow} >= {wide}")]
    SigmaOrder { narrow: f64, wide: f64 },
}

/// Failure to build a transformation from a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("Failed to parse config {}: {source}", path.display())]
    Parse { path: PathBuf, source: serde_json::Error },

    #[error(transparent)]
    Transformation(#[from] TransformationError),
}

/// One broken invariant of a [crate::DetectionResult].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResultViolation {
    #[error("Table columns don't match expectation: {observed:?} != {expected:?}")]
    TableColumns { observed: Vec<String>, expected: Vec<String> },

    #[error("{ndim}-dimensional (not 3!) image in spot detection result wrapper")]
    ImageDimensionality { ndim: usize },

    #[error("Label volume shape {labels:?} differs from image shape {image:?}")]
    LabelShape { labels: Vec<usize>, image: Vec<usize> },
}

/// Every invariant that a candidate detection result violated. Never empty.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{} error(s) creating spot detection result: {}",
        .errors.len(), join_messages(.errors))]
pub struct IllegalDetectionResult {
    pub errors: Vec<ResultViolation>,
}

fn join_messages(errors: &[ResultViolation]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DetectionError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    IllegalResult(#[from] IllegalDetectionResult),
}

/// Failure to assemble a volume from a directory of z-slices.
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Could not read {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("Could not decode slice {}: {source}", path.display())]
    Decode { path: PathBuf, source: image::ImageError },

    #[error("Slice {}: {source}", path.display())]
    WrongType { path: PathBuf, source: InputError },

    #[error("Slice {} is {actual:?} (WxH) but earlier slices are {expected:?}",
            path.display())]
    SliceShape { path: PathBuf, expected: (u32, u32), actual: (u32, u32) },

    #[error("No image slices found in {}", .0.display())]
    Empty(PathBuf),
}

// mod tests.

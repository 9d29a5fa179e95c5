// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Detection of fluorescent spots in 3D microscopy volumes.
//!
//! The entry points are [detect_spots_dog()] and [detect_spots_int()] (see
//! the [algorithm] module for how they differ). Both return a validated
//! [DetectionResult] whose table always has exactly the columns
//! `zc, yc, xc, area, intensityMean`, even when nothing was found.
//!
//! A [DifferenceOfGaussiansTransformation] is built once, from literal
//! parameters or from a JSON [DifferenceOfGaussiansSpecification], and can
//! then be shared by any number of detections.

pub mod algorithm;
pub mod detection_result;
pub mod dog_transform;
pub mod errors;
pub mod image_funcs;
pub mod labeling;
pub mod region_props;
pub mod volume_io;

pub use algorithm::{detect_spots_dog, detect_spots_int};
pub use detection_result::{DetectionResult, SpotColumn, SpotRecord, SpotTable,
                           DETECTION_RESULT_TABLE_COLUMNS};
pub use dog_transform::{DifferenceOfGaussiansSpecification,
                        DifferenceOfGaussiansTransformation,
                        ORIGINAL_LOOPTRACE_DOG_SPECIFICATION};
pub use errors::{DetectionError, IllegalDetectionResult, InputError,
                 TransformationError};

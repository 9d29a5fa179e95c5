// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Difference of Gaussians (DoG) band-pass transformation, used to enhance
//! spot-sized bright features ahead of thresholding.

use std::fmt::Debug;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};
use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, TransformationError};
use crate::image_funcs::{divide, gaussian_filter, standardise, to_f64,
                         white_tophat, PixelValue};

/// An image-to-image step run before differencing.
pub trait ImageEndomorphism: Debug + Send + Sync {
    fn apply(&self, image: ArrayView3<f64>) -> Array3<f64>;
}

/// A step run after differencing. It sees the original (untransformed)
/// input image alongside the differenced image.
pub trait ImageCombiner: Debug + Send + Sync {
    fn combine(&self, original: ArrayView3<f64>, differenced: Array3<f64>)
               -> Array3<f64>;
}

/// Background subtraction by morphological white top-hat with a ball of the
/// given radius.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WhiteTophat {
    pub radius: usize,
}

impl ImageEndomorphism for WhiteTophat {
    fn apply(&self, image: ArrayView3<f64>) -> Array3<f64> {
        white_tophat(&image, self.radius)
    }
}

/// Divides the differenced image by a Gaussian blur of the original image,
/// normalizing for local brightness.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DivideByGaussian {
    pub sigma: f64,
}

impl ImageCombiner for DivideByGaussian {
    fn combine(&self, original: ArrayView3<f64>, differenced: Array3<f64>)
               -> Array3<f64> {
        divide(differenced, &gaussian_filter(&original, self.sigma))
    }
}

/// A validated, immutable DoG configuration. Cheap to clone and safe to
/// share across threads; [transform()](Self::transform) may be called any
/// number of times and always gives the same output for the same input.
#[derive(Clone, Debug)]
pub struct DifferenceOfGaussiansTransformation {
    pre_diff: Option<Arc<dyn ImageEndomorphism>>,
    sigma_narrow: f64,
    sigma_wide: f64,
    post_diff: Option<Arc<dyn ImageCombiner>>,
    standardise: bool,
}

impl DifferenceOfGaussiansTransformation {
    /// # Arguments
    /// `pre_diff`: applied to the input before either blur. None means
    ///     identity.
    /// `sigma_narrow`, `sigma_wide`: Gaussian standard deviations in voxels.
    ///     Must be finite and non-negative with `sigma_narrow < sigma_wide`.
    /// `post_diff`: applied to (original input, narrow - wide). None means
    ///     the differenced image passes through.
    /// `standardise`: whether to rescale the output to zero mean and unit
    ///     standard deviation.
    ///
    /// Integer volumes are filtered in their native value range, not
    /// rescaled to [0, 1] first. With `standardise` or a dividing
    /// `post_diff` this makes no difference; otherwise the output (and any
    /// threshold applied to it) scales with the pixel values.
    pub fn new(pre_diff: Option<Arc<dyn ImageEndomorphism>>,
               sigma_narrow: f64, sigma_wide: f64,
               post_diff: Option<Arc<dyn ImageCombiner>>,
               standardise: bool)
               -> Result<DifferenceOfGaussiansTransformation, TransformationError> {
        if !sigma_narrow.is_finite() || !sigma_wide.is_finite() {
            return Err(TransformationError::NonNumericSigma{
                narrow: sigma_narrow, wide: sigma_wide});
        }
        if sigma_narrow < 0.0 || sigma_wide < 0.0 {
            return Err(TransformationError::NegativeSigma{
                narrow: sigma_narrow, wide: sigma_wide});
        }
        if sigma_narrow >= sigma_wide {
            return Err(TransformationError::SigmaOrder{
                narrow: sigma_narrow, wide: sigma_wide});
        }
        Ok(DifferenceOfGaussiansTransformation{
            pre_diff, sigma_narrow, sigma_wide, post_diff, standardise})
    }

    /// Reads a [DifferenceOfGaussiansSpecification] from a JSON file and
    /// builds its transformation.
    pub fn from_config_file(path: &Path)
                            -> Result<DifferenceOfGaussiansTransformation, ConfigError> {
        Ok(DifferenceOfGaussiansSpecification::from_config_file(path)?
           .transformation()?)
    }

    pub fn transform<T: PixelValue>(&self, image: &ArrayView3<T>) -> Array3<f64> {
        let transform_start = Instant::now();
        let original = to_f64(image);
        let input = match &self.pre_diff {
            Some(step) => step.apply(original.view()),
            None => original.clone(),
        };
        let narrow = gaussian_filter(&input.view(), self.sigma_narrow);
        let wide = gaussian_filter(&input.view(), self.sigma_wide);
        let mut result = narrow - wide;
        if let Some(step) = &self.post_diff {
            result = step.combine(original.view(), result);
        }
        if self.standardise {
            result = standardise(result);
        }
        debug!("DoG sigmas {} / {} on {:?}", self.sigma_narrow, self.sigma_wide,
               image.dim());
        info!("DoG transform in {:?}", transform_start.elapsed());
        result
    }

    pub fn pre_diff(&self) -> Option<&Arc<dyn ImageEndomorphism>> {
        self.pre_diff.as_ref()
    }
    pub fn sigma_narrow(&self) -> f64 {
        self.sigma_narrow
    }
    pub fn sigma_wide(&self) -> f64 {
        self.sigma_wide
    }
    pub fn post_diff(&self) -> Option<&Arc<dyn ImageCombiner>> {
        self.post_diff.as_ref()
    }
    pub fn standardise(&self) -> bool {
        self.standardise
    }
}

// Steps are compared by their Debug rendering, which for the provided steps
// includes every parameter.
impl PartialEq for DifferenceOfGaussiansTransformation {
    fn eq(&self, other: &Self) -> bool {
        self.sigma_narrow == other.sigma_narrow &&
            self.sigma_wide == other.sigma_wide &&
            self.standardise == other.standardise &&
            format!("{:?}", self.pre_diff) == format!("{:?}", other.pre_diff) &&
            format!("{:?}", self.post_diff) == format!("{:?}", other.post_diff)
    }
}

/// Plain-data description of a DoG transformation, as stored in JSON
/// config files.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DifferenceOfGaussiansSpecification {
    /// Run a radius 2 white top-hat before differencing.
    pub apply_white_tophat: bool,
    pub sigma_narrow: f64,
    pub sigma_wide: f64,
    /// If set, divide the difference by a Gaussian blur (this sigma) of the
    /// original image.
    pub sigma_post_divide: Option<f64>,
    pub standardise: bool,
}

/// Ball radius of the top-hat pre-step.
pub const WHITE_TOPHAT_RADIUS: usize = 2;

/// The settings looptrace has always used for DoG spot detection.
pub const ORIGINAL_LOOPTRACE_DOG_SPECIFICATION: DifferenceOfGaussiansSpecification =
    DifferenceOfGaussiansSpecification{
        apply_white_tophat: true,
        sigma_narrow: 0.8,
        sigma_wide: 1.3,
        sigma_post_divide: Some(3.0),
        standardise: true,
    };

impl DifferenceOfGaussiansSpecification {
    pub fn from_config_file(path: &Path)
                            -> Result<DifferenceOfGaussiansSpecification, ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io{path: path.to_path_buf(), source})?;
        let specification = serde_json::from_str(&contents)
            .map_err(|source| ConfigError::Parse{path: path.to_path_buf(), source})?;
        Ok(specification)
    }

    pub fn transformation(&self)
                          -> Result<DifferenceOfGaussiansTransformation, TransformationError> {
        let pre_diff: Option<Arc<dyn ImageEndomorphism>> = if self.apply_white_tophat {
            Some(Arc::new(WhiteTophat{radius: WHITE_TOPHAT_RADIUS}))
        } else {
            None
        };
        let post_diff: Option<Arc<dyn ImageCombiner>> = self.sigma_post_divide
            .map(|sigma| Arc::new(DivideByGaussian{sigma}) as Arc<dyn ImageCombiner>);
        DifferenceOfGaussiansTransformation::new(
            pre_diff, self.sigma_narrow, self.sigma_wide, post_diff, self.standardise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;
    use crate::image_funcs::mean_and_stddev;

    fn bare(narrow: f64, wide: f64)
            -> Result<DifferenceOfGaussiansTransformation, TransformationError> {
        DifferenceOfGaussiansTransformation::new(None, narrow, wide, None, false)
    }

    fn spot_volume() -> Array3<u16> {
        Array3::from_shape_fn((7, 9, 9), |(z, y, x)| {
            let d2 = (z as f64 - 3.0).powi(2) + (y as f64 - 4.0).powi(2) +
                (x as f64 - 4.0).powi(2);
            100 + (400.0 * (-d2 / 2.0).exp()) as u16
        })
    }

    #[test]
    fn test_sigma_validation() {
        assert!(bare(0.8, 1.3).is_ok());
        assert!(bare(0.0, 1.0).is_ok());
        assert_eq!(bare(1.3, 0.8).unwrap_err(),
                   TransformationError::SigmaOrder{narrow: 1.3, wide: 0.8});
        assert_eq!(bare(1.0, 1.0).unwrap_err(),
                   TransformationError::SigmaOrder{narrow: 1.0, wide: 1.0});
        assert!(matches!(bare(f64::NAN, 1.0).unwrap_err(),
                         TransformationError::NonNumericSigma{..}));
        assert!(matches!(bare(0.5, f64::INFINITY).unwrap_err(),
                         TransformationError::NonNumericSigma{..}));
        assert!(matches!(bare(-0.5, 1.0).unwrap_err(),
                         TransformationError::NegativeSigma{..}));
    }

    #[test]
    fn test_transform_enhances_spot() {
        let transform = bare(0.8, 1.3).unwrap();
        let image = spot_volume();
        let result = transform.transform(&image.view());
        assert_eq!(result.dim(), image.dim());
        // The spot center is the band-pass maximum.
        let center = result[[3, 4, 4]];
        assert!(result.iter().all(|&v| v <= center));
        assert!(center > 0.0);
    }

    #[test]
    fn test_transform_is_repeatable() {
        let transform = ORIGINAL_LOOPTRACE_DOG_SPECIFICATION.transformation().unwrap();
        let image = spot_volume();
        let first = transform.transform(&image.view());
        let second = transform.transform(&image.view());
        assert_eq!(first, second);
        assert!(first.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_standardised_output() {
        let transform = DifferenceOfGaussiansTransformation::new(
            None, 0.8, 1.3, None, true).unwrap();
        let result = transform.transform(&spot_volume().view());
        let (mean, stddev) = mean_and_stddev(&result.view());
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(stddev, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_post_diff_sees_original_image() {
        #[derive(Debug)]
        struct KeepOriginal;
        impl ImageCombiner for KeepOriginal {
            fn combine(&self, original: ArrayView3<f64>, _differenced: Array3<f64>)
                       -> Array3<f64> {
                original.to_owned()
            }
        }
        #[derive(Debug)]
        struct Zero;
        impl ImageEndomorphism for Zero {
            fn apply(&self, image: ArrayView3<f64>) -> Array3<f64> {
                Array3::zeros(image.raw_dim())
            }
        }
        let transform = DifferenceOfGaussiansTransformation::new(
            Some(Arc::new(Zero)), 0.8, 1.3, Some(Arc::new(KeepOriginal)), false).unwrap();
        let image = spot_volume();
        let result = transform.transform(&image.view());
        assert_eq!(result, image.mapv(f64::from));
    }

    #[test]
    fn test_config_file_round_trip() {
        let path = std::env::temp_dir().join(
            format!("spot_detect_dog_{}.json", std::process::id()));
        fs::write(&path, serde_json::to_string(&ORIGINAL_LOOPTRACE_DOG_SPECIFICATION)
                  .unwrap()).unwrap();
        let from_file = DifferenceOfGaussiansTransformation::from_config_file(&path).unwrap();
        fs::remove_file(&path).unwrap();

        let literal = DifferenceOfGaussiansTransformation::new(
            Some(Arc::new(WhiteTophat{radius: 2})), 0.8, 1.3,
            Some(Arc::new(DivideByGaussian{sigma: 3.0})), true).unwrap();
        assert_eq!(from_file, literal);
        assert_ne!(from_file, bare(0.8, 1.3).unwrap());
    }

    #[test]
    fn test_looptrace_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("demos/original__difference_of_gaussians.json");
        assert_eq!(DifferenceOfGaussiansSpecification::from_config_file(&path).unwrap(),
                   ORIGINAL_LOOPTRACE_DOG_SPECIFICATION);
        assert_eq!(DifferenceOfGaussiansTransformation::from_config_file(&path).unwrap(),
                   ORIGINAL_LOOPTRACE_DOG_SPECIFICATION.transformation().unwrap());
    }

    #[test]
    fn test_divide_by_gaussian_uses_original() {
        let original = Array3::<f64>::from_elem((3, 4, 5), 4.0);
        let differenced = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (z + y + x) as f64);
        let divided = DivideByGaussian{sigma: 3.0}
            .combine(original.view(), differenced.clone());
        assert_abs_diff_eq!(divided, differenced / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_config_file_errors() {
        let missing = std::env::temp_dir().join("spot_detect_no_such_config.json");
        assert!(matches!(
            DifferenceOfGaussiansSpecification::from_config_file(&missing).unwrap_err(),
            ConfigError::Io{..}));

        let path = std::env::temp_dir().join(
            format!("spot_detect_dog_bad_{}.json", std::process::id()));
        fs::write(&path, r#"{"apply_white_tophat": false, "sigma_narrow": 0.8,
            "sigma_wide": 1.3, "sigma_post_divide": null, "standardise": true,
            "extra": 1}"#).unwrap();
        let unknown_key = DifferenceOfGaussiansSpecification::from_config_file(&path);
        fs::write(&path, r#"{"apply_white_tophat": false, "sigma_narrow": 2.0,
            "sigma_wide": 1.3, "sigma_post_divide": null, "standardise": true}"#).unwrap();
        let bad_order = DifferenceOfGaussiansTransformation::from_config_file(&path);
        fs::remove_file(&path).unwrap();
        assert!(matches!(unknown_key.unwrap_err(), ConfigError::Parse{..}));
        assert!(matches!(bad_order.unwrap_err(),
                         ConfigError::Transformation(TransformationError::SigmaOrder{..})));
    }
}  // mod tests.

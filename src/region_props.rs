// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Per-region measurements over a label volume, and their conversion to the
//! canonical spot table.

use std::time::Instant;

use log::{debug, info};
use ndarray::ArrayView3;

use crate::detection_result::{SpotColumn, SpotTable, TableColumn};

// Native column names produced by regionprops_table().
pub const LABEL_KEY: &str = "label";
pub const CENTROID_KEY: &str = "centroid_weighted";
pub const AREA_KEY: &str = "area";
pub const MEAN_INTENSITY_KEY: &str = "intensity_mean";

/// Properties that [regionprops_table()] knows how to measure.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegionProperty {
    /// The region's label id.
    Label,
    /// Intensity-weighted centroid; one column per axis, suffixed `-0`,
    /// `-1`, `-2` for z, y, x.
    CentroidWeighted,
    /// Voxel count.
    Area,
    IntensityMean,
}

/// How native region property columns map to the canonical spot table.
/// Columns not listed here (such as `label`) are dropped.
pub const SPOT_DETECTION_COLUMN_RENAMING: [(&str, SpotColumn); 5] = [
    ("centroid_weighted-0", SpotColumn::Zc),
    ("centroid_weighted-1", SpotColumn::Yc),
    ("centroid_weighted-2", SpotColumn::Xc),
    ("area", SpotColumn::Area),
    ("intensity_mean", SpotColumn::IntensityMean),
];

// Running sums for one label.
#[derive(Clone, Default)]
struct Moments {
    count: usize,
    sum: f64,
    weighted_z: f64,
    weighted_y: f64,
    weighted_x: f64,
}

/// Measures `properties` for every label present in `labels`, reading voxel
/// intensities from `intensity`. Rows come out in ascending label order.
/// Column names follow the native naming (see the `*_KEY` constants).
///
/// # Panics
/// If `labels` and `intensity` differ in shape.
pub fn regionprops_table(labels: &ArrayView3<u32>, intensity: &ArrayView3<f64>,
                         properties: &[RegionProperty]) -> Vec<TableColumn> {
    assert_eq!(labels.dim(), intensity.dim(),
               "Label volume and intensity image must have the same shape");
    let props_start = Instant::now();
    let max_label = labels.iter().copied().max().unwrap_or(0) as usize;
    let mut moments = vec![Moments::default(); max_label + 1];
    for (((z, y, x), &l), &value) in labels.indexed_iter().zip(intensity.iter()) {
        if l == 0 {
            continue;
        }
        let m = &mut moments[l as usize];
        m.count += 1;
        m.sum += value;
        m.weighted_z += z as f64 * value;
        m.weighted_y += y as f64 * value;
        m.weighted_x += x as f64 * value;
    }
    let present: Vec<(usize, &Moments)> = moments.iter().enumerate()
        .skip(1)
        .filter(|(_, m)| m.count > 0)
        .collect();

    let mut columns = Vec::<TableColumn>::new();
    for property in properties {
        match property {
            RegionProperty::Label => {
                columns.push(TableColumn::new(
                    LABEL_KEY, present.iter().map(|(l, _)| *l as f64).collect()));
            },
            RegionProperty::CentroidWeighted => {
                let per_axis: [fn(&Moments) -> f64; 3] =
                    [|m| m.weighted_z, |m| m.weighted_y, |m| m.weighted_x];
                for (axis, weighted) in per_axis.iter().enumerate() {
                    columns.push(TableColumn::new(
                        &format!("{}-{}", CENTROID_KEY, axis),
                        present.iter().map(|(_, m)| weighted(m) / m.sum).collect()));
                }
            },
            RegionProperty::Area => {
                columns.push(TableColumn::new(
                    AREA_KEY, present.iter().map(|(_, m)| m.count as f64).collect()));
            },
            RegionProperty::IntensityMean => {
                columns.push(TableColumn::new(
                    MEAN_INTENSITY_KEY,
                    present.iter().map(|(_, m)| m.sum / m.count as f64).collect()));
            },
        }
    }
    for (l, m) in &present {
        debug!("Region {}: {} voxels, intensity sum {}", l, m.count, m.sum);
    }
    info!("Measured {} regions in {:?}", present.len(), props_start.elapsed());
    columns
}

/// Renames native region property columns to their canonical spot table
/// names, dropping any column without a canonical counterpart. Columns keep
/// the order of [SPOT_DETECTION_COLUMN_RENAMING]; a native column missing
/// from `columns` is simply absent from the result.
pub fn rename_to_spot_columns(mut columns: Vec<TableColumn>) -> SpotTable {
    let mut renamed = Vec::<TableColumn>::new();
    for (native, canonical) in SPOT_DETECTION_COLUMN_RENAMING {
        if let Some(pos) = columns.iter().position(|c| c.name == native) {
            let column = columns.swap_remove(pos);
            renamed.push(TableColumn::new(canonical.name(), column.values));
        }
    }
    SpotTable::from_columns(renamed)
}

/// Builds the spot table for a nonempty label volume: intensity-weighted
/// centroid, area and mean intensity of each region, one row per label in
/// ascending order.
pub fn extract_spot_table(labels: &ArrayView3<u32>, intensity: &ArrayView3<f64>)
                          -> SpotTable {
    let native = regionprops_table(
        labels, intensity,
        &[RegionProperty::Label, RegionProperty::CentroidWeighted,
          RegionProperty::Area, RegionProperty::IntensityMean]);
    rename_to_spot_columns(native)
}

// mod tests.

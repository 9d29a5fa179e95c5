// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::io;

use ndarray::ArrayD;

use crate::errors::{IllegalDetectionResult, ResultViolation};

/// The columns of a spot table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SpotColumn {
    /// Intensity-weighted centroid along z.
    Zc,
    Yc,
    Xc,
    /// Number of voxels in the region.
    Area,
    /// Mean raw intensity over the region's voxels.
    IntensityMean,
}

impl SpotColumn {
    pub const fn name(&self) -> &'static str {
        match self {
            SpotColumn::Zc => "zc",
            SpotColumn::Yc => "yc",
            SpotColumn::Xc => "xc",
            SpotColumn::Area => "area",
            SpotColumn::IntensityMean => "intensityMean",
        }
    }
}

/// The exact columns, in order, of every [DetectionResult] table.
pub const DETECTION_RESULT_TABLE_COLUMNS: [SpotColumn; 5] = [
    SpotColumn::Zc, SpotColumn::Yc, SpotColumn::Xc,
    SpotColumn::Area, SpotColumn::IntensityMean,
];

fn expected_column_names() -> Vec<String> {
    DETECTION_RESULT_TABLE_COLUMNS.iter().map(|c| c.name().to_string()).collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableColumn {
    pub name: String,
    pub values: Vec<f64>,
}

impl TableColumn {
    pub fn new(name: &str, values: Vec<f64>) -> TableColumn {
        TableColumn{name: name.to_string(), values}
    }
}

/// A small column-oriented table of `f64` measurements. Rows are identified
/// only by their 0-based position.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpotTable {
    columns: Vec<TableColumn>,
}

impl SpotTable {
    /// # Panics
    /// If the columns differ in length.
    pub fn from_columns(columns: Vec<TableColumn>) -> SpotTable {
        if let Some(first) = columns.first() {
            for c in &columns {
                assert_eq!(c.values.len(), first.values.len(),
                           "Column '{}' length differs from column '{}'",
                           c.name, first.name);
            }
        }
        SpotTable{columns}
    }

    /// A table with all of the canonical columns and no rows.
    pub fn empty() -> SpotTable {
        SpotTable{columns: DETECTION_RESULT_TABLE_COLUMNS.iter()
                  .map(|c| TableColumn::new(c.name(), Vec::new()))
                  .collect()}
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.values.as_slice())
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A new table with just the named columns, in the given order. Unknown
    /// names are skipped.
    pub fn select(&self, names: &[&str]) -> SpotTable {
        SpotTable{columns: names.iter()
                  .filter_map(|n| self.columns.iter().find(|c| c.name == *n).cloned())
                  .collect()}
    }

    /// Writes the table as CSV. The first, unnamed column is the row index.
    pub fn write_csv<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        let header: Vec<&str> = self.column_names();
        writeln!(writer, ",{}", header.join(","))?;
        for row in 0..self.len() {
            let values: Vec<String> = self.columns.iter()
                .map(|c| c.values[row].to_string())
                .collect();
            writeln!(writer, "{},{}", row, values.join(","))?;
        }
        Ok(())
    }
}

/// A point in a 3D image, in (fractional) voxel coordinates.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ImagePoint3D {
    pub z: f64,
    pub y: f64,
    pub x: f64,
}

/// One row of a [DetectionResult] table.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SpotRecord {
    pub zc: f64,
    pub yc: f64,
    pub xc: f64,
    pub area: f64,
    pub intensity_mean: f64,
}

impl SpotRecord {
    pub fn centroid(&self) -> ImagePoint3D {
        ImagePoint3D{z: self.zc, y: self.yc, x: self.xc}
    }
}

/// The outcome of a spot detection: the table of detected spots, the image
/// (after any preprocessing) that was thresholded, and the label volume
/// giving each voxel's region (0 for none).
///
/// Instances can only be obtained through [DetectionResult::new()], which
/// guarantees that the table has exactly the
/// [DETECTION_RESULT_TABLE_COLUMNS], that the image is 3 dimensional, and
/// that the labels have the image's shape.
#[derive(Clone, Debug)]
pub struct DetectionResult<A> {
    table: SpotTable,
    image: ArrayD<A>,
    labels: ArrayD<u32>,
}

impl<A> DetectionResult<A> {
    /// Validates the parts of a detection result. Every violated invariant
    /// is reported, not only the first.
    pub fn new(table: SpotTable, image: ArrayD<A>, labels: ArrayD<u32>)
               -> Result<DetectionResult<A>, IllegalDetectionResult> {
        let mut errors = Vec::<ResultViolation>::new();
        let observed = table.column_names();
        let expected = expected_column_names();
        if observed != expected {
            errors.push(ResultViolation::TableColumns{
                observed: observed.iter().map(|s| s.to_string()).collect(),
                expected});
        }
        if image.ndim() != 3 {
            errors.push(ResultViolation::ImageDimensionality{ndim: image.ndim()});
        }
        if labels.shape() != image.shape() {
            errors.push(ResultViolation::LabelShape{
                labels: labels.shape().to_vec(), image: image.shape().to_vec()});
        }
        if !errors.is_empty() {
            return Err(IllegalDetectionResult{errors});
        }
        Ok(DetectionResult{table, image, labels})
    }

    pub fn table(&self) -> &SpotTable {
        &self.table
    }

    pub fn image(&self) -> &ArrayD<A> {
        &self.image
    }

    pub fn labels(&self) -> &ArrayD<u32> {
        &self.labels
    }

    /// The table's rows as typed records, in table order.
    pub fn spots(&self) -> Vec<SpotRecord> {
        // Construction guarantees that all of these columns exist.
        let column = |c: SpotColumn| self.table.column(c.name()).unwrap_or(&[]);
        let (zc, yc, xc) = (column(SpotColumn::Zc), column(SpotColumn::Yc),
                            column(SpotColumn::Xc));
        let (area, mean) = (column(SpotColumn::Area),
                            column(SpotColumn::IntensityMean));
        (0..self.table.len())
            .map(|i| SpotRecord{zc: zc[i], yc: yc[i], xc: xc[i],
                                area: area[i], intensity_mean: mean[i]})
            .collect()
    }

    /// Consumes the result, returning (table, image, labels).
    pub fn into_parts(self) -> (SpotTable, ArrayD<A>, ArrayD<u32>) {
        (self.table, self.image, self.labels)
    }
}

// mod tests.

// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::f64::consts::PI;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, ValueEnum};
use env_logger;
use image::{DynamicImage, Rgb};
use imageproc::drawing;
use log::info;

use spot_detect::algorithm::{detect_spots_dog, detect_spots_int};
use spot_detect::detection_result::{SpotRecord, SpotTable};
use spot_detect::dog_transform::{DifferenceOfGaussiansTransformation,
                                 ORIGINAL_LOOPTRACE_DOG_SPECIFICATION};
use spot_detect::volume_io::{load_volume_from_slices, max_projection_image};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Method {
    /// Threshold a difference of Gaussians transformation of the volume.
    Dog,
    /// Threshold raw intensity.
    Intensity,
}

/// Example program for running spot detection on a 3D volume stored as a
/// directory of z-slice images.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// Directory of grayscale z-slice images, ordered by file name.
    #[arg(short, long)]
    input: String,

    /// Directory where spots.csv and the annotated projection are written.
    #[arg(short, long)]
    output: String,

    /// Detection strategy.
    #[arg(short, long, value_enum, default_value_t = Method::Dog)]
    method: Method,

    /// Foreground threshold, in units of the thresholded image.
    #[arg(short, long)]
    threshold: f64,

    /// Grow each spot by this many voxels before measuring.
    #[arg(short, long)]
    expand: Option<f64>,

    /// JSON file with DoG parameters. Defaults to the looptrace settings.
    #[arg(short, long)]
    dog_config: Option<String>,
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let output_metadata = fs::metadata(&args.output).unwrap_or_else(|e| {
        panic!("Output dir '{}' does not exist? {:?}", args.output, e);
    });
    assert!(output_metadata.is_dir(),
            "Output '{}' must be a directory", args.output);

    let volume = load_volume_from_slices(Path::new(&args.input)).unwrap_or_else(|e| {
        panic!("Could not load volume from '{}': {}", args.input, e);
    });
    let (depth, height, width) = volume.dim();

    let detection_start = Instant::now();
    let (table, spots) = match args.method {
        Method::Dog => {
            let transform = match &args.dog_config {
                Some(path) => DifferenceOfGaussiansTransformation::from_config_file(
                    Path::new(path)).unwrap_or_else(|e| panic!("{}", e)),
                None => ORIGINAL_LOOPTRACE_DOG_SPECIFICATION.transformation()
                    .unwrap_or_else(|e| panic!("{}", e)),
            };
            let result = detect_spots_dog(&volume, args.threshold, args.expand, &transform)
                .unwrap_or_else(|e| panic!("{}", e));
            let spots = result.spots();
            (result.into_parts().0, spots)
        },
        Method::Intensity => {
            let result = detect_spots_int(&volume, args.threshold, args.expand)
                .unwrap_or_else(|e| panic!("{}", e));
            let spots = result.spots();
            (result.into_parts().0, spots)
        },
    };
    let elapsed = detection_start.elapsed();
    info!("ZxYxX: {}x{}x{}; method {:?} threshold {}",
          depth, height, width, args.method, args.threshold);
    info!("Spot detection found {} spots in {:?}", spots.len(), elapsed);

    write_table(&table, &PathBuf::from(&args.output).join("spots.csv"));

    // Scribble marks into the projection showing where we found spots.
    let mut img_color = DynamicImage::ImageLuma8(
        max_projection_image(&volume.view())).into_rgb8();
    for spot in &spots {
        let center = spot.centroid();
        if !center.x.is_finite() || !center.y.is_finite() {
            continue;
        }
        drawing::draw_hollow_circle_mut(
            &mut img_color,
            (center.x.round() as i32, center.y.round() as i32),
            marker_radius(spot),
            Rgb::<u8>([255, 0, 0]));
    }
    let mut mip_path = PathBuf::from(&args.output);
    mip_path.push("spots_mip.png");
    img_color.save(&mip_path).unwrap();
    info!("Wrote {:?}", mip_path);
}

// Radius of a sphere with the spot's volume, at least 2 so that single-voxel
// spots remain visible.
fn marker_radius(spot: &SpotRecord) -> i32 {
    let radius = (3.0 * spot.area / (4.0 * PI)).cbrt();
    (radius.ceil() as i32).max(2)
}

fn write_table(table: &SpotTable, path: &Path) {
    let file = fs::File::create(path).unwrap_or_else(|e| {
        panic!("Could not create '{}': {:?}", path.display(), e);
    });
    let mut writer = BufWriter::new(file);
    table.write_csv(&mut writer).unwrap();
    writer.flush().unwrap();
    info!("Wrote {} rows to {:?}", table.len(), path);
}

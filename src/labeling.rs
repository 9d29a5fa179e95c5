// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Connected component labeling and the label volume clean-up steps that
//! follow it: hole filling, small object removal and label expansion.

use std::collections::VecDeque;
use std::time::Instant;

use log::debug;
use ndarray::{Array3, ArrayView3, Axis};

/// Which voxels count as neighbors, as the maximum number of coordinates
/// in which two neighbors may differ (each by one). Rank 1 connects faces
/// only (6 neighbors), rank 2 adds edges (18) and rank 3 adds corners (26).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Connectivity(u8);

impl Connectivity {
    pub const FACES: Connectivity = Connectivity(1);
    pub const FACES_AND_EDGES: Connectivity = Connectivity(2);
    pub const FULL: Connectivity = Connectivity(3);

    pub fn rank(&self) -> u8 {
        self.0
    }

    fn neighbor_offsets(&self) -> Vec<(isize, isize, isize)> {
        let mut offsets = Vec::new();
        for dz in -1..=1_isize {
            for dy in -1..=1_isize {
                for dx in -1..=1_isize {
                    let differing = dz.abs() + dy.abs() + dx.abs();
                    if differing > 0 && differing <= self.0 as isize {
                        offsets.push((dz, dy, dx));
                    }
                }
            }
        }
        offsets
    }

    // Neighbor offsets that precede the center voxel in raster scan order.
    fn prior_offsets(&self) -> Vec<(isize, isize, isize)> {
        self.neighbor_offsets().into_iter()
            .filter(|&(dz, dy, dx)| (dz, dy, dx) < (0, 0, 0))
            .collect()
    }
}

fn neighbor_index(dims: (usize, usize, usize), z: usize, y: usize, x: usize,
                  offset: (isize, isize, isize)) -> Option<(usize, usize, usize)> {
    let nz = z as isize + offset.0;
    let ny = y as isize + offset.1;
    let nx = x as isize + offset.2;
    if nz < 0 || ny < 0 || nx < 0 ||
        nz >= dims.0 as isize || ny >= dims.1 as isize || nx >= dims.2 as isize
    {
        return None;
    }
    Some((nz as usize, ny as usize, nx as usize))
}

// Disjoint-set forest over provisional labels. Roots are the smallest label
// of their set.
fn find_root(parents: &mut [u32], label: u32) -> u32 {
    let mut current = label;
    while current != parents[current as usize] {
        // Path halving.
        parents[current as usize] = parents[parents[current as usize] as usize];
        current = parents[current as usize];
    }
    current
}

fn union_labels(parents: &mut [u32], a: u32, b: u32) -> u32 {
    let root_a = find_root(parents, a);
    let root_b = find_root(parents, b);
    if root_a < root_b {
        parents[root_b as usize] = root_a;
        root_a
    } else {
        parents[root_a as usize] = root_b;
        root_b
    }
}

/// Assigns a unique positive label to every connected group of `true`
/// voxels in `mask`. Labels run from 1 to the returned count, numbered in
/// the raster scan order of each component's first voxel.
pub fn label(mask: &ArrayView3<bool>, connectivity: Connectivity)
             -> (Array3<u32>, u32) {
    let label_start = Instant::now();
    let dims = mask.dim();
    let prior = connectivity.prior_offsets();
    let mut provisional = Array3::<u32>::zeros(dims);
    // Index 0 is the background.
    let mut parents: Vec<u32> = vec![0];

    // First pass: provisional labels plus equivalences.
    for ((z, y, x), &foreground) in mask.indexed_iter() {
        if !foreground {
            continue;
        }
        let mut assigned = 0_u32;
        for &offset in &prior {
            let Some(n) = neighbor_index(dims, z, y, x, offset) else {
                continue;
            };
            let neighbor_label = provisional[n];
            if neighbor_label == 0 {
                continue;
            }
            assigned = if assigned == 0 {
                find_root(&mut parents, neighbor_label)
            } else {
                union_labels(&mut parents, assigned, neighbor_label)
            };
        }
        if assigned == 0 {
            assigned = parents.len() as u32;
            parents.push(assigned);
        }
        provisional[[z, y, x]] = assigned;
    }

    // Second pass: resolve to dense final labels.
    let mut final_label = vec![0_u32; parents.len()];
    let mut count = 0_u32;
    for value in provisional.iter_mut() {
        if *value == 0 {
            continue;
        }
        let root = find_root(&mut parents, *value) as usize;
        if final_label[root] == 0 {
            count += 1;
            final_label[root] = count;
        }
        *value = final_label[root];
    }
    debug!("Labeled {} components (connectivity {}) in {:?}",
           count, connectivity.rank(), label_start.elapsed());
    (provisional, count)
}

/// Sets background voxels that cannot reach the volume border through
/// face-connected background to foreground.
pub fn fill_holes(mask: &ArrayView3<bool>) -> Array3<bool> {
    let dims = mask.dim();
    let (nz, ny, nx) = dims;
    let faces = Connectivity::FACES.neighbor_offsets();
    let mut outside = Array3::<bool>::from_elem(dims, false);
    let mut queue = VecDeque::<(usize, usize, usize)>::new();
    for ((z, y, x), &foreground) in mask.indexed_iter() {
        let on_border = z == 0 || y == 0 || x == 0 ||
            z + 1 == nz || y + 1 == ny || x + 1 == nx;
        if on_border && !foreground {
            outside[[z, y, x]] = true;
            queue.push_back((z, y, x));
        }
    }
    while let Some((z, y, x)) = queue.pop_front() {
        for &offset in &faces {
            let Some(n) = neighbor_index(dims, z, y, x, offset) else {
                continue;
            };
            if !mask[n] && !outside[n] {
                outside[n] = true;
                queue.push_back(n);
            }
        }
    }
    outside.mapv_into(|reached| !reached)
}

/// Zeroes every labeled region with fewer than `min_size` voxels. Labels of
/// surviving regions are not renumbered.
pub fn remove_small_objects(labels: Array3<u32>, min_size: usize) -> Array3<u32> {
    let max_label = labels.iter().copied().max().unwrap_or(0) as usize;
    let mut sizes = vec![0_usize; max_label + 1];
    for &l in labels.iter() {
        sizes[l as usize] += 1;
    }
    let removed = sizes.iter().skip(1).filter(|&&s| s > 0 && s < min_size).count();
    debug!("Removing {} objects smaller than {} voxels", removed, min_size);
    labels.mapv_into(|l| if sizes[l as usize] < min_size { 0 } else { l })
}

// Marks a voxel with no nearest feature yet.
const NO_FEATURE: usize = usize::MAX;

// One dimensional squared distance transform (Felzenszwalb & Huttenlocher)
// over `dist`, carrying along the flat index of each sample's nearest
// feature voxel. Infinite entries are not sites.
fn distance_transform_1d(dist: &mut [f64], feature: &mut [usize],
                         sites: &mut Vec<usize>, bounds: &mut Vec<f64>) {
    sites.clear();
    bounds.clear();
    for q in 0..dist.len() {
        if dist[q].is_infinite() {
            continue;
        }
        let qf = q as f64;
        while let Some(&v) = sites.last() {
            let vf = v as f64;
            let s = ((dist[q] + qf * qf) - (dist[v] + vf * vf)) / (2.0 * (qf - vf));
            if sites.len() > 1 && s <= *bounds.last().unwrap_or(&f64::NEG_INFINITY) {
                sites.pop();
                bounds.pop();
                continue;
            }
            bounds.push(s);
            break;
        }
        sites.push(q);
    }
    if sites.is_empty() {
        return;
    }
    // bounds[k] is where sites[k + 1] starts being nearest.
    let input_dist: Vec<f64> = sites.iter().map(|&v| dist[v]).collect();
    let input_feature: Vec<usize> = sites.iter().map(|&v| feature[v]).collect();
    let mut k = 0;
    for p in 0..dist.len() {
        let pf = p as f64;
        while k < bounds.len() && bounds[k] < pf {
            k += 1;
        }
        let d = pf - sites[k] as f64;
        dist[p] = d * d + input_dist[k];
        feature[p] = input_feature[k];
    }
}

/// Exact Euclidean distance from every voxel to the nearest nonzero label,
/// along with the flat (row-major) index of that labeled voxel.
fn distance_and_feature_transform(labels: &ArrayView3<u32>)
                                  -> (Array3<f64>, Array3<usize>) {
    let dims = labels.dim();
    let mut dist = Array3::<f64>::from_elem(dims, f64::INFINITY);
    let mut feature = Array3::<usize>::from_elem(dims, NO_FEATURE);
    for (flat, ((z, y, x), &l)) in labels.indexed_iter().enumerate() {
        if l != 0 {
            dist[[z, y, x]] = 0.0;
            feature[[z, y, x]] = flat;
        }
    }
    let mut dist_buf = Vec::new();
    let mut feature_buf = Vec::new();
    let mut sites = Vec::new();
    let mut bounds = Vec::new();
    for axis in [Axis(2), Axis(1), Axis(0)] {
        for (mut dist_lane, mut feature_lane) in dist.lanes_mut(axis).into_iter()
            .zip(feature.lanes_mut(axis))
        {
            dist_buf.clear();
            dist_buf.extend(dist_lane.iter().copied());
            feature_buf.clear();
            feature_buf.extend(feature_lane.iter().copied());
            distance_transform_1d(&mut dist_buf, &mut feature_buf,
                                  &mut sites, &mut bounds);
            for (d, &v) in dist_lane.iter_mut().zip(&dist_buf) {
                *d = v;
            }
            for (f, &v) in feature_lane.iter_mut().zip(&feature_buf) {
                *f = v;
            }
        }
    }
    (dist.mapv_into(f64::sqrt), feature)
}

/// Grows each labeled region into the surrounding background by up to
/// `distance` voxels (Euclidean). A background voxel takes the label of its
/// nearest labeled voxel, so neighboring regions meet rather than overlap.
pub fn expand_labels(labels: &ArrayView3<u32>, distance: f64) -> Array3<u32> {
    let expand_start = Instant::now();
    if labels.iter().all(|&l| l == 0) {
        return labels.to_owned();
    }
    let (dist, feature) = distance_and_feature_transform(labels);
    let flat_labels: Vec<u32> = labels.iter().copied().collect();
    let mut expanded = Array3::<u32>::zeros(labels.dim());
    ndarray::Zip::from(&mut expanded).and(&dist).and(&feature)
        .for_each(|out, &d, &f| {
            if f != NO_FEATURE && d <= distance {
                *out = flat_labels[f];
            }
        });
    debug!("Expanded labels by {} in {:?}", distance, expand_start.elapsed());
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array3};

    fn mask_from_points(dims: (usize, usize, usize), points: &[(usize, usize, usize)])
                        -> Array3<bool> {
        let mut mask = Array3::<bool>::from_elem(dims, false);
        for &p in points {
            mask[p] = true;
        }
        mask
    }

    #[test]
    fn test_neighbor_counts() {
        assert_eq!(Connectivity::FACES.neighbor_offsets().len(), 6);
        assert_eq!(Connectivity::FACES_AND_EDGES.neighbor_offsets().len(), 18);
        assert_eq!(Connectivity::FULL.neighbor_offsets().len(), 26);
        assert_eq!(Connectivity::FULL.prior_offsets().len(), 13);
    }

    #[test]
    fn test_label_connectivity() {
        // Two voxels touching along an edge, and a third touching the second
        // only at a corner.
        let mask = mask_from_points((3, 3, 3), &[(0, 0, 0), (0, 1, 1), (1, 2, 2)]);
        let (_, n) = label(&mask.view(), Connectivity::FACES);
        assert_eq!(n, 3);
        let (_, n) = label(&mask.view(), Connectivity::FACES_AND_EDGES);
        assert_eq!(n, 2);
        let (labels, n) = label(&mask.view(), Connectivity::FULL);
        assert_eq!(n, 1);
        assert_eq!(labels[[1, 2, 2]], 1);
    }

    #[test]
    fn test_label_numbering_follows_raster_order() {
        // A "U" shape whose arms are first seen as separate provisional
        // labels, plus a later isolated voxel.
        let mut mask = Array3::<bool>::from_elem((1, 4, 5), false);
        mask[[0, 0, 0]] = true;
        mask[[0, 1, 0]] = true;
        mask[[0, 0, 2]] = true;
        mask[[0, 1, 2]] = true;
        mask[[0, 2, 0]] = true;
        mask[[0, 2, 1]] = true;
        mask[[0, 2, 2]] = true;
        mask[[0, 3, 4]] = true;
        let (labels, n) = label(&mask.view(), Connectivity::FACES);
        assert_eq!(n, 2);
        assert_eq!(labels[[0, 0, 0]], 1);
        assert_eq!(labels[[0, 0, 2]], 1);
        assert_eq!(labels[[0, 2, 1]], 1);
        assert_eq!(labels[[0, 3, 4]], 2);
        assert_eq!(labels[[0, 3, 3]], 0);
    }

    #[test]
    fn test_label_empty() {
        let mask = Array3::<bool>::from_elem((2, 2, 2), false);
        let (labels, n) = label(&mask.view(), Connectivity::FULL);
        assert_eq!(n, 0);
        assert!(labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn test_fill_holes() {
        // Hollow 3x3x3 shell inside a 5x5x5 volume.
        let mut mask = Array3::<bool>::from_elem((5, 5, 5), false);
        mask.slice_mut(s![1..4, 1..4, 1..4]).fill(true);
        mask[[2, 2, 2]] = false;
        let filled = fill_holes(&mask.view());
        assert!(filled[[2, 2, 2]]);
        assert!(!filled[[0, 0, 0]]);
        assert_eq!(filled.iter().filter(|&&v| v).count(), 27);
    }

    #[test]
    fn test_fill_holes_leaves_open_cavity() {
        // Cavity connected to the border through a tunnel is not a hole.
        let mut mask = Array3::<bool>::from_elem((5, 5, 5), false);
        mask.slice_mut(s![1..4, 1..4, 1..4]).fill(true);
        mask[[2, 2, 2]] = false;
        mask[[2, 2, 3]] = false;
        let filled = fill_holes(&mask.view());
        assert!(!filled[[2, 2, 2]]);
        assert_eq!(filled, mask);
    }

    #[test]
    fn test_remove_small_objects() {
        let mut labels = Array3::<u32>::zeros((1, 3, 6));
        labels.slice_mut(s![0, 0, 0..5]).fill(1);
        labels.slice_mut(s![0, 2, 0..4]).fill(2);
        labels[[0, 2, 5]] = 4;
        let cleaned = remove_small_objects(labels, 5);
        assert_eq!(cleaned.iter().filter(|&&l| l == 1).count(), 5);
        assert_eq!(cleaned.iter().filter(|&&l| l == 2).count(), 0);
        assert_eq!(cleaned.iter().filter(|&&l| l == 4).count(), 0);
    }

    #[test]
    fn test_expand_labels_stops_at_neighbor() {
        let mut labels = Array3::<u32>::zeros((1, 1, 7));
        labels[[0, 0, 1]] = 1;
        labels[[0, 0, 5]] = 2;
        let expanded = expand_labels(&labels.view(), 1.0);
        assert_eq!(expanded.as_slice().unwrap(), &[1, 1, 1, 0, 2, 2, 2]);
        let expanded = expand_labels(&labels.view(), 10.0);
        // Voxel 3 is equidistant; every other voxel goes to its nearer region.
        let got = expanded.as_slice().unwrap();
        assert_eq!(&got[0..3], &[1, 1, 1]);
        assert_eq!(&got[4..7], &[2, 2, 2]);
        assert!(got[3] == 1 || got[3] == 2);
    }

    #[test]
    fn test_expand_labels_euclidean() {
        let mut labels = Array3::<u32>::zeros((3, 3, 3));
        labels[[1, 1, 1]] = 7;
        let expanded = expand_labels(&labels.view(), 1.0);
        // Only the 6 face neighbors are within distance 1.
        assert_eq!(expanded.iter().filter(|&&l| l == 7).count(), 7);
        let expanded = expand_labels(&labels.view(), 1.5);
        // Edge neighbors are sqrt(2) away; corners sqrt(3).
        assert_eq!(expanded.iter().filter(|&&l| l == 7).count(), 19);
        assert_eq!(expanded[[0, 0, 0]], 0);
    }

    #[test]
    fn test_expand_labels_all_background() {
        let labels = Array3::<u32>::zeros((2, 3, 4));
        assert_eq!(expand_labels(&labels.view(), 3.0), labels);
    }
}  // mod tests.

//! LBG (Linde-Buzo-Gray) codebook design and nearest-centroid quantization.
//!
//! ## Training
//!
//! 1. Start with one centroid at the mean of all training points.
//! 2. Split every centroid `c` into `c·(1+ε)` at index `2i` and `c·(1-ε)` at
//!    index `2i+1`.
//! 3. Assign each point to its nearest centroid, then repair empty cells by
//!    stealing points from the nearest cell that can spare one.
//! 4. Refine (k-means) until the total distortion changes by less than
//!    `min_distortion_delta`, or `max_refine_passes` is reached.
//! 5. Repeat from 2 until the codebook reaches the requested size.
//!
//! ## File format
//!
//! ```text
//! <size> <dimension>
//! c0 c1 ... c(k-1)      # one line per centroid
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use tracing::{debug, info};

use super::centroid::Centroid;
use super::point::{common_dimension, FeatureVector};
use crate::error::{Result, WordrecError};
use crate::persist;

/// Split perturbation ε.
pub const SPLIT: f64 = 0.01;

/// Refinement stops once a pass changes total distortion by less than this.
pub const MIN_DISTORTION: f64 = 0.1;

/// Codebook size used by the trainer when none is given.
pub const DEFAULT_CODEBOOK_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct LbgConfig {
    pub split_factor: f64,
    pub min_distortion_delta: f64,
    pub max_refine_passes: usize,
}

impl Default for LbgConfig {
    fn default() -> Self {
        Self {
            split_factor: SPLIT,
            min_distortion_delta: MIN_DISTORTION,
            max_refine_passes: 100,
        }
    }
}

/// Ordered set of centroids sharing one dimensionality.
#[derive(Debug, Clone, PartialEq)]
pub struct Codebook {
    centroids: Vec<Centroid>,
    dimension: usize,
}

impl Codebook {
    /// Train with the default LBG parameters.
    pub fn train(points: &[FeatureVector], size: usize) -> Result<Self> {
        Self::train_with(points, size, &LbgConfig::default())
    }

    pub fn train_with(points: &[FeatureVector], size: usize, config: &LbgConfig) -> Result<Self> {
        if size == 0 || !size.is_power_of_two() {
            return Err(WordrecError::Configuration(format!(
                "codebook size must be a power of two, got {size}"
            )));
        }
        if points.len() < size {
            return Err(WordrecError::InsufficientData {
                available: points.len(),
                required: size,
            });
        }
        let dimension = common_dimension(points)?;
        let mean = FeatureVector::mean(points.iter(), dimension).ok_or(
            WordrecError::InsufficientData {
                available: 0,
                required: size,
            },
        )?;

        let mut book = Codebook {
            centroids: vec![Centroid::new(mean)],
            dimension,
        };
        book.assign(points);

        while book.centroids.len() < size {
            book.split(config.split_factor);
            book.assign(points);
            book.repair(points);
            let passes = book.refine(points, config);
            debug!(
                centroids = book.centroids.len(),
                passes,
                distortion = book.total_distortion(),
                "codebook split refined"
            );
        }

        info!(
            size,
            dimension,
            points = points.len(),
            "codebook trained"
        );
        Ok(book)
    }

    /// Build a codebook from known codeword positions (no training cells).
    pub fn from_positions(positions: Vec<FeatureVector>) -> Result<Self> {
        let dimension = common_dimension(&positions)?;
        Ok(Codebook {
            centroids: positions.into_iter().map(Centroid::new).collect(),
            dimension,
        })
    }

    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn centroids(&self) -> &[Centroid] {
        &self.centroids
    }

    /// Sum of every cell's squared-distance distortion.
    pub fn total_distortion(&self) -> f64 {
        self.centroids.iter().map(Centroid::distortion).sum()
    }

    /// Index of the centroid nearest to `point`.
    pub fn nearest(&self, point: &FeatureVector) -> Result<usize> {
        self.check_dimension(point)?;
        Ok(self.nearest_unchecked(point).0)
    }

    /// Nearest-centroid index for every point, in order.
    pub fn quantize(&self, points: &[FeatureVector]) -> Result<Vec<usize>> {
        points.iter().map(|p| self.nearest(p)).collect()
    }

    /// Sum of Euclidean distances from each point to its nearest centroid.
    pub fn get_distortion(&self, points: &[FeatureVector]) -> Result<f64> {
        let mut total = 0.0;
        for point in points {
            self.check_dimension(point)?;
            total += self.nearest_unchecked(point).1.sqrt();
        }
        Ok(total)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        persist::write_atomic(path, |w| self.to_writer(w))?;
        debug!(path = %path.display(), size = self.len(), "codebook saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(WordrecError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }
        let reader = BufReader::new(File::open(path)?);
        Self::from_reader(reader, &path.display().to_string())
    }

    pub fn to_writer(&self, w: &mut dyn Write) -> Result<()> {
        writeln!(w, "{} {}", self.len(), self.dimension)?;
        for centroid in &self.centroids {
            let row: Vec<String> = centroid
                .position()
                .coords()
                .iter()
                .map(|c| c.to_string())
                .collect();
            writeln!(w, "{}", row.join(" "))?;
        }
        Ok(())
    }

    /// Parse the text format. `source_name` only labels parse errors.
    pub fn from_reader<R: BufRead>(reader: R, source_name: &str) -> Result<Self> {
        let mut lines = reader
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line))
            .filter(|(_, line)| !matches!(line, Ok(l) if l.trim().is_empty()));

        let (header_line, header) = match lines.next() {
            Some((n, line)) => (n, line?),
            None => return Err(WordrecError::parse(source_name, 1, "missing header")),
        };
        let header: Vec<&str> = header.split_whitespace().collect();
        let [size, dimension] = header.as_slice() else {
            return Err(WordrecError::parse(
                source_name,
                header_line,
                "header must be `<size> <dimension>`",
            ));
        };
        let size: usize = size
            .parse()
            .map_err(|_| WordrecError::parse(source_name, header_line, "invalid codebook size"))?;
        let dimension: usize = dimension
            .parse()
            .map_err(|_| WordrecError::parse(source_name, header_line, "invalid dimension"))?;
        if size == 0 || dimension == 0 {
            return Err(WordrecError::parse(
                source_name,
                header_line,
                "size and dimension must be positive",
            ));
        }

        let mut centroids = Vec::with_capacity(size);
        for _ in 0..size {
            let (n, line) = match lines.next() {
                Some((n, line)) => (n, line?),
                None => {
                    return Err(WordrecError::parse(
                        source_name,
                        header_line + centroids.len() + 1,
                        format!("expected {size} centroids, found {}", centroids.len()),
                    ))
                }
            };
            let coords = line
                .split_whitespace()
                .map(|tok| tok.parse::<f64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| WordrecError::parse(source_name, n, e.to_string()))?;
            if coords.len() != dimension {
                return Err(WordrecError::parse(
                    source_name,
                    n,
                    format!("expected {dimension} coordinates, found {}", coords.len()),
                ));
            }
            centroids.push(Centroid::new(FeatureVector::new(coords)));
        }

        Ok(Codebook {
            centroids,
            dimension,
        })
    }

    fn check_dimension(&self, point: &FeatureVector) -> Result<()> {
        if point.dimension() != self.dimension {
            return Err(WordrecError::DimensionMismatch {
                expected: self.dimension,
                actual: point.dimension(),
            });
        }
        Ok(())
    }

    /// Nearest index and its squared distance. Ties go to the lowest index.
    fn nearest_unchecked(&self, point: &FeatureVector) -> (usize, f64) {
        let mut best = (0, f64::INFINITY);
        for (i, centroid) in self.centroids.iter().enumerate() {
            let d = point.distance_squared(centroid.position());
            if d < best.1 {
                best = (i, d);
            }
        }
        best
    }

    fn split(&mut self, epsilon: f64) {
        let mut next = Vec::with_capacity(self.centroids.len() * 2);
        for centroid in &self.centroids {
            let position = centroid.position();
            next.push(Centroid::new(position.scaled(1.0 + epsilon)));
            next.push(Centroid::new(position.scaled(1.0 - epsilon)));
        }
        self.centroids = next;
    }

    fn assign(&mut self, points: &[FeatureVector]) {
        for centroid in &mut self.centroids {
            centroid.clear();
        }
        for (index, point) in points.iter().enumerate() {
            let (nearest, d) = self.nearest_unchecked(point);
            self.centroids[nearest].add(index, d);
        }
    }

    /// Give every empty cell one point from the nearest cell holding two or more.
    fn repair(&mut self, points: &[FeatureVector]) {
        while let Some(empty) = self.centroids.iter().position(|c| c.num_assigned() == 0) {
            let target = self.centroids[empty].position().clone();

            let donor = self
                .centroids
                .iter()
                .enumerate()
                .filter(|(_, c)| c.num_assigned() >= 2)
                .map(|(i, c)| (i, c.position().distance_squared(&target)))
                .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
                    Some((_, bd)) if bd <= d => best,
                    _ => Some((i, d)),
                });
            // Unreachable while points.len() >= centroids.len().
            let Some((donor, _)) = donor else { break };

            let moved = self.centroids[donor]
                .members()
                .iter()
                .copied()
                .map(|m| (m, points[m].distance_squared(&target)))
                .fold(None, |best: Option<(usize, f64)>, (m, d)| match best {
                    Some((_, bd)) if bd <= d => best,
                    _ => Some((m, d)),
                });
            let Some((moved, moved_d)) = moved else { break };

            let donor_d = points[moved].distance_squared(self.centroids[donor].position());
            self.centroids[donor].remove(moved, donor_d);
            self.centroids[empty].add(moved, moved_d);
        }
    }

    /// K-means passes; returns how many ran.
    fn refine(&mut self, points: &[FeatureVector], config: &LbgConfig) -> usize {
        let mut before = self.total_distortion();
        let mut passes = 0;
        while passes < config.max_refine_passes {
            passes += 1;
            for centroid in &mut self.centroids {
                centroid.recenter(points);
            }
            self.assign(points);
            self.repair(points);

            let after = self.total_distortion();
            if (before - after).abs() < config.min_distortion_delta {
                break;
            }
            before = after;
        }
        passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn pt(coords: &[f64]) -> FeatureVector {
        FeatureVector::new(coords.to_vec())
    }

    fn two_clusters() -> Vec<FeatureVector> {
        let mut points = Vec::new();
        for center in [1.0, 9.0] {
            points.push(pt(&[center - 0.1, center]));
            points.push(pt(&[center + 0.1, center]));
            points.push(pt(&[center, center - 0.1]));
            points.push(pt(&[center, center + 0.1]));
        }
        points
    }

    fn random_points(n: usize, dim: usize, seed: u64) -> Vec<FeatureVector> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| FeatureVector::new((0..dim).map(|_| rng.gen_range(-10.0..10.0)).collect()))
            .collect()
    }

    #[test]
    fn two_clusters_resolve_to_cluster_means() {
        let book = Codebook::train(&two_clusters(), 2).unwrap();
        assert_eq!(book.len(), 2);

        let mut positions: Vec<Vec<f64>> = book
            .centroids()
            .iter()
            .map(|c| c.position().coords().to_vec())
            .collect();
        positions.sort_by(|a, b| a[0].total_cmp(&b[0]));

        assert_abs_diff_eq!(positions[0][0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(positions[0][1], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(positions[1][0], 9.0, epsilon = 1e-9);
        assert_abs_diff_eq!(positions[1][1], 9.0, epsilon = 1e-9);
        assert!(book.centroids().iter().all(|c| c.num_assigned() == 4));
    }

    #[test]
    fn no_cell_is_empty_after_training() {
        let points = random_points(200, 3, 7);
        for size in [1, 2, 4, 8, 16, 32] {
            let book = Codebook::train(&points, size).unwrap();
            assert_eq!(book.len(), size);
            assert!(
                book.centroids().iter().all(|c| c.num_assigned() > 0),
                "empty cell at size {size}"
            );
            let assigned: usize = book.centroids().iter().map(Centroid::num_assigned).sum();
            assert_eq!(assigned, points.len());
        }
    }

    #[test]
    fn duplicate_points_still_fill_every_cell() {
        let points = vec![pt(&[2.0, 2.0]); 4];
        let book = Codebook::train(&points, 4).unwrap();
        assert!(book.centroids().iter().all(|c| c.num_assigned() == 1));
    }

    #[test]
    fn fewer_points_than_codewords_is_insufficient_data() {
        let err = Codebook::train(&random_points(3, 2, 1), 4).unwrap_err();
        assert!(matches!(
            err,
            WordrecError::InsufficientData {
                available: 3,
                required: 4
            }
        ));
    }

    #[test]
    fn non_power_of_two_size_is_rejected() {
        let err = Codebook::train(&random_points(10, 2, 1), 3).unwrap_err();
        assert!(matches!(err, WordrecError::Configuration(_)));
    }

    #[test]
    fn mixed_dimensions_are_rejected() {
        let points = vec![pt(&[1.0, 2.0]), pt(&[1.0, 2.0, 3.0])];
        assert!(matches!(
            Codebook::train(&points, 1),
            Err(WordrecError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn quantize_prefers_lowest_index_on_ties() {
        let book = Codebook::from_positions(vec![pt(&[0.0]), pt(&[2.0]), pt(&[4.0])]).unwrap();
        assert_eq!(
            book.quantize(&[pt(&[1.0]), pt(&[3.0]), pt(&[4.2])]).unwrap(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn distortion_sums_rooted_distances() {
        let book = Codebook::from_positions(vec![pt(&[0.0, 0.0])]).unwrap();
        let d = book.get_distortion(&[pt(&[3.0, 4.0]), pt(&[0.0, 1.0])]).unwrap();
        assert_abs_diff_eq!(d, 6.0, epsilon = 1e-12);
    }

    #[test]
    fn quantize_rejects_wrong_dimension() {
        let book = Codebook::from_positions(vec![pt(&[0.0, 0.0])]).unwrap();
        assert!(matches!(
            book.nearest(&pt(&[1.0])),
            Err(WordrecError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn save_load_round_trip() {
        let points = random_points(64, 4, 42);
        let book = Codebook::train(&points, 8).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yes.vq");
        book.save(&path).unwrap();
        let loaded = Codebook::load(&path).unwrap();

        assert_eq!(loaded.len(), 8);
        assert_eq!(loaded.dimension(), 4);
        for (a, b) in book.centroids().iter().zip(loaded.centroids()) {
            assert_eq!(a.position(), b.position());
            assert_eq!(b.num_assigned(), 0);
        }
        assert_eq!(book.quantize(&points).unwrap(), loaded.quantize(&points).unwrap());
    }

    #[test]
    fn load_missing_file_is_model_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Codebook::load(&dir.path().join("nope.vq")),
            Err(WordrecError::ModelNotFound { .. })
        ));
    }

    #[test]
    fn truncated_file_reports_line() {
        let text = "2 2\n1.0 2.0\n";
        let err = Codebook::from_reader(text.as_bytes(), "mem").unwrap_err();
        assert!(matches!(err, WordrecError::Parse { line: 3, .. }));

        let text = "1 2\n1.0 x\n";
        let err = Codebook::from_reader(text.as_bytes(), "mem").unwrap_err();
        assert!(matches!(err, WordrecError::Parse { line: 2, .. }));
    }
}

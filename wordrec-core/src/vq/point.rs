//! Points in k-dimensional feature space.

use crate::error::{Result, WordrecError};

/// An ordered tuple of k real coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    coords: Vec<f64>,
}

impl FeatureVector {
    pub fn new(coords: Vec<f64>) -> Self {
        Self { coords }
    }

    pub fn zeros(dimension: usize) -> Self {
        Self {
            coords: vec![0.0; dimension],
        }
    }

    pub fn dimension(&self) -> usize {
        self.coords.len()
    }

    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    pub fn into_coords(self) -> Vec<f64> {
        self.coords
    }

    /// Squared Euclidean distance. Extra coordinates on either side are ignored.
    pub fn distance_squared(&self, other: &FeatureVector) -> f64 {
        self.coords
            .iter()
            .zip(&other.coords)
            .map(|(a, b)| {
                let d = a - b;
                d * d
            })
            .sum()
    }

    pub fn distance(&self, other: &FeatureVector) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Every coordinate multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> FeatureVector {
        FeatureVector::new(self.coords.iter().map(|c| c * factor).collect())
    }

    /// Component-wise mean of `points`. `None` for an empty set.
    pub fn mean<'a, I>(points: I, dimension: usize) -> Option<FeatureVector>
    where
        I: IntoIterator<Item = &'a FeatureVector>,
    {
        let mut sum = vec![0.0; dimension];
        let mut count = 0usize;
        for point in points {
            for (acc, c) in sum.iter_mut().zip(point.coords()) {
                *acc += c;
            }
            count += 1;
        }
        if count == 0 {
            return None;
        }
        for acc in &mut sum {
            *acc /= count as f64;
        }
        Some(FeatureVector::new(sum))
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(coords: Vec<f64>) -> Self {
        Self::new(coords)
    }
}

/// Shared dimensionality of a point set, rejecting empty and ragged input.
pub(crate) fn common_dimension(points: &[FeatureVector]) -> Result<usize> {
    let first = points.first().ok_or(WordrecError::InsufficientData {
        available: 0,
        required: 1,
    })?;
    let dimension = first.dimension();
    if dimension == 0 {
        return Err(WordrecError::Configuration(
            "feature vectors must have at least one coordinate".into(),
        ));
    }
    if let Some(bad) = points.iter().find(|p| p.dimension() != dimension) {
        return Err(WordrecError::DimensionMismatch {
            expected: dimension,
            actual: bad.dimension(),
        });
    }
    Ok(dimension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn euclidean_distance() {
        let a = FeatureVector::new(vec![0.0, 0.0]);
        let b = FeatureVector::new(vec![3.0, 4.0]);
        assert_eq!(a.distance_squared(&b), 25.0);
        assert_eq!(a.distance(&b), 5.0);
    }

    #[test]
    fn mean_of_points() {
        let pts = [
            FeatureVector::new(vec![1.0, 2.0]),
            FeatureVector::new(vec![3.0, 6.0]),
        ];
        let mean = FeatureVector::mean(pts.iter(), 2).unwrap();
        assert_eq!(mean.coords(), &[2.0, 4.0]);
        assert!(FeatureVector::mean(std::iter::empty(), 2).is_none());
    }

    #[test]
    fn ragged_input_is_rejected() {
        let pts = vec![
            FeatureVector::new(vec![1.0, 2.0]),
            FeatureVector::new(vec![1.0]),
        ];
        assert!(matches!(
            common_dimension(&pts),
            Err(WordrecError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }
}

//! A codeword and the training cell currently assigned to it.

use super::point::FeatureVector;

/// Codeword position plus its cell statistics.
///
/// Members are indices into the training set the owning codebook was built
/// from. A centroid loaded from disk has an empty cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Centroid {
    position: FeatureVector,
    members: Vec<usize>,
    distortion: f64,
}

impl Centroid {
    pub fn new(position: FeatureVector) -> Self {
        Self {
            position,
            members: Vec::new(),
            distortion: 0.0,
        }
    }

    pub fn position(&self) -> &FeatureVector {
        &self.position
    }

    /// Indices of the training points in this cell.
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn num_assigned(&self) -> usize {
        self.members.len()
    }

    /// Sum of squared distances from the cell's points to the codeword.
    pub fn distortion(&self) -> f64 {
        self.distortion
    }

    pub(crate) fn add(&mut self, index: usize, distance_squared: f64) {
        self.members.push(index);
        self.distortion += distance_squared;
    }

    /// Remove a member. Returns `false` when it was not in the cell.
    pub(crate) fn remove(&mut self, index: usize, distance_squared: f64) -> bool {
        match self.members.iter().position(|&m| m == index) {
            Some(pos) => {
                self.members.swap_remove(pos);
                self.distortion = (self.distortion - distance_squared).max(0.0);
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.members.clear();
        self.distortion = 0.0;
    }

    /// Move the codeword to the mean of its cell. No-op on an empty cell.
    pub(crate) fn recenter(&mut self, points: &[FeatureVector]) {
        let dimension = self.position.dimension();
        if let Some(mean) =
            FeatureVector::mean(self.members.iter().map(|&i| &points[i]), dimension)
        {
            self.position = mean;
        }
    }
}

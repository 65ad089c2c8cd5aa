use serde::{Deserialize, Serialize};

/// Slack applied to radius comparisons so that identical vectors stay within
/// a zero radius despite rounding in the dot product.
pub const DISTANCE_TOLERANCE: f32 = 1e-6;

/// Distance metric shared by the neighbour index, the partitioner and the
/// duplicate resolver.
///
/// `Cosine` is `1 - cos(a, b)` and ranges over `[0, 2]`. `Euclidean` is the
/// plain L2 distance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Euclidean,
}

impl Metric {
    /// Distance between two raw vectors of equal length.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => {
                let norm_a = norm(a);
                let norm_b = norm(b);
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 1.0;
                }
                (1.0 - dot(a, b) / (norm_a * norm_b)).clamp(0.0, 2.0)
            }
            Metric::Euclidean => euclidean(a, b),
        }
    }

    /// Distance between vectors already passed through [`Metric::prepare`].
    pub(crate) fn prepared_distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => (1.0 - dot(a, b)).clamp(0.0, 2.0),
            Metric::Euclidean => euclidean(a, b),
        }
    }

    /// Bring a vector into the form the metric compares: unit length for
    /// cosine, untouched for euclidean.
    pub(crate) fn prepare(self, vector: &[f32]) -> Vec<f32> {
        match self {
            Metric::Cosine => normalize_embedding(vector),
            Metric::Euclidean => vector.to_vec(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
        }
    }
}

/// Normalize a vector to unit length.
///
/// Returns the original vector when the norm is zero.
pub fn normalize_embedding(vec: &[f32]) -> Vec<f32> {
    let norm = norm(vec);
    if norm == 0.0 {
        vec.to_vec()
    } else {
        vec.iter().map(|x| x / norm).collect()
    }
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(vec: &[f32]) -> f32 {
    vec.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

//! Trained cross-model transformation artifacts.
//!
//! A W-Matrix maps vectors from a source model's latent space into a target
//! model's. The training side supplies either a plain linear map or a small
//! MLP head; both are modeled as one tagged enum dispatched at apply time,
//! so the hot path has no virtual dispatch and match exhaustiveness is
//! checked at compile time.
//!
//! The forward pass is pure: identical weights and identical input always
//! produce bit-identical output. Randomness exists only at construction,
//! when a fresh head is Xavier-initialized.

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("input vector has dim {actual}, transformation expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("transformation has no layers")]
    EmptyTransformation,
}

/// Activation applied between MLP layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Relu,
    Tanh,
    Sigmoid,
    /// tanh approximation of GELU.
    Gelu,
}

impl Activation {
    pub fn apply(&self, x: f32) -> f32 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Gelu => {
                let c = (2.0 / std::f32::consts::PI).sqrt();
                0.5 * x * (1.0 + (c * (x + 0.044715 * x * x * x)).tanh())
            }
        }
    }
}

/// A dense affine map `y = W·x + b`, weights stored row-major `[out][in]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearMap {
    pub weights: Vec<Vec<f32>>,
    pub biases: Vec<f32>,
}

impl LinearMap {
    /// Freshly initialized map with Xavier/Glorot scaling: each weight drawn
    /// from `Uniform(-s, s)` with `s = sqrt(2 / (fan_in + fan_out))`.
    pub fn xavier(input_dim: usize, output_dim: usize) -> Self {
        let mut rng = rand::thread_rng();
        let scale = (2.0 / (input_dim + output_dim) as f32).sqrt();

        let weights = (0..output_dim)
            .map(|_| (0..input_dim).map(|_| rng.gen_range(-scale..scale)).collect())
            .collect();

        Self {
            weights,
            biases: vec![0.0; output_dim],
        }
    }

    /// Input width this map expects.
    pub fn input_dim(&self) -> usize {
        self.weights.first().map(|row| row.len()).unwrap_or(0)
    }

    /// Output width this map produces.
    pub fn output_dim(&self) -> usize {
        self.weights.len()
    }

    pub fn forward(&self, input: &[f32]) -> Result<Vec<f32>, ProjectionError> {
        let expected = self.input_dim();
        if input.len() != expected {
            return Err(ProjectionError::DimensionMismatch {
                expected,
                actual: input.len(),
            });
        }

        Ok(self
            .weights
            .iter()
            .zip(self.biases.iter())
            .map(|(row, b)| row.iter().zip(input.iter()).map(|(w, x)| w * x).sum::<f32>() + b)
            .collect())
    }
}

/// One MLP layer: affine map plus an optional activation.
/// The final layer of a head carries no activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlpLayer {
    pub linear: LinearMap,
    pub activation: Option<Activation>,
}

/// A stack of [`MlpLayer`]s smoothing a dimensional jump between models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlpHead {
    pub layers: Vec<MlpLayer>,
}

impl MlpHead {
    /// Build a freshly initialized head for the given dimensions.
    ///
    /// Small jumps (`|source − target| < 1000`) get a single hidden layer at
    /// the average width; larger jumps get two hidden layers at the midpoints
    /// between source/average and average/target.
    pub fn xavier(source_dim: usize, target_dim: usize, activation: Activation) -> Self {
        let widths = hidden_widths(source_dim, target_dim);

        let mut dims = Vec::with_capacity(widths.len() + 2);
        dims.push(source_dim);
        dims.extend(widths);
        dims.push(target_dim);

        let last = dims.len() - 2;
        let layers = dims
            .windows(2)
            .enumerate()
            .map(|(i, pair)| MlpLayer {
                linear: LinearMap::xavier(pair[0], pair[1]),
                activation: (i < last).then_some(activation),
            })
            .collect();

        Self { layers }
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map(|l| l.linear.input_dim()).unwrap_or(0)
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map(|l| l.linear.output_dim()).unwrap_or(0)
    }

    pub fn forward(&self, input: &[f32]) -> Result<Vec<f32>, ProjectionError> {
        if self.layers.is_empty() {
            return Err(ProjectionError::EmptyTransformation);
        }

        let mut current = input.to_vec();
        for layer in &self.layers {
            current = layer.linear.forward(&current)?;
            if let Some(activation) = layer.activation {
                for x in &mut current {
                    *x = activation.apply(*x);
                }
            }
        }
        Ok(current)
    }
}

fn hidden_widths(source_dim: usize, target_dim: usize) -> Vec<usize> {
    let average = (source_dim + target_dim) / 2;
    if source_dim.abs_diff(target_dim) < 1000 {
        vec![average]
    } else {
        vec![(source_dim + average) / 2, (average + target_dim) / 2]
    }
}

/// The trained transformation, dispatched at apply time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WMatrix {
    Linear(LinearMap),
    NonLinear(MlpHead),
}

impl WMatrix {
    pub fn input_dim(&self) -> usize {
        match self {
            WMatrix::Linear(map) => map.input_dim(),
            WMatrix::NonLinear(head) => head.input_dim(),
        }
    }

    pub fn output_dim(&self) -> usize {
        match self {
            WMatrix::Linear(map) => map.output_dim(),
            WMatrix::NonLinear(head) => head.output_dim(),
        }
    }

    pub fn forward(&self, input: &[f32]) -> Result<Vec<f32>, ProjectionError> {
        match self {
            WMatrix::Linear(map) => map.forward(input),
            WMatrix::NonLinear(head) => head.forward(input),
        }
    }
}

/// A transformation artifact as supplied by the training side: the map
/// itself plus its quality scores. Read-only input to this engine; the
/// scores are copied through, never recomputed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transformation {
    pub wmatrix: WMatrix,

    /// Quality score of the trained map (lower is better).
    pub final_epsilon: f64,

    /// How close the trained map is to an orthogonal transform.
    pub orthogonality_score: f64,
}

/// Confidence that a projected vector carries a real alignment signal:
/// `1 − normalized_entropy(|y| / Σ|y|)`. A near-uniform magnitude profile
/// scores near 0, a peaked one near 1.
pub fn alignment_confidence(output: &[f32]) -> f64 {
    if output.len() <= 1 {
        return 1.0;
    }

    let total: f64 = output.iter().map(|x| f64::from(x.abs())).sum();
    if total <= 0.0 {
        return 0.0;
    }

    let entropy: f64 = output
        .iter()
        .map(|x| f64::from(x.abs()) / total)
        .filter(|p| *p > 0.0)
        .map(|p| -p * p.ln())
        .sum();

    1.0 - entropy / (output.len() as f64).ln()
}

/// Relative norm drift between input and output: `| ‖x‖ − ‖y‖ | / ‖x‖`.
pub fn alignment_loss(input: &[f32], output: &[f32]) -> f64 {
    let norm_in: f64 = input.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    if norm_in <= 0.0 {
        return 0.0;
    }
    let norm_out: f64 = output
        .iter()
        .map(|x| f64::from(*x) * f64::from(*x))
        .sum::<f64>()
        .sqrt();

    (norm_in - norm_out).abs() / norm_in
}

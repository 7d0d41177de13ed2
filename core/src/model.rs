//! Parametric embedding model
//!
//! An encoder/decoder multilayer perceptron over nalgebra matrices: the
//! encoder maps representation vectors to low-dimensional coordinates, the
//! decoder maps them back. Forward passes cache activations so loss terms
//! composed on the embeddings can chain gradients through either half.
//! Parameters serialize to JSON artifacts addressed by round identifier and
//! model name; a frozen snapshot of the whole model serves as the
//! previous-round regularization anchor and is never touched by the
//! optimizer.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::path::{Path, PathBuf};

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Model persistence and shape errors
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Layer stack needs at least an input and an output width")]
    DegenerateLayerStack,

    #[error("Input has {0} dimensions but the layer expects {1}")]
    DimensionMismatch(usize, usize),

    #[error("Artifact I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact decode failure at {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One dense layer: `y = W x + b`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearLayer {
    pub weight: DMatrix<f64>,
    pub bias: DVector<f64>,
}

impl LinearLayer {
    fn he_initialized<R: Rng>(input: usize, output: usize, rng: &mut R) -> Self {
        let std_dev = (2.0 / input.max(1) as f64).sqrt();
        Self {
            weight: DMatrix::from_fn(output, input, |_, _| {
                let draw: f64 = StandardNormal.sample(rng);
                draw * std_dev
            }),
            bias: DVector::zeros(output),
        }
    }
}

/// Gradients for one dense layer, shaped like the layer itself.
#[derive(Debug, Clone)]
pub struct LayerGradient {
    pub weight: DMatrix<f64>,
    pub bias: DVector<f64>,
}

/// Activation cache of one MLP forward pass over a batch.
///
/// Column-major batches: one sample per column.
#[derive(Debug)]
pub struct ForwardCache {
    /// Input to each layer
    inputs: Vec<DMatrix<f64>>,
    /// Pre-activation output of each layer
    pre_activations: Vec<DMatrix<f64>>,
    /// Final output
    pub output: DMatrix<f64>,
}

/// Multilayer perceptron with ReLU hidden activations and a linear head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mlp {
    pub layers: Vec<LinearLayer>,
}

impl Mlp {
    pub fn new<R: Rng>(dims: &[usize], rng: &mut R) -> Result<Self, ModelError> {
        if dims.len() < 2 {
            return Err(ModelError::DegenerateLayerStack);
        }
        let layers = dims
            .windows(2)
            .map(|pair| LinearLayer::he_initialized(pair[0], pair[1], rng))
            .collect();
        Ok(Self { layers })
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, |l| l.weight.ncols())
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, |l| l.weight.nrows())
    }

    /// Forward pass with activation caching; `batch` is `input_dim x n`.
    pub fn forward(&self, batch: &DMatrix<f64>) -> Result<ForwardCache, ModelError> {
        if batch.nrows() != self.input_dim() {
            return Err(ModelError::DimensionMismatch(batch.nrows(), self.input_dim()));
        }
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut pre_activations = Vec::with_capacity(self.layers.len());
        let mut current = batch.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            inputs.push(current.clone());
            let mut pre = &layer.weight * &current;
            for mut column in pre.column_iter_mut() {
                column += &layer.bias;
            }
            pre_activations.push(pre.clone());
            if i + 1 < self.layers.len() {
                current = pre.map(|v| v.max(0.0));
            } else {
                current = pre;
            }
        }
        Ok(ForwardCache { inputs, pre_activations, output: current })
    }

    /// Inference-only forward pass.
    pub fn infer(&self, batch: &DMatrix<f64>) -> Result<DMatrix<f64>, ModelError> {
        Ok(self.forward(batch)?.output)
    }

    /// Backward pass: given the loss gradient at the output, return per-layer
    /// parameter gradients plus the gradient at the input.
    pub fn backward(&self, cache: &ForwardCache, grad_output: &DMatrix<f64>) -> (Vec<LayerGradient>, DMatrix<f64>) {
        let mut gradients: Vec<LayerGradient> = Vec::with_capacity(self.layers.len());
        let mut upstream = grad_output.clone();
        for (i, layer) in self.layers.iter().enumerate().rev() {
            // linear head has no activation; hidden layers gate by ReLU
            if i + 1 < self.layers.len() {
                let pre = &cache.pre_activations[i];
                upstream.zip_apply(pre, |g, p| {
                    if p <= 0.0 {
                        *g = 0.0;
                    }
                });
            }
            let grad_weight = &upstream * cache.inputs[i].transpose();
            let grad_bias = upstream.column_sum();
            gradients.push(LayerGradient { weight: grad_weight, bias: grad_bias });
            upstream = layer.weight.transpose() * &upstream;
        }
        gradients.reverse();
        (gradients, upstream)
    }

    /// Zero-shaped gradients for accumulation.
    pub fn zero_gradients(&self) -> Vec<LayerGradient> {
        self.layers
            .iter()
            .map(|l| LayerGradient {
                weight: DMatrix::zeros(l.weight.nrows(), l.weight.ncols()),
                bias: DVector::zeros(l.bias.nrows()),
            })
            .collect()
    }
}

/// Gradients for both halves of the embedding model.
#[derive(Debug)]
pub struct ModelGradients {
    pub encoder: Vec<LayerGradient>,
    pub decoder: Vec<LayerGradient>,
}

impl ModelGradients {
    pub fn zeros(model: &EmbeddingModel) -> Self {
        Self {
            encoder: model.encoder.zero_gradients(),
            decoder: model.decoder.zero_gradients(),
        }
    }

    pub fn accumulate_encoder(&mut self, gradients: &[LayerGradient]) {
        accumulate(&mut self.encoder, gradients);
    }

    pub fn accumulate_decoder(&mut self, gradients: &[LayerGradient]) {
        accumulate(&mut self.decoder, gradients);
    }
}

fn accumulate(target: &mut [LayerGradient], source: &[LayerGradient]) {
    for (t, s) in target.iter_mut().zip(source) {
        t.weight += &s.weight;
        t.bias += &s.bias;
    }
}

/// Encoder/decoder pair mapping representations to low-D coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub encoder: Mlp,
    pub decoder: Mlp,
}

impl EmbeddingModel {
    pub fn new<R: Rng>(
        encoder_dims: &[usize],
        decoder_dims: &[usize],
        rng: &mut R,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            encoder: Mlp::new(encoder_dims, rng)?,
            decoder: Mlp::new(decoder_dims, rng)?,
        })
    }

    /// Project representation rows (samples x dim) to coordinates (samples x latent).
    pub fn encode(&self, data: &DMatrix<f64>) -> Result<DMatrix<f64>, ModelError> {
        Ok(self.encoder.infer(&data.transpose())?.transpose())
    }

    /// Reconstruct representation rows from coordinate rows.
    pub fn decode(&self, coordinates: &DMatrix<f64>) -> Result<DMatrix<f64>, ModelError> {
        Ok(self.decoder.infer(&coordinates.transpose())?.transpose())
    }

    /// Frozen clone used as the previous-round regularization anchor.
    pub fn snapshot(&self) -> EmbeddingModel {
        self.clone()
    }

    /// Persist parameters under `dir/{name}.json`, creating `dir` if needed.
    pub fn save(&self, dir: &Path, name: &str) -> Result<PathBuf, ModelError> {
        std::fs::create_dir_all(dir).map_err(|source| ModelError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(format!("{name}.json"));
        let payload = serde_json::to_string(self).map_err(|source| ModelError::Decode {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, payload).map_err(|source| ModelError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Load parameters from a persisted artifact.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let payload = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&payload).map_err(|source| ModelError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }
}

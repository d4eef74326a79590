use crate::error::InferenceError;
use serde::Deserialize;
use std::fmt;

/// Opaque numeric model: fixed-length input, one or more outputs, all in scaled space.
pub trait Predictor: Send + Sync + fmt::Debug {
    fn input_len(&self) -> usize;

    fn output_len(&self) -> usize;

    fn predict(&self, input: &[f64]) -> Result<Vec<f64>, InferenceError>;
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Linear => x,
            Activation::Relu => x.max(0.0),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DenseLayer {
    /// One row per output unit.
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    #[serde(default)]
    pub activation: Activation,
}

/// Feed-forward network exported as JSON weights.
#[derive(Debug, Clone, Deserialize)]
pub struct DenseModel {
    pub input_len: usize,
    pub layers: Vec<DenseLayer>,
}

impl DenseModel {
    pub fn validate(&self) -> Result<(), String> {
        if self.input_len == 0 {
            return Err("input_len must be positive".into());
        }
        if self.layers.is_empty() {
            return Err("model has no layers".into());
        }
        let mut width = self.input_len;
        for (idx, layer) in self.layers.iter().enumerate() {
            if layer.weights.is_empty() {
                return Err(format!("layer {idx} has no units"));
            }
            if layer.weights.len() != layer.bias.len() {
                return Err(format!(
                    "layer {idx} has {} weight rows but {} biases",
                    layer.weights.len(),
                    layer.bias.len()
                ));
            }
            if let Some(row) = layer.weights.iter().position(|row| row.len() != width) {
                return Err(format!("layer {idx} row {row} does not have {width} inputs"));
            }
            let finite = layer
                .weights
                .iter()
                .flatten()
                .chain(layer.bias.iter())
                .all(|v| v.is_finite());
            if !finite {
                return Err(format!("layer {idx} carries non-finite parameters"));
            }
            width = layer.weights.len();
        }
        Ok(())
    }
}

impl Predictor for DenseModel {
    fn input_len(&self) -> usize {
        self.input_len
    }

    fn output_len(&self) -> usize {
        self.layers.last().map_or(0, |layer| layer.weights.len())
    }

    fn predict(&self, input: &[f64]) -> Result<Vec<f64>, InferenceError> {
        if input.len() != self.input_len {
            return Err(InferenceError::Shape {
                expected: self.input_len,
                got: input.len(),
            });
        }
        let mut activations = input.to_vec();
        for (idx, layer) in self.layers.iter().enumerate() {
            if let Some(row) = layer.weights.first() {
                if row.len() != activations.len() {
                    return Err(InferenceError::LayerShape {
                        layer: idx,
                        expected: row.len(),
                        got: activations.len(),
                    });
                }
            }
            activations = layer
                .weights
                .iter()
                .zip(&layer.bias)
                .map(|(row, bias)| {
                    let sum: f64 = row.iter().zip(&activations).map(|(w, x)| w * x).sum();
                    layer.activation.apply(sum + bias)
                })
                .collect();
        }
        Ok(activations)
    }
}

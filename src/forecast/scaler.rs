use crate::error::InferenceError;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// Univariate forward/inverse scaling applied around the predictor.
pub trait Scaler: Send + Sync + fmt::Debug {
    /// Column labels the scaler was fitted with, when it recorded any.
    fn feature_names(&self) -> Option<&[String]>;

    fn transform(&self, values: &[f64]) -> Result<Vec<f64>, InferenceError>;

    fn inverse_transform(&self, values: &[f64]) -> Result<Vec<f64>, InferenceError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScalerArtifact {
    MinMax(MinMaxScaler),
    Standard(StandardScaler),
}

impl ScalerArtifact {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ScalerArtifact::MinMax(scaler) => scaler.validate(),
            ScalerArtifact::Standard(scaler) => scaler.validate(),
        }
    }

    pub fn into_scaler(self) -> Arc<dyn Scaler> {
        match self {
            ScalerArtifact::MinMax(scaler) => Arc::new(scaler),
            ScalerArtifact::Standard(scaler) => Arc::new(scaler),
        }
    }
}

fn default_feature_range() -> [f64; 2] {
    [0.0, 1.0]
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinMaxScaler {
    pub data_min: f64,
    pub data_max: f64,
    #[serde(default = "default_feature_range")]
    pub feature_range: [f64; 2],
    #[serde(default)]
    pub feature_names: Option<Vec<String>>,
}

impl MinMaxScaler {
    fn validate(&self) -> Result<(), String> {
        let [lo, hi] = self.feature_range;
        if ![self.data_min, self.data_max, lo, hi].iter().all(|v| v.is_finite()) {
            return Err("min_max scaler parameters must be finite".into());
        }
        if self.data_max < self.data_min {
            return Err("data_max is below data_min".into());
        }
        if hi <= lo {
            return Err("feature_range must be increasing".into());
        }
        Ok(())
    }

    fn scale(&self) -> f64 {
        let [lo, hi] = self.feature_range;
        let span = self.data_max - self.data_min;
        // constant training data: keep values unscaled rather than divide by zero
        let span = if span == 0.0 { 1.0 } else { span };
        (hi - lo) / span
    }

    fn offset(&self) -> f64 {
        self.feature_range[0] - self.data_min * self.scale()
    }
}

impl Scaler for MinMaxScaler {
    fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    fn transform(&self, values: &[f64]) -> Result<Vec<f64>, InferenceError> {
        let (scale, offset) = (self.scale(), self.offset());
        map_finite(values, |v| v * scale + offset)
    }

    fn inverse_transform(&self, values: &[f64]) -> Result<Vec<f64>, InferenceError> {
        let (scale, offset) = (self.scale(), self.offset());
        map_finite(values, |v| (v - offset) / scale)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StandardScaler {
    pub mean: f64,
    pub scale: f64,
    #[serde(default)]
    pub feature_names: Option<Vec<String>>,
}

impl StandardScaler {
    fn validate(&self) -> Result<(), String> {
        if !self.mean.is_finite() || !self.scale.is_finite() || self.scale < 0.0 {
            return Err("standard scaler needs finite mean and non-negative scale".into());
        }
        Ok(())
    }

    fn effective_scale(&self) -> f64 {
        if self.scale == 0.0 {
            1.0
        } else {
            self.scale
        }
    }
}

impl Scaler for StandardScaler {
    fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    fn transform(&self, values: &[f64]) -> Result<Vec<f64>, InferenceError> {
        let scale = self.effective_scale();
        map_finite(values, |v| (v - self.mean) / scale)
    }

    fn inverse_transform(&self, values: &[f64]) -> Result<Vec<f64>, InferenceError> {
        let scale = self.effective_scale();
        map_finite(values, |v| v * scale + self.mean)
    }
}

fn map_finite(values: &[f64], f: impl Fn(f64) -> f64) -> Result<Vec<f64>, InferenceError> {
    values
        .iter()
        .map(|value| {
            let out = f(*value);
            if out.is_finite() {
                Ok(out)
            } else {
                Err(InferenceError::Scale(format!("{value} scales to a non-finite value")))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_max_round_trips_through_inverse() {
        let scaler = MinMaxScaler {
            data_min: 10.0,
            data_max: 30.0,
            feature_range: [0.0, 1.0],
            feature_names: None,
        };
        let scaled = scaler.transform(&[10.0, 20.0, 30.0]).unwrap();
        for (got, want) in scaled.iter().zip([0.0, 0.5, 1.0]) {
            assert!((got - want).abs() < 1e-9);
        }
        let restored = scaler.inverse_transform(&[0.25]).unwrap();
        assert!((restored[0] - 15.0).abs() < 1e-9);
    }

    #[test]
    fn standard_scaler_treats_zero_scale_as_identity_spread() {
        let scaler = StandardScaler {
            mean: 5.0,
            scale: 0.0,
            feature_names: Some(vec!["value".into()]),
        };
        assert_eq!(scaler.transform(&[7.0]).unwrap(), vec![2.0]);
        assert_eq!(scaler.feature_names().map(<[String]>::len), Some(1));
    }

    #[test]
    fn artifact_parses_tagged_kinds() {
        let mut raw = br#"{"kind":"min_max","data_min":0.0,"data_max":4.0}"#.to_vec();
        let artifact: ScalerArtifact = simd_json::serde::from_slice(&mut raw).unwrap();
        assert!(artifact.validate().is_ok());
        let scaler = artifact.into_scaler();
        assert_eq!(scaler.transform(&[2.0]).unwrap(), vec![0.5]);

        let bad = ScalerArtifact::MinMax(MinMaxScaler {
            data_min: 1.0,
            data_max: 0.0,
            feature_range: [0.0, 1.0],
            feature_names: None,
        });
        assert!(bad.validate().is_err());
    }

    #[test]
    fn transform_rejects_non_finite_input() {
        let scaler = StandardScaler {
            mean: 0.0,
            scale: 1.0,
            feature_names: None,
        };
        assert!(matches!(
            scaler.transform(&[f64::NAN]),
            Err(InferenceError::Scale(_))
        ));
    }
}

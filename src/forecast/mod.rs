mod model;
mod scaler;

pub use model::{Activation, DenseLayer, DenseModel, Predictor};
pub use scaler::{MinMaxScaler, Scaler, ScalerArtifact, StandardScaler};

use crate::accumulator::Window;
use crate::error::{ArtifactError, InferenceError};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ForecastValue {
    Scalar(f64),
    Sequence(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub value: ForecastValue,
    pub computed_at: DateTime<Utc>,
}

impl Forecast {
    pub fn now(value: ForecastValue) -> Self {
        Self {
            value,
            computed_at: Utc::now(),
        }
    }
}

/// Scale → predict → inverse-scale around an opaque model.
#[derive(Clone, Debug)]
pub struct ForecastInvoker {
    scaler: Arc<dyn Scaler>,
    predictor: Arc<dyn Predictor>,
    steps: usize,
    timeout: Duration,
}

impl ForecastInvoker {
    pub fn new(
        scaler: Arc<dyn Scaler>,
        predictor: Arc<dyn Predictor>,
        steps: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            scaler,
            predictor,
            steps: steps.max(1),
            timeout,
        }
    }

    /// Loads JSON model and scaler artifacts and checks the model takes `window_size` inputs.
    pub fn load(
        model_path: &Path,
        scaler_path: &Path,
        window_size: usize,
        steps: usize,
        timeout: Duration,
    ) -> Result<Self, ArtifactError> {
        let model: DenseModel = read_artifact(model_path)?;
        model.validate().map_err(|message| ArtifactError::Invalid {
            path: model_path.to_path_buf(),
            message,
        })?;
        if model.input_len != window_size {
            return Err(ArtifactError::Invalid {
                path: model_path.to_path_buf(),
                message: format!(
                    "model takes {} inputs but windows hold {window_size}",
                    model.input_len
                ),
            });
        }

        let scaler: ScalerArtifact = read_artifact(scaler_path)?;
        scaler.validate().map_err(|message| ArtifactError::Invalid {
            path: scaler_path.to_path_buf(),
            message,
        })?;

        tracing::info!(
            model = %model_path.display(),
            scaler = %scaler_path.display(),
            input_len = model.input_len,
            outputs = model.output_len(),
            steps,
            "forecast model loaded"
        );
        Ok(Self::new(scaler.into_scaler(), Arc::new(model), steps, timeout))
    }

    /// Runs the model on the blocking pool, bounded by the configured timeout.
    ///
    /// A timed-out computation keeps its blocking thread until it returns; only the
    /// result is abandoned.
    pub async fn invoke(&self, window: Window) -> Result<ForecastValue, InferenceError> {
        let scaler = self.scaler.clone();
        let predictor = self.predictor.clone();
        let steps = self.steps;
        let channel = window.channel().to_string();
        let values = window.values().to_vec();

        let task = tokio::task::spawn_blocking(move || {
            run_forecast(scaler.as_ref(), predictor.as_ref(), window.values(), steps)
        });

        let result = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => Err(InferenceError::Task(err.to_string())),
            Err(_) => Err(InferenceError::Timeout(self.timeout)),
        };
        if let Err(err) = &result {
            tracing::warn!(
                channel = %channel,
                window = ?values,
                error = %err,
                "forecast computation failed"
            );
        }
        result
    }
}

/// Single-output models are applied recursively `steps` times, each prediction
/// replacing the oldest value of a sliding copy of the window. Multi-output models
/// are applied once and their outputs form the sequence.
pub fn run_forecast(
    scaler: &dyn Scaler,
    predictor: &dyn Predictor,
    values: &[f64],
    steps: usize,
) -> Result<ForecastValue, InferenceError> {
    if let Some(names) = scaler.feature_names() {
        if names.len() != 1 {
            return Err(InferenceError::FeatureMismatch {
                expected: names.len(),
            });
        }
    }
    if values.len() != predictor.input_len() {
        return Err(InferenceError::Shape {
            expected: predictor.input_len(),
            got: values.len(),
        });
    }

    let scaled = scaler.transform(values)?;
    let steps = steps.max(1);
    let raw = if predictor.output_len() == 1 {
        let mut context = scaled;
        let mut outputs = Vec::with_capacity(steps);
        for _ in 0..steps {
            let next = predictor
                .predict(&context)?
                .first()
                .copied()
                .ok_or(InferenceError::EmptyOutput)?;
            if !next.is_finite() {
                return Err(InferenceError::NonFinite);
            }
            outputs.push(next);
            context.rotate_left(1);
            if let Some(last) = context.last_mut() {
                *last = next;
            }
        }
        outputs
    } else {
        predictor.predict(&scaled)?
    };
    if raw.is_empty() {
        return Err(InferenceError::EmptyOutput);
    }
    if raw.iter().any(|value| !value.is_finite()) {
        return Err(InferenceError::NonFinite);
    }

    let mut restored = scaler.inverse_transform(&raw)?;
    if restored.len() == 1 && steps == 1 {
        return Ok(ForecastValue::Scalar(restored.remove(0)));
    }
    Ok(ForecastValue::Sequence(restored))
}

fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let mut bytes = std::fs::read(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    simd_json::serde::from_slice(&mut bytes).map_err(|err| ArtifactError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Averages its input; optionally fails or stalls on demand.
    #[derive(Debug, Default)]
    pub struct MeanPredictor {
        pub input_len: usize,
        pub fail: AtomicBool,
        pub stall: Option<Duration>,
        pub calls: AtomicUsize,
    }

    impl MeanPredictor {
        pub fn new(input_len: usize) -> Self {
            Self {
                input_len,
                ..Default::default()
            }
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Predictor for MeanPredictor {
        fn input_len(&self) -> usize {
            self.input_len
        }

        fn output_len(&self) -> usize {
            1
        }

        fn predict(&self, input: &[f64]) -> Result<Vec<f64>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(stall) = self.stall {
                std::thread::sleep(stall);
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(InferenceError::EmptyOutput);
            }
            Ok(vec![input.iter().sum::<f64>() / input.len() as f64])
        }
    }

    pub fn identity_scaler() -> Arc<dyn Scaler> {
        Arc::new(StandardScaler {
            mean: 0.0,
            scale: 1.0,
            feature_names: None,
        })
    }

    pub fn invoker(predictor: Arc<MeanPredictor>, steps: usize) -> ForecastInvoker {
        ForecastInvoker::new(identity_scaler(), predictor, steps, Duration::from_secs(5))
    }
}

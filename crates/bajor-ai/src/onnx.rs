//! ONNX Runtime backend for exported Zoobot-style classifiers.
//!
//! The model file takes one NCHW `f32` input and returns one
//! `(batch, n_answers)` tensor of concentrations.

use std::path::Path;
use std::sync::Mutex;

use ndarray::{Array2, ArrayView4};
use ort::session::Session;
use ort::value::Tensor;
use tracing::info;

use crate::model::{ConcentrationModel, ModelError, RuntimeConfig};

pub struct OnnxModel {
    /// `Session::run` takes `&mut self`; the lock serialises forward passes.
    session: Mutex<Session>,
}

impl OnnxModel {
    /// Load `model.onnx` from `model_dir`, or the file itself if `model_dir` is one.
    pub fn load(model_dir: &Path, runtime: &RuntimeConfig) -> Result<Self, ModelError> {
        runtime.validate()?;
        let model_path = if model_dir.is_dir() {
            model_dir.join("model.onnx")
        } else {
            model_dir.to_path_buf()
        };
        let load_err = |reason: String| ModelError::Load {
            path: model_path.display().to_string(),
            reason,
        };
        if !model_path.exists() {
            return Err(load_err("file not found".into()));
        }

        let builder = Session::builder().map_err(|e| load_err(e.to_string()))?;
        let builder = match runtime.intra_threads {
            Some(n) => builder
                .with_intra_threads(n)
                .map_err(|e| load_err(e.to_string()))?,
            None => builder,
        };
        let session = builder
            .commit_from_file(&model_path)
            .map_err(|e| load_err(e.to_string()))?;

        info!(model = %model_path.display(), accelerator = %runtime.accelerator, "loaded model");
        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl ConcentrationModel for OnnxModel {
    fn forward(&self, images: ArrayView4<'_, f32>) -> Result<Array2<f32>, ModelError> {
        let (n, c, h, w) = images.dim();
        let shape = vec![n as i64, c as i64, h as i64, w as i64];
        let data: Vec<f32> = images.iter().copied().collect();
        let input = Tensor::from_array((shape, data.into_boxed_slice()))
            .map_err(|e| ModelError::Inference(format!("input tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| ModelError::Inference(format!("session lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (out_shape, out_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("output extraction: {e}")))?;
        let dims: Vec<usize> = out_shape.iter().map(|&d| d.max(0) as usize).collect();
        if dims.len() != 2 || dims[0] != n {
            return Err(ModelError::OutputShape {
                batch: n,
                found: dims,
            });
        }

        Array2::from_shape_vec((dims[0], dims[1]), out_data.to_vec()).map_err(|_| {
            ModelError::OutputShape {
                batch: n,
                found: dims.clone(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_file() {
        let dir = std::env::temp_dir().join("bajor-no-such-model");
        let err = OnnxModel::load(&dir.join("model.onnx"), &RuntimeConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, ModelError::Load { .. }));
    }

    #[test]
    fn accelerator_checked_before_loading() {
        let runtime = RuntimeConfig {
            accelerator: "cuda".into(),
            intra_threads: None,
        };
        assert!(matches!(
            OnnxModel::load(Path::new("model.onnx"), &runtime),
            Err(ModelError::UnsupportedAccelerator(_))
        ));
    }
}

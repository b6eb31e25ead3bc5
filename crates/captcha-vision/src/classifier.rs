//! Multi-head digit classification via ONNX Runtime.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;

use crate::preprocess::prepare_input;
use crate::types::{CaptchaError, CaptchaResult, HeadPrediction, CHARACTERS};

/// Default model filename, looked up next to the working directory.
pub const MODEL_FILENAME: &str = "model.onnx";

/// Anything that can turn a CAPTCHA screenshot into its digit string.
///
/// The runtime only talks to this trait so the login flow can be driven by
/// deterministic stubs.
pub trait CaptchaSolver: Send + Sync {
    /// Recognise the code shown in `image`.
    fn solve(&self, image: &[u8]) -> CaptchaResult<String>;
}

/// Digit classifier backed by a multi-output ONNX model.
///
/// The ONNX session is not reentrant, so it sits behind a mutex and the
/// classifier itself can be shared across requests.
pub struct CaptchaClassifier {
    session: Option<Mutex<Session>>,
    model_path: PathBuf,
}

impl CaptchaClassifier {
    /// Load the classifier.
    ///
    /// If `model_path` is `None`, looks for [`MODEL_FILENAME`] in the current
    /// directory. A missing file leaves the classifier unloaded; callers
    /// check [`has_model`](Self::has_model) before serving.
    pub fn new(model_path: Option<&Path>) -> CaptchaResult<Self> {
        let path = model_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(MODEL_FILENAME));

        if !path.exists() {
            tracing::warn!("CAPTCHA model not found at {}", path.display());
            return Ok(Self {
                session: None,
                model_path: path,
            });
        }

        tracing::info!("Loading CAPTCHA model from {}", path.display());

        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(&path))
            .map_err(|e| CaptchaError::ModelNotAvailable(format!("Failed to load ONNX model: {e}")))?;

        tracing::info!("CAPTCHA model loaded");
        Ok(Self {
            session: Some(Mutex::new(session)),
            model_path: path,
        })
    }

    /// Check if the classifier has a loaded model.
    pub fn has_model(&self) -> bool {
        self.session.is_some()
    }

    /// Where the model was (or would have been) loaded from.
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Classify a CAPTCHA image.
    ///
    /// Input is decoded and normalised before the model is consulted, so
    /// undecodable bytes fail with [`CaptchaError::Decode`] whether or not a
    /// model is loaded.
    pub fn classify(&self, image_bytes: &[u8]) -> CaptchaResult<String> {
        let input = prepare_input(image_bytes)?;

        let session = self.session.as_ref().ok_or_else(|| {
            CaptchaError::ModelNotAvailable(self.model_path.display().to_string())
        })?;
        let mut session = session
            .lock()
            .map_err(|_| CaptchaError::Inference("model session lock poisoned".to_string()))?;

        let input_tensor = Tensor::from_array(input)
            .map_err(|e| CaptchaError::Inference(format!("Failed to create input tensor: {e}")))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| CaptchaError::Inference(format!("ONNX inference failed: {e}")))?;

        let mut heads = Vec::new();
        for (name, value) in outputs.iter() {
            let (_shape, data) = value.try_extract_tensor::<f32>().map_err(|e| {
                CaptchaError::Inference(format!("Failed to extract head {name}: {e}"))
            })?;
            let class = argmax(data).ok_or_else(|| {
                CaptchaError::Inference(format!("Head {name} produced an empty tensor"))
            })?;
            heads.push(HeadPrediction {
                name: name.to_string(),
                class,
            });
        }

        let code = decode_heads(heads)?;
        tracing::debug!(len = code.len(), "CAPTCHA classified");
        Ok(code)
    }
}

impl CaptchaSolver for CaptchaClassifier {
    fn solve(&self, image: &[u8]) -> CaptchaResult<String> {
        self.classify(image)
    }
}

/// Index of the largest score; first wins on ties.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &s) in scores.iter().enumerate() {
        match best {
            Some((_, b)) if s <= b => {}
            _ => best = Some((i, s)),
        }
    }
    best.map(|(i, _)| i)
}

/// Concatenate head predictions in output-name order.
///
/// The model reports its digit heads in arbitrary order; sorting by name is
/// what maps head `k` to digit position `k`.
pub fn decode_heads(mut heads: Vec<HeadPrediction>) -> CaptchaResult<String> {
    heads.sort_by(|a, b| a.name.cmp(&b.name));
    heads
        .iter()
        .map(|h| {
            CHARACTERS.chars().nth(h.class).ok_or_else(|| {
                CaptchaError::Inference(format!("Head {} predicted class {}", h.name, h.class))
            })
        })
        .collect()
}

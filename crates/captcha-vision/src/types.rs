//! Core types shared by the preprocessing and classification stages.

/// Characters a single classification head can emit, indexed by class id.
pub const CHARACTERS: &str = "0123456789";

/// Width of the canvas the model was trained on.
pub const IMG_WIDTH: u32 = 124;

/// Height of the canvas the model was trained on.
pub const IMG_HEIGHT: u32 = 24;

/// Output of one classification head before the heads are ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadPrediction {
    /// Output tensor name as reported by the model.
    pub name: String,
    /// Arg-max class index.
    pub class: usize,
}

/// Errors that can occur while recognising a CAPTCHA.
#[derive(thiserror::Error, Debug)]
pub enum CaptchaError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Model not available: {0}")]
    ModelNotAvailable(String),
}

impl From<image::ImageError> for CaptchaError {
    fn from(e: image::ImageError) -> Self {
        CaptchaError::Decode(e.to_string())
    }
}

/// Convenience result type.
pub type CaptchaResult<T> = Result<T, CaptchaError>;

//! Digit classification for portal login CAPTCHAs: image decoding,
//! OpenCV-compatible normalisation and a multi-head ONNX model.

pub mod capture;
pub mod classifier;
pub mod preprocess;
pub mod types;

pub use capture::decode_bytes;
pub use classifier::{CaptchaClassifier, CaptchaSolver, MODEL_FILENAME};
pub use preprocess::prepare_input;
pub use types::*;

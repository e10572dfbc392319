//! On-device image recognition: bundled ONNX classifier, image
//! preprocessing, inference and top-k ranking behind one async service.

pub mod config;
pub mod error;
pub mod inference;
pub mod labels;
pub mod model;
pub mod models;
pub mod onnx;
pub mod pool;
pub mod preprocess;
pub mod ranking;
pub mod service;

pub use crate::config::{InputSpec, Normalization, RecognizerConfig, TensorLayout, DEFAULT_TOP_K};
pub use crate::error::{InferError, InitError, PrepError, RecognitionError, Result};
pub use crate::labels::LabelTable;
pub use crate::model::{InferenceBackend, ModelHandle};
pub use crate::models::{CameraFrame, ModelInfo, RecognitionResult};
pub use crate::preprocess::{ImagePreprocessor, ImageSource, ImageTensor};
pub use crate::service::{
    AssetLoader, FileResolver, ModelLoader, RecognitionService, Recognizer, ReferenceResolver,
};

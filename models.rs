use serde::{Deserialize, Serialize};

/// One ranked class for a recognized image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub label: String,
    pub confidence: f32,
}

/// Raw RGBA8 pixels straight from a camera preview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub backend: String,
    pub input: [usize; 3],
    pub classes: usize,
    pub top_k: usize,
}

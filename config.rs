use crate::onnx::OrtRuntimeConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_TOP_K: usize = 5;

const CONFIG_ENV: &str = "TAURI_VISION_CONFIG";
const MODEL_DIR_ENV: &str = "TAURI_VISION_MODEL_DIR";
const TOP_K_ENV: &str = "TAURI_VISION_TOP_K";

#[cfg(target_os = "android")]
const MODEL_ASSET: &str = "mobilenet_v2.onnx";
#[cfg(not(target_os = "android"))]
const MODEL_ASSET: &str = "assets/model/mobilenet_v2.onnx";

#[cfg(target_os = "android")]
const LABELS_ASSET: &str = "labels.txt";
#[cfg(not(target_os = "android"))]
const LABELS_ASSET: &str = "assets/model/labels.txt";

/// Memory layout of the model input, fixed by the exported graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    Nchw,
    Nhwc,
}

/// Preprocessing constants a model family was trained with.
///
/// Each variant maps to fixed per-channel mean/std values; the bundled
/// classifier decides which one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// torchvision ImageNet statistics.
    Imagenet,
    /// Plain `pixel / 255` into `[0, 1]`.
    Unit,
    /// TensorFlow style `[-1, 1]`.
    Symmetric,
}

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
const IMAGENET_GRAY_MEAN: f32 = 0.449;
const IMAGENET_GRAY_STD: f32 = 0.226;

impl Normalization {
    /// Per-channel `(mean, std)` for a model with `channels` input channels.
    pub fn constants(self, channels: usize) -> Option<(Vec<f32>, Vec<f32>)> {
        match (self, channels) {
            (Self::Imagenet, 3) => Some((IMAGENET_MEAN.to_vec(), IMAGENET_STD.to_vec())),
            (Self::Imagenet, 1) => Some((vec![IMAGENET_GRAY_MEAN], vec![IMAGENET_GRAY_STD])),
            (Self::Unit, 1 | 3) => Some((vec![0.0; channels], vec![1.0; channels])),
            (Self::Symmetric, 1 | 3) => Some((vec![0.5; channels], vec![0.5; channels])),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub height: u32,
    pub width: u32,
    pub channels: usize,
    pub layout: TensorLayout,
}

impl InputSpec {
    /// Logical `(H, W, C_in)` shape.
    pub fn dims(&self) -> [usize; 3] {
        [self.height as usize, self.width as usize, self.channels]
    }

    /// Batched shape in the model's layout.
    pub fn tensor_shape(&self) -> [usize; 4] {
        let [h, w, c] = self.dims();
        match self.layout {
            TensorLayout::Nchw => [1, c, h, w],
            TensorLayout::Nhwc => [1, h, w, c],
        }
    }
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            height: 224,
            width: 224,
            channels: 3,
            layout: TensorLayout::Nchw,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    #[serde(default)]
    pub input: InputSpec,
    #[serde(default = "default_normalization")]
    pub normalization: Normalization,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub runtime: OrtRuntimeConfig,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(MODEL_ASSET),
            labels_path: PathBuf::from(LABELS_ASSET),
            input: InputSpec::default(),
            normalization: default_normalization(),
            top_k: default_top_k(),
            runtime: OrtRuntimeConfig::default(),
            workers: default_workers(),
            queue_depth: default_queue_depth(),
        }
    }
}

fn default_normalization() -> Normalization {
    Normalization::Imagenet
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(4)
}

fn default_queue_depth() -> usize {
    32
}

impl RecognizerConfig {
    /// Defaults, then an optional JSON file, then individual env overrides.
    pub fn from_env() -> Self {
        let mut config = match env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring config file {}: {err}",
                    Path::new(&path).display()
                );
                Self::default()
            }),
            None => Self::default(),
        };
        if let Some(dir) = env::var_os(MODEL_DIR_ENV) {
            config = config.with_model_dir(Path::new(&dir));
        }
        if let Ok(raw) = env::var(TOP_K_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(k) if k > 0 => config.top_k = k,
                _ => log::warn!("Ignoring {TOP_K_ENV}={raw}; expected a positive integer"),
            }
        }
        config
    }

    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Points both assets at `dir`, keeping their file names.
    pub fn with_model_dir(mut self, dir: &Path) -> Self {
        self.model_path = dir.join(file_name_or(&self.model_path, "mobilenet_v2.onnx"));
        self.labels_path = dir.join(file_name_or(&self.labels_path, "labels.txt"));
        self
    }

    /// Resolves relative asset paths against the bundle, the working
    /// directory and finally the crate directory for dev runs.
    pub fn resolve_assets(mut self, resource_dir: Option<&Path>) -> Self {
        self.model_path = resolve_asset(&self.model_path, resource_dir);
        self.labels_path = resolve_asset(&self.labels_path, resource_dir);
        self
    }
}

fn file_name_or<'a>(path: &'a Path, fallback: &'a str) -> &'a Path {
    path.file_name()
        .map(Path::new)
        .unwrap_or_else(|| Path::new(fallback))
}

fn asset_candidates(name: &Path, resource_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(resource_dir) = resource_dir {
        candidates.push(resource_dir.join(name));
    }
    candidates.push(name.to_path_buf());
    candidates.push(Path::new(env!("CARGO_MANIFEST_DIR")).join(name));
    candidates
}

pub fn resolve_asset(name: &Path, resource_dir: Option<&Path>) -> PathBuf {
    if name.is_absolute() {
        return name.to_path_buf();
    }
    let candidates = asset_candidates(name, resource_dir);
    for candidate in &candidates {
        if candidate.exists() {
            return candidate.clone();
        }
    }
    candidates
        .into_iter()
        .next()
        .unwrap_or_else(|| name.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onnx::ProviderChoice;

    #[test]
    fn defaults_match_bundled_classifier() {
        let config = RecognizerConfig::default();
        assert_eq!(config.input.dims(), [224, 224, 3]);
        assert_eq!(config.input.tensor_shape(), [1, 3, 224, 224]);
        assert_eq!(config.top_k, DEFAULT_TOP_K);
        assert!(config.workers >= 1);
    }

    #[test]
    fn nhwc_shape_keeps_channels_last() {
        let spec = InputSpec {
            height: 4,
            width: 6,
            channels: 3,
            layout: TensorLayout::Nhwc,
        };
        assert_eq!(spec.tensor_shape(), [1, 4, 6, 3]);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let json = r#"{
            "model_path": "/opt/models/resnet.onnx",
            "labels_path": "/opt/models/resnet.txt",
            "normalization": "symmetric",
            "runtime": { "provider": "CpuOnly" }
        }"#;
        let config: RecognizerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.normalization, Normalization::Symmetric);
        assert_eq!(config.runtime.provider, ProviderChoice::CpuOnly);
        assert_eq!(config.top_k, DEFAULT_TOP_K);
        assert_eq!(config.input, InputSpec::default());
    }

    #[test]
    fn normalization_rejects_unsupported_channel_counts() {
        assert!(Normalization::Imagenet.constants(3).is_some());
        assert!(Normalization::Unit.constants(1).is_some());
        assert!(Normalization::Imagenet.constants(2).is_none());
        assert!(Normalization::Symmetric.constants(4).is_none());
    }

    #[test]
    fn model_dir_override_keeps_file_names() {
        let config = RecognizerConfig::default().with_model_dir(Path::new("/data/assets"));
        assert_eq!(config.model_path, Path::new("/data/assets/mobilenet_v2.onnx"));
        assert_eq!(config.labels_path, Path::new("/data/assets/labels.txt"));
    }

    #[test]
    fn absolute_assets_are_left_alone() {
        let path = std::env::temp_dir().join("missing-model.onnx");
        assert_eq!(resolve_asset(&path, None), path);
    }
}

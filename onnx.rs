use crate::error::{InferError, InitError};
use crate::model::InferenceBackend;
use lazy_static::lazy_static;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

#[cfg(target_os = "windows")]
use ort::execution_providers::{DirectMLExecutionProvider, ExecutionProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InferenceProvider {
    Cpu,
    DirectML { device_id: u32 },
}

impl InferenceProvider {
    pub fn label(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::DirectML { .. } => "GPU (DirectML)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderChoice {
    Auto,
    CpuOnly,
    DirectMLOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrtRuntimeConfig {
    pub provider: ProviderChoice,
    #[serde(default)]
    pub device_id: Option<u32>,
    #[serde(default)]
    pub intra_threads: Option<usize>,
}

impl Default for OrtRuntimeConfig {
    fn default() -> Self {
        Self {
            provider: ProviderChoice::Auto,
            device_id: None,
            intra_threads: None,
        }
    }
}

impl OrtRuntimeConfig {
    fn resolved_device_id(self) -> u32 {
        self.device_id.unwrap_or(0)
    }
}

/// Where the serialized graph comes from.
pub enum GraphSource<'a> {
    File(&'a Path),
    Memory(&'a [u8]),
}

impl GraphSource<'_> {
    fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Memory(bytes) => format!("<{} embedded bytes>", bytes.len()),
        }
    }
}

lazy_static! {
    // Only success is remembered; a failed commit is attempted again on the next init.
    static ref ORT_READY: Mutex<bool> = Mutex::new(false);
}

/// Points ONNX Runtime at the DLL shipped in the app bundle.
pub fn configure_runtime_dir(resource_dir: Option<&Path>) -> Result<(), InitError> {
    #[cfg(target_os = "windows")]
    {
        if let Some((dll_path, dll_dir)) = pick_ort_dll(ort_candidate_paths(resource_dir)) {
            set_ort_dylib_path(&dll_path, &dll_dir);
        } else {
            return Err(InitError::Runtime(
                "onnxruntime.dll not found in bundle".to_string(),
            ));
        }
    }
    #[cfg(not(target_os = "windows"))]
    let _ = resource_dir;
    Ok(())
}

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn ort_candidate_paths(resource_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(path) = std::env::var("ORT_DYLIB_PATH") {
        candidates.push(PathBuf::from(path));
    }
    if let Some(resource_dir) = resource_dir {
        candidates.push(resource_dir.join("onnxruntime").join("onnxruntime.dll"));
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            candidates.push(parent.join("onnxruntime").join("onnxruntime.dll"));
        }
    }
    candidates
}

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn pick_ort_dll(candidates: Vec<PathBuf>) -> Option<(PathBuf, PathBuf)> {
    for candidate in candidates {
        if candidate.exists() {
            let dir = candidate.parent()?.to_path_buf();
            return Some((candidate, dir));
        }
    }
    None
}

#[cfg(target_os = "windows")]
fn set_ort_dylib_path(dll_path: &Path, dll_dir: &Path) {
    std::env::set_var("ORT_DYLIB_PATH", dll_path);
    let paths = std::env::var_os("PATH").unwrap_or_default();
    let mut new_paths = std::ffi::OsString::new();
    new_paths.push(dll_dir);
    new_paths.push(";");
    new_paths.push(&paths);
    std::env::set_var("PATH", new_paths);
}

fn commit_environment() -> Result<bool, String> {
    // load-dynamic resolves the shared library here and panics if it is absent.
    std::panic::catch_unwind(|| ort::init().with_name("tauri-vision").commit())
        .map_err(|_| "ONNX Runtime library could not be loaded".to_string())?
        .map_err(|e| format!("Failed to init ORT environment: {e}"))
}

fn ensure_environment() -> Result<(), InitError> {
    ensure_environment_with(&ORT_READY, commit_environment)
}

fn ensure_environment_with(
    ready: &Mutex<bool>,
    commit: impl FnOnce() -> Result<bool, String>,
) -> Result<(), InitError> {
    let mut ready = ready
        .lock()
        .map_err(|_| InitError::Runtime("ORT environment lock poisoned".into()))?;
    if *ready {
        return Ok(());
    }
    let committed = commit().map_err(InitError::Runtime)?;
    if committed {
        if let Ok(env) = ort::environment::get_environment() {
            env.set_log_level(ort::logging::LogLevel::Warning);
        }
        log::info!(
            "ONNX Runtime environment ready ({})",
            runtime_version().unwrap_or_else(|| "unknown version".into())
        );
    }
    *ready = true;
    Ok(())
}

fn build_session(
    source: &GraphSource<'_>,
    cfg: OrtRuntimeConfig,
) -> Result<(Session, InferenceProvider), InitError> {
    if let GraphSource::File(path) = source {
        if !path.exists() {
            return Err(InitError::MissingAsset(path.to_path_buf()));
        }
    }
    ensure_environment()?;
    #[cfg_attr(not(target_os = "windows"), allow(unused_variables))]
    let device_id = cfg.resolved_device_id();

    let try_build = |use_dml: bool| -> Result<Session, InitError> {
        let build = || -> Result<Session, InitError> {
            let malformed = |e: ort::Error| InitError::MalformedModel(format!("{e}"));
            let mut builder = Session::builder()
                .map_err(|e| InitError::Runtime(format!("{e}")))?
                .with_optimization_level(GraphOptimizationLevel::Level1)
                .map_err(|e| InitError::Runtime(format!("{e}")))?
                .with_parallel_execution(false)
                .map_err(|e| InitError::Runtime(format!("{e}")))?;
            if let Some(threads) = cfg.intra_threads {
                builder = builder
                    .with_intra_threads(threads)
                    .map_err(|e| InitError::Runtime(format!("{e}")))?;
            }
            if use_dml {
                #[cfg(target_os = "windows")]
                {
                    builder = builder
                        .with_memory_pattern(false)
                        .map_err(|e| InitError::Runtime(format!("{e}")))?;
                    let ep = DirectMLExecutionProvider::default()
                        .with_device_id(device_id as i32)
                        .build();
                    builder = builder
                        .with_execution_providers([ep])
                        .map_err(|e| InitError::Runtime(format!("{e}")))?;
                }
            }
            match source {
                GraphSource::File(path) => builder.commit_from_file(path).map_err(malformed),
                GraphSource::Memory(bytes) => builder.commit_from_memory(bytes).map_err(malformed),
            }
        };
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(build)) {
            Ok(res) => res,
            Err(_) => Err(InitError::Runtime(
                "ONNX Runtime panicked while building session".into(),
            )),
        }
    };

    let wants_dml = matches!(cfg.provider, ProviderChoice::Auto | ProviderChoice::DirectMLOnly);
    #[cfg(target_os = "windows")]
    {
        if wants_dml {
            if let Ok(true) = DirectMLExecutionProvider::default().is_available() {
                if let Ok(session) = try_build(true) {
                    return Ok((session, InferenceProvider::DirectML { device_id }));
                }
            }
        }
    }

    if wants_dml && cfg!(target_os = "windows") {
        log::warn!(
            "DirectML execution provider unavailable; falling back to CPU for {}",
            source.describe()
        );
    }

    let session = try_build(false)?;
    Ok((session, InferenceProvider::Cpu))
}

pub fn runtime_version() -> Option<String> {
    let info = ort::info();
    if let Some(start) = info.find("git-branch=rel-") {
        let tail = &info[start + "git-branch=rel-".len()..];
        if let Some(end) = tail.find(',') {
            return Some(tail[..end].to_string());
        }
        return Some(tail.to_string());
    }
    Some(format!("1.{}.x", ort::MINOR_VERSION))
}

/// ONNX Runtime session behind the [`InferenceBackend`] seam.
///
/// `Session::run` needs exclusive access, so runs on one backend are
/// serialized; decode and ranking around them still proceed in parallel.
pub struct OrtBackend {
    session: Mutex<Session>,
    name: String,
}

impl OrtBackend {
    pub fn load(source: GraphSource<'_>, cfg: OrtRuntimeConfig) -> Result<Self, InitError> {
        let (session, provider) = build_session(&source, cfg)?;
        log::info!(
            "Loaded model {} on {}",
            source.describe(),
            provider.label()
        );
        Ok(Self {
            session: Mutex::new(session),
            name: format!("onnxruntime ({})", provider.label()),
        })
    }
}

impl InferenceBackend for OrtBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferError> {
        let tensor = Tensor::from_array(input.clone())
            .map_err(|e| InferError::Execution(format!("Invalid input tensor: {e}")))?;
        let mut session = self
            .session
            .lock()
            .map_err(|_| InferError::Execution("session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| InferError::Execution(format!("Failed to run model: {e}")))?;
        if outputs.len() == 0 {
            return Err(InferError::Execution("model returned no outputs".into()));
        }
        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferError::Execution(format!("Unexpected output tensor: {e}")))?;
        Ok(scores.to_vec())
    }
}

use crate::config::{Normalization, RecognizerConfig};
use crate::error::{InitError, PrepError, RecognitionError, Result};
use crate::inference::infer;
use crate::labels::LabelTable;
use crate::model::ModelHandle;
use crate::models::{CameraFrame, ModelInfo, RecognitionResult};
use crate::onnx::{GraphSource, OrtBackend};
use crate::pool::InferencePool;
use crate::preprocess::{ImagePreprocessor, ImageSource};
use crate::ranking::rank;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};

/// A fully loaded model, its labels and the matching preprocessing.
///
/// Read-only after construction; one instance serves every request.
#[derive(Debug)]
pub struct Recognizer {
    model: ModelHandle,
    labels: LabelTable,
    preprocessor: ImagePreprocessor,
    top_k: usize,
}

impl Recognizer {
    pub fn new(
        model: ModelHandle,
        labels: LabelTable,
        normalization: Normalization,
        top_k: usize,
    ) -> std::result::Result<Self, InitError> {
        if labels.len() != model.output_size() {
            return Err(InitError::LabelCountMismatch {
                labels: labels.len(),
                outputs: model.output_size(),
            });
        }
        let preprocessor = ImagePreprocessor::new(*model.input_spec(), normalization)
            .map_err(|e| InitError::MalformedModel(e.to_string()))?;
        Ok(Self {
            model,
            labels,
            preprocessor,
            top_k,
        })
    }

    /// decode → normalize → infer → rank, all on the calling thread.
    pub fn classify(&self, source: ImageSource) -> Result<Vec<RecognitionResult>> {
        let tensor = self.preprocessor.prepare(source)?;
        let scores = infer(&self.model, &tensor)?;
        Ok(rank(&scores, &self.labels, self.top_k))
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            backend: self.model.backend_name().to_string(),
            input: self.model.input_spec().dims(),
            classes: self.model.output_size(),
            top_k: self.top_k,
        }
    }
}

/// Produces a [`Recognizer`]; called at most once per successful init.
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> std::result::Result<Recognizer, InitError>;
}

pub enum ModelAssets {
    Files { model: PathBuf, labels: PathBuf },
    Embedded { model: Vec<u8>, labels: Vec<u8> },
}

/// Loads the bundled ONNX classifier and its labels.
pub struct AssetLoader {
    config: RecognizerConfig,
    assets: ModelAssets,
}

impl AssetLoader {
    pub fn from_config(config: RecognizerConfig) -> Self {
        let assets = ModelAssets::Files {
            model: config.model_path.clone(),
            labels: config.labels_path.clone(),
        };
        Self { config, assets }
    }

    /// For builds that compile the assets into the binary.
    pub fn embedded(config: RecognizerConfig, model: Vec<u8>, labels: Vec<u8>) -> Self {
        Self {
            config,
            assets: ModelAssets::Embedded { model, labels },
        }
    }
}

impl ModelLoader for AssetLoader {
    fn load(&self) -> std::result::Result<Recognizer, InitError> {
        let started = Instant::now();
        let (labels, backend) = match &self.assets {
            ModelAssets::Files { model, labels } => {
                log::info!("Loading model from {}", model.display());
                log::info!("Loading labels from {}", labels.display());
                let labels = LabelTable::load(labels)?;
                let backend = OrtBackend::load(GraphSource::File(model), self.config.runtime)?;
                (labels, backend)
            }
            ModelAssets::Embedded { model, labels } => {
                log::info!(
                    "Loading embedded model ({} bytes) and labels ({} bytes)",
                    model.len(),
                    labels.len()
                );
                let labels = LabelTable::from_bytes(labels)?;
                let backend = OrtBackend::load(GraphSource::Memory(model), self.config.runtime)?;
                (labels, backend)
            }
        };
        let model = ModelHandle::new(Box::new(backend), self.config.input)?;
        let recognizer =
            Recognizer::new(model, labels, self.config.normalization, self.config.top_k)?;
        log::info!(
            "Model initialized in {:.2?} ({} classes)",
            started.elapsed(),
            recognizer.labels().len()
        );
        Ok(recognizer)
    }
}

/// Turns an image reference into encoded bytes.
///
/// Platform content references (gallery URIs and the like) are resolved by
/// the application shell; the default resolver only reads local files.
pub trait ReferenceResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> std::result::Result<Vec<u8>, PrepError>;
}

pub struct FileResolver;

impl ReferenceResolver for FileResolver {
    fn resolve(&self, reference: &str) -> std::result::Result<Vec<u8>, PrepError> {
        std::fs::read(reference).map_err(|e| PrepError::Unreadable {
            reference: reference.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Entry point for the application shell.
///
/// Owns the process-wide model state and initializes it lazily, exactly
/// once, on the first call that needs it.
pub struct RecognitionService {
    loader: Arc<dyn ModelLoader>,
    resolver: Arc<dyn ReferenceResolver>,
    pool: InferencePool,
    state: OnceCell<Arc<Recognizer>>,
    // Held for the duration of a load; keeps the outcome of the last failed one.
    init_lock: Mutex<Option<InitError>>,
    attempts: AtomicU64,
}

impl RecognitionService {
    pub fn new(config: RecognizerConfig) -> Result<Self> {
        let pool = InferencePool::new(config.workers, config.queue_depth)
            .map_err(|e| RecognitionError::Worker(format!("Failed to start workers: {e}")))?;
        Ok(Self::with_parts(
            Arc::new(AssetLoader::from_config(config)),
            Arc::new(FileResolver),
            pool,
        ))
    }

    pub fn with_parts(
        loader: Arc<dyn ModelLoader>,
        resolver: Arc<dyn ReferenceResolver>,
        pool: InferencePool,
    ) -> Self {
        Self {
            loader,
            resolver,
            pool,
            state: OnceCell::new(),
            init_lock: Mutex::new(None),
            attempts: AtomicU64::new(0),
        }
    }

    /// Loads model and labels if that has not happened yet.
    ///
    /// Concurrent callers share one load. A failed load leaves the service
    /// uninitialized so a later call can try again.
    pub async fn initialize(&self) -> std::result::Result<(), InitError> {
        self.ensure_initialized().await.map(|_| ())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized()
    }

    pub fn model_info(&self) -> Option<ModelInfo> {
        self.state.get().map(|r| r.info())
    }

    async fn ensure_initialized(&self) -> std::result::Result<Arc<Recognizer>, InitError> {
        if let Some(recognizer) = self.state.get() {
            return Ok(recognizer.clone());
        }
        let seen = self.attempts.load(Ordering::SeqCst);
        let mut last_failure = self.init_lock.lock().await;
        if let Some(recognizer) = self.state.get() {
            return Ok(recognizer.clone());
        }
        // An attempt finished while we waited: report its outcome instead of reloading.
        if self.attempts.load(Ordering::SeqCst) != seen {
            if let Some(err) = last_failure.as_ref() {
                return Err(err.clone());
            }
        }

        let loader = self.loader.clone();
        let loaded = match tokio::task::spawn_blocking(move || loader.load()).await {
            Ok(result) => result,
            Err(e) => Err(InitError::Runtime(format!("Task join error: {e}"))),
        };
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match loaded {
            Ok(recognizer) => {
                let recognizer = Arc::new(recognizer);
                *last_failure = None;
                self.state
                    .set(recognizer.clone())
                    .map_err(|_| InitError::Runtime("model state set twice".into()))?;
                Ok(recognizer)
            }
            Err(err) => {
                log::warn!("Model initialization failed: {err}");
                *last_failure = Some(err.clone());
                Err(err)
            }
        }
    }

    async fn recognizer(&self) -> Result<Arc<Recognizer>> {
        if let Some(recognizer) = self.state.get() {
            return Ok(recognizer.clone());
        }
        let first_attempt = self.attempts.load(Ordering::SeqCst) == 0;
        self.ensure_initialized().await.map_err(|err| {
            if first_attempt {
                RecognitionError::NotInitialized(err)
            } else {
                RecognitionError::Init(err)
            }
        })
    }

    /// Recognizes the image a file path (or resolver-specific reference)
    /// points at.
    pub async fn recognize_by_reference(&self, reference: &str) -> Result<Vec<RecognitionResult>> {
        let recognizer = self.recognizer().await?;
        let resolver = self.resolver.clone();
        let owned = reference.to_string();
        let bytes = tokio::task::spawn_blocking(move || resolver.resolve(&owned))
            .await
            .map_err(|e| RecognitionError::Worker(format!("Task join error: {e}")))??;
        self.classify(recognizer, ImageSource::Encoded(bytes)).await
    }

    pub async fn recognize_by_bytes(&self, data: Vec<u8>) -> Result<Vec<RecognitionResult>> {
        let recognizer = self.recognizer().await?;
        self.classify(recognizer, ImageSource::Encoded(data)).await
    }

    /// Base64 or data-URL payload, as sent by a webview.
    pub async fn recognize_data(&self, image_data: String) -> Result<Vec<RecognitionResult>> {
        let recognizer = self.recognizer().await?;
        self.classify(recognizer, ImageSource::Base64(image_data)).await
    }

    pub async fn recognize_frame(&self, frame: CameraFrame) -> Result<Vec<RecognitionResult>> {
        let recognizer = self.recognizer().await?;
        self.classify(recognizer, ImageSource::RawRgba(frame)).await
    }

    async fn classify(
        &self,
        recognizer: Arc<Recognizer>,
        source: ImageSource,
    ) -> Result<Vec<RecognitionResult>> {
        let results = self.pool.run(move || recognizer.classify(source)).await??;
        if let Some(top) = results.first() {
            log::debug!("Top result: {} ({:.3})", top.label, top.confidence);
        }
        Ok(results)
    }
}

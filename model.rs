use crate::config::InputSpec;
use crate::error::{InferError, InitError};
use ndarray::Array4;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Something that can run one forward pass of a loaded classifier graph.
///
/// Implementations receive a batch-of-one tensor already laid out the way the
/// graph wants it and return the raw score vector.
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferError>;
}

/// A loaded graph together with its fixed input shape and output size.
pub struct ModelHandle {
    backend: Box<dyn InferenceBackend>,
    input: InputSpec,
    output_size: usize,
}

impl ModelHandle {
    /// Wraps `backend` and probes it with a zero tensor of the declared input
    /// shape to learn the output size.
    pub fn new(backend: Box<dyn InferenceBackend>, input: InputSpec) -> Result<Self, InitError> {
        let shape = input.tensor_shape();
        let zeros = Array4::<f32>::zeros(shape);
        let probe = catch_unwind(AssertUnwindSafe(|| backend.run(&zeros))).map_err(|_| {
            InitError::MalformedModel(format!("{} panicked during warm-up", backend.name()))
        })?;
        let scores = probe.map_err(|e| {
            InitError::MalformedModel(format!("graph rejected {shape:?} input: {e}"))
        })?;
        if scores.is_empty() {
            return Err(InitError::MalformedModel("graph produced no scores".into()));
        }
        log::debug!(
            "{} accepts {:?} and produces {} scores",
            backend.name(),
            shape,
            scores.len()
        );
        Ok(Self {
            backend,
            input,
            output_size: scores.len(),
        })
    }

    pub fn input_spec(&self) -> &InputSpec {
        &self.input
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub(crate) fn backend(&self) -> &dyn InferenceBackend {
        self.backend.as_ref()
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("backend", &self.backend.name())
            .field("input", &self.input)
            .field("output_size", &self.output_size)
            .finish()
    }
}

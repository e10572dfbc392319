use crate::error::InferError;
use crate::model::ModelHandle;
use crate::preprocess::ImageTensor;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

/// Runs one forward pass and returns the raw score vector.
pub fn infer(handle: &ModelHandle, tensor: &ImageTensor) -> Result<Vec<f32>, InferError> {
    let expected = handle.input_spec().tensor_shape();
    if tensor.shape() != expected {
        return Err(InferError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: tensor.shape().to_vec(),
        });
    }
    if !tensor.is_finite() {
        return Err(InferError::NonFinite("input tensor"));
    }

    let start = Instant::now();
    let scores = catch_unwind(AssertUnwindSafe(|| handle.backend().run(tensor.as_array())))
        .map_err(|_| InferError::Execution(format!("{} panicked", handle.backend_name())))??;
    log::info!("Inference completed in {:.2?}", start.elapsed());

    if scores.len() != handle.output_size() {
        return Err(InferError::Execution(format!(
            "expected {} scores, got {}",
            handle.output_size(),
            scores.len()
        )));
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(InferError::NonFinite("model output"));
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputSpec, TensorLayout};
    use crate::model::testing::{LinearBackend, NanBackend};
    use crate::model::InferenceBackend;
    use ndarray::Array4;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn small_input() -> InputSpec {
        InputSpec {
            height: 4,
            width: 4,
            channels: 3,
            layout: TensorLayout::Nchw,
        }
    }

    fn handle(classes: usize) -> ModelHandle {
        let input = small_input();
        ModelHandle::new(Box::new(LinearBackend::new(&input, classes)), input).unwrap()
    }

    #[test]
    fn same_tensor_gives_same_scores() {
        let handle = handle(5);
        let tensor = ImageTensor::new(Array4::from_elem((1, 3, 4, 4), 0.25), TensorLayout::Nchw);
        let first = infer(&handle, &tensor).unwrap();
        let second = infer(&handle, &tensor).unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(first, second);
    }

    #[test]
    fn wrong_shape_is_rejected_before_running() {
        let handle = handle(5);
        let tensor = ImageTensor::new(Array4::zeros((1, 4, 4, 3)), TensorLayout::Nhwc);
        let err = infer(&handle, &tensor).unwrap_err();
        assert!(matches!(
            err,
            InferError::ShapeMismatch { expected, actual }
                if expected == [1, 3, 4, 4] && actual == [1, 4, 4, 3]
        ));
    }

    #[test]
    fn nan_input_is_rejected() {
        let handle = handle(5);
        let mut data = Array4::zeros((1, 3, 4, 4));
        data[[0, 1, 2, 3]] = f32::NAN;
        let tensor = ImageTensor::new(data, TensorLayout::Nchw);
        assert!(matches!(
            infer(&handle, &tensor),
            Err(InferError::NonFinite("input tensor"))
        ));
    }

    #[test]
    fn nan_output_is_rejected() {
        let handle = ModelHandle::new(Box::new(NanBackend), small_input()).unwrap();
        let tensor = ImageTensor::new(Array4::zeros((1, 3, 4, 4)), TensorLayout::Nchw);
        assert!(matches!(
            infer(&handle, &tensor),
            Err(InferError::NonFinite("model output"))
        ));
    }

    struct FlakyBackend {
        armed: AtomicBool,
    }

    impl InferenceBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        fn run(&self, _input: &Array4<f32>) -> Result<Vec<f32>, InferError> {
            if self.armed.swap(true, Ordering::SeqCst) {
                panic!("kernel crashed");
            }
            Ok(vec![0.0; 3])
        }
    }

    #[test]
    fn backend_panic_fails_only_the_call() {
        let backend = FlakyBackend {
            armed: AtomicBool::new(false),
        };
        let handle = ModelHandle::new(Box::new(backend), small_input()).unwrap();
        let tensor = ImageTensor::new(Array4::zeros((1, 3, 4, 4)), TensorLayout::Nchw);
        assert!(matches!(
            infer(&handle, &tensor),
            Err(InferError::Execution(msg)) if msg.contains("panicked")
        ));
        assert_eq!(handle.output_size(), 3);
    }
}

use crate::config::{InputSpec, Normalization, TensorLayout};
use crate::error::PrepError;
use crate::models::CameraFrame;
use base64::{engine::general_purpose, Engine as _};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageBuffer, Rgba};
use ndarray::Array4;
use std::path::PathBuf;

/// Interpolation used for every resize to the model input size.
pub const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Where the pixels of one recognition request come from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Encoded(Vec<u8>),
    /// Base64 text, optionally wrapped in a `data:` URL.
    Base64(String),
    RawRgba(CameraFrame),
}

/// Normalized model input, batch of one, in the model's fixed layout.
#[derive(Debug, Clone)]
pub struct ImageTensor {
    data: Array4<f32>,
    dims: [usize; 3],
    layout: TensorLayout,
}

impl ImageTensor {
    pub fn new(data: Array4<f32>, layout: TensorLayout) -> Self {
        let s = data.shape();
        let dims = match layout {
            TensorLayout::Nchw => [s[2], s[3], s[1]],
            TensorLayout::Nhwc => [s[1], s[2], s[3]],
        };
        Self { data, dims, layout }
    }

    /// `(H, W, C_in)` regardless of layout.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn as_array(&self) -> &Array4<f32> {
        &self.data
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

/// Turns any [`ImageSource`] into an [`ImageTensor`] for one input shape.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    input: InputSpec,
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl ImagePreprocessor {
    pub fn new(input: InputSpec, normalization: Normalization) -> Result<Self, PrepError> {
        let (mean, std) = normalization
            .constants(input.channels)
            .ok_or(PrepError::ChannelMismatch(input.channels))?;
        Ok(Self { input, mean, std })
    }

    pub fn input_spec(&self) -> &InputSpec {
        &self.input
    }

    pub fn prepare(&self, source: ImageSource) -> Result<ImageTensor, PrepError> {
        let img = decode_source(source)?;
        self.tensor_from_image(&img)
    }

    pub fn prepare_bytes(&self, bytes: &[u8]) -> Result<ImageTensor, PrepError> {
        let img = decode_bytes(bytes)?;
        self.tensor_from_image(&img)
    }

    pub fn tensor_from_image(&self, img: &DynamicImage) -> Result<ImageTensor, PrepError> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(PrepError::EmptyImage { width, height });
        }
        let resized = img.resize_exact(self.input.width, self.input.height, RESIZE_FILTER);
        let mut data = Array4::<f32>::zeros(self.input.tensor_shape());
        match self.input.channels {
            3 => {
                for (x, y, pixel) in resized.to_rgb8().enumerate_pixels() {
                    for c in 0..3 {
                        self.put(&mut data, x, y, c, pixel[c]);
                    }
                }
            }
            1 => {
                for (x, y, pixel) in resized.to_luma8().enumerate_pixels() {
                    self.put(&mut data, x, y, 0, pixel[0]);
                }
            }
            other => return Err(PrepError::ChannelMismatch(other)),
        }
        Ok(ImageTensor::new(data, self.input.layout))
    }

    fn put(&self, data: &mut Array4<f32>, x: u32, y: u32, c: usize, value: u8) {
        let normalized = (value as f32 / 255.0 - self.mean[c]) / self.std[c];
        let (x, y) = (x as usize, y as usize);
        match self.input.layout {
            TensorLayout::Nchw => data[[0, c, y, x]] = normalized,
            TensorLayout::Nhwc => data[[0, y, x, c]] = normalized,
        }
    }
}

pub fn decode_source(source: ImageSource) -> Result<DynamicImage, PrepError> {
    match source {
        ImageSource::Path(path) => {
            let bytes = std::fs::read(&path).map_err(|e| PrepError::Unreadable {
                reference: path.display().to_string(),
                reason: e.to_string(),
            })?;
            decode_bytes(&bytes)
        }
        ImageSource::Encoded(bytes) => decode_bytes(&bytes),
        ImageSource::Base64(text) => decode_bytes(&decode_base64(&text)?),
        ImageSource::RawRgba(frame) => decode_frame(frame),
    }
}

/// Sniffs the container format and decodes it.
pub fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage, PrepError> {
    if bytes.is_empty() {
        return Err(PrepError::CorruptImage("empty buffer".into()));
    }
    let format = image::guess_format(bytes)
        .map_err(|_| PrepError::UnsupportedFormat("unrecognized image signature".into()))?;
    let img = image::load_from_memory_with_format(bytes, format)?;
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(PrepError::EmptyImage { width, height });
    }
    Ok(img)
}

/// Accepts bare base64 or a `data:<mime>;base64,<payload>` URL.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, PrepError> {
    let payload = match text.find("base64,") {
        Some(idx) => &text[idx + "base64,".len()..],
        None => text,
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(general_purpose::STANDARD.decode(cleaned)?)
}

fn decode_frame(frame: CameraFrame) -> Result<DynamicImage, PrepError> {
    let CameraFrame {
        width,
        height,
        rgba,
    } = frame;
    if width == 0 || height == 0 {
        return Err(PrepError::EmptyImage { width, height });
    }
    let expected = width as usize * height as usize * 4;
    if rgba.len() != expected {
        return Err(PrepError::InvalidFrame {
            width,
            height,
            expected,
            actual: rgba.len(),
        });
    }
    let buffer: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_raw(width, height, rgba)
        .ok_or(PrepError::InvalidFrame {
            width,
            height,
            expected,
            actual: 0,
        })?;
    Ok(DynamicImage::ImageRgba8(buffer))
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use image::{ImageOutputFormat, Rgb, RgbImage};

    fn imagenet() -> ImagePreprocessor {
        ImagePreprocessor::new(InputSpec::default(), Normalization::Imagenet).unwrap()
    }

    fn tiny(layout: TensorLayout, normalization: Normalization) -> ImagePreprocessor {
        let input = InputSpec {
            height: 1,
            width: 2,
            channels: 3,
            layout,
        };
        ImagePreprocessor::new(input, normalization).unwrap()
    }

    #[test]
    fn single_pixel_resizes_to_model_input() {
        let tensor = imagenet().prepare_bytes(&png(1, 1, [10, 20, 30])).unwrap();
        assert_eq!(tensor.dims(), [224, 224, 3]);
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
        assert!(tensor.is_finite());
    }

    #[test]
    fn large_jpeg_resizes_to_model_input() {
        let bytes = encode(&solid(1920, 1080, [200, 120, 40]), ImageOutputFormat::Jpeg(85));
        let tensor = imagenet().prepare(ImageSource::Encoded(bytes)).unwrap();
        assert_eq!(tensor.dims(), [224, 224, 3]);
    }

    #[test]
    fn imagenet_constants_are_applied_per_channel() {
        let tensor = imagenet().prepare_bytes(&png(8, 8, [255, 0, 255])).unwrap();
        let data = tensor.as_array();
        let red = (1.0 - 0.485) / 0.229;
        let green = (0.0 - 0.456) / 0.224;
        assert!((data[[0, 0, 100, 100]] - red).abs() < 1e-5);
        assert!((data[[0, 1, 100, 100]] - green).abs() < 1e-5);
    }

    #[test]
    fn nhwc_and_nchw_place_channels_differently() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 0, 255]));
        let img = DynamicImage::ImageRgb8(img);

        let nchw = tiny(TensorLayout::Nchw, Normalization::Unit)
            .tensor_from_image(&img)
            .unwrap();
        assert_eq!(nchw.shape(), &[1, 3, 1, 2]);
        assert_eq!(nchw.as_array()[[0, 0, 0, 0]], 1.0);
        assert_eq!(nchw.as_array()[[0, 2, 0, 1]], 1.0);
        assert_eq!(nchw.as_array()[[0, 2, 0, 0]], 0.0);

        let nhwc = tiny(TensorLayout::Nhwc, Normalization::Unit)
            .tensor_from_image(&img)
            .unwrap();
        assert_eq!(nhwc.shape(), &[1, 1, 2, 3]);
        assert_eq!(nhwc.dims(), nchw.dims());
        assert_eq!(nhwc.as_array()[[0, 0, 0, 0]], 1.0);
        assert_eq!(nhwc.as_array()[[0, 0, 1, 2]], 1.0);
    }

    #[test]
    fn symmetric_normalization_spans_minus_one_to_one() {
        let img = solid(2, 1, [0, 255, 0]);
        let tensor = tiny(TensorLayout::Nchw, Normalization::Symmetric)
            .tensor_from_image(&img)
            .unwrap();
        assert_eq!(tensor.as_array()[[0, 0, 0, 0]], -1.0);
        assert_eq!(tensor.as_array()[[0, 1, 0, 0]], 1.0);
    }

    #[test]
    fn grayscale_models_get_one_channel() {
        let input = InputSpec {
            height: 16,
            width: 16,
            channels: 1,
            layout: TensorLayout::Nchw,
        };
        let prep = ImagePreprocessor::new(input, Normalization::Unit).unwrap();
        let tensor = prep.prepare_bytes(&png(3, 5, [255, 255, 255])).unwrap();
        assert_eq!(tensor.dims(), [16, 16, 1]);
        assert!((tensor.as_array()[[0, 0, 8, 8]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn unsupported_channel_count_is_rejected() {
        let input = InputSpec {
            channels: 2,
            ..InputSpec::default()
        };
        assert!(matches!(
            ImagePreprocessor::new(input, Normalization::Unit),
            Err(PrepError::ChannelMismatch(2))
        ));
    }

    #[test]
    fn data_url_prefix_is_stripped() {
        let encoded = general_purpose::STANDARD.encode(png(4, 4, [1, 2, 3]));
        let url = format!("data:image/png;base64,{encoded}");
        let tensor = imagenet().prepare(ImageSource::Base64(url)).unwrap();
        assert_eq!(tensor.dims(), [224, 224, 3]);
    }

    #[test]
    fn malformed_base64_differs_from_corrupt_image() {
        let bad_b64 = imagenet()
            .prepare(ImageSource::Base64("@@not base64@@".into()))
            .unwrap_err();
        assert!(matches!(bad_b64, PrepError::InvalidBase64(_)));

        let mut truncated = png(32, 32, [9, 9, 9]);
        truncated.truncate(40);
        let payload = general_purpose::STANDARD.encode(truncated);
        let corrupt = imagenet()
            .prepare(ImageSource::Base64(payload))
            .unwrap_err();
        assert!(matches!(corrupt, PrepError::CorruptImage(_)));
    }

    #[test]
    fn unknown_signature_is_unsupported() {
        let err = imagenet()
            .prepare(ImageSource::Encoded(b"plain text, not pixels".to_vec()))
            .unwrap_err();
        assert!(matches!(err, PrepError::UnsupportedFormat(_)));
    }

    #[test]
    fn missing_file_is_unreadable() {
        let path = std::env::temp_dir().join(format!("{}.png", uuid::Uuid::new_v4()));
        let err = imagenet().prepare(ImageSource::Path(path)).unwrap_err();
        assert!(matches!(err, PrepError::Unreadable { .. }));
    }

    #[test]
    fn camera_frame_is_accepted() {
        let frame = CameraFrame {
            width: 3,
            height: 2,
            rgba: vec![128; 3 * 2 * 4],
        };
        let tensor = imagenet().prepare(ImageSource::RawRgba(frame)).unwrap();
        assert_eq!(tensor.dims(), [224, 224, 3]);
    }

    #[test]
    fn short_camera_frame_is_rejected() {
        let frame = CameraFrame {
            width: 3,
            height: 2,
            rgba: vec![0; 10],
        };
        let err = imagenet().prepare(ImageSource::RawRgba(frame)).unwrap_err();
        assert!(matches!(
            err,
            PrepError::InvalidFrame {
                expected: 24,
                actual: 10,
                ..
            }
        ));
    }

    #[test]
    fn zero_area_frame_is_empty() {
        let frame = CameraFrame {
            width: 0,
            height: 4,
            rgba: Vec::new(),
        };
        let err = imagenet().prepare(ImageSource::RawRgba(frame)).unwrap_err();
        assert!(matches!(err, PrepError::EmptyImage { width: 0, height: 4 }));
    }
}

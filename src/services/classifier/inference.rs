use crate::services::classifier::InferenceError;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::Value;

/// Side length of the square model input.
pub const INPUT_SIZE: u32 = 224;

// ImageNet normalization constants
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Turn a decoded image into a `[1, 3, 224, 224]` NCHW tensor.
///
/// Steps, in order: convert to RGB (alpha dropped, grayscale expanded),
/// stretch to 224x224 with a bilinear filter, scale to [0, 1], then
/// normalize each channel with `MEAN` / `STD`. The classifier weights were
/// trained against exactly this transform.
pub fn preprocess(image: &DynamicImage) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let resized = image::imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        let pixel = resized.get_pixel(x as u32, y as u32);
        (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c]
    })
}

/// Numerically stable softmax over raw logits.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));

    let exp: Vec<f32> = logits.iter().map(|&x| (x - max_logit).exp()).collect();
    let exp_sum: f32 = exp.iter().sum();
    exp.into_iter().map(|e| e / exp_sum).collect()
}

/// Run one forward pass and return the first output's raw logits.
pub fn run_session(
    session: &mut Session,
    input_name: &str,
    input: Array4<f32>,
) -> Result<Vec<f32>, InferenceError> {
    let input_tensor = Value::from_array(input)
        .map_err(|e| InferenceError::Session(format!("Failed to create tensor value: {}", e)))?;

    let outputs = session
        .run(ort::inputs![input_name => input_tensor])
        .map_err(|e| InferenceError::Session(e.to_string()))?;

    let output_value = outputs.values().next().ok_or(InferenceError::NoOutput)?;

    let (_, data) = output_value
        .try_extract_tensor::<f32>()
        .map_err(|e| {
            InferenceError::Session(format!("Failed to extract output tensor: {}", e))
        })?;

    Ok(data.iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};

    const TOLERANCE: f32 = 1e-6;

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() < TOLERANCE,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_output_shape_is_nchw_224() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(640, 480));
        assert_eq!(preprocess(&img).shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_golden_solid_red_stretched() {
        // Non-square source: stretched, never cropped, so every pixel stays pure red.
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(37, 53, Rgb([255, 0, 0])));
        let tensor = preprocess(&img);

        for (y, x) in [(0, 0), (111, 57), (223, 223), (0, 223)] {
            assert_close(tensor[[0, 0, y, x]], 2.248_908_3);
            assert_close(tensor[[0, 1, y, x]], -2.035_714_1);
            assert_close(tensor[[0, 2, y, x]], -1.804_444_4);
        }
    }

    #[test]
    fn test_golden_gradient_at_native_size() {
        // 224x224 input needs no resampling: pixel (x, y) = (x, y, 128).
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(224, 224, |x, y| {
            Rgb([x as u8, y as u8, 128])
        }));
        let tensor = preprocess(&img);

        assert_close(tensor[[0, 0, 0, 0]], -2.117_903_9);
        assert_close(tensor[[0, 1, 0, 0]], -2.035_714_1);
        assert_close(tensor[[0, 2, 0, 0]], 0.426_492_6);

        assert_close(tensor[[0, 0, 100, 223]], 1.700_916_2);
        assert_close(tensor[[0, 1, 100, 223]], -0.285_014_0);

        assert_close(tensor[[0, 0, 5, 76]], -0.816_422_6);
        assert_close(tensor[[0, 2, 200, 13]], 0.426_492_6);
    }

    #[test]
    fn test_golden_bilinear_upscale_of_small_pattern() {
        // 7x5 source: R ramps with x, G ramps with y, B is a 0/255 checkerboard.
        // Values recorded from the Triangle filter; Nearest or CatmullRom give
        // different bytes at every sampled point.
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(7, 5, |x, y| {
            let checker = if (x + y) % 2 == 0 { 255 } else { 0 };
            Rgb([(x * 40) as u8, (y * 60) as u8, checker])
        }));
        let tensor = preprocess(&img);

        // resized (x=50, y=30) = [43, 11, 59]
        assert_close(tensor[[0, 0, 30, 50]], -1.381_539_6);
        assert_close(tensor[[0, 1, 30, 50]], -1.843_137_3);
        assert_close(tensor[[0, 2, 30, 50]], -0.776_122_0);

        // resized (x=100, y=100) = [106, 105, 110]
        assert_close(tensor[[0, 0, 100, 100]], -0.302_680_08);
        assert_close(tensor[[0, 1, 100, 100]], -0.197_478_96);
        assert_close(tensor[[0, 2, 100, 100]], 0.112_766_96);

        // resized (x=111, y=57) = [119, 47, 198]
        assert_close(tensor[[0, 0, 57, 111]], -0.080_058_28);
        assert_close(tensor[[0, 1, 57, 111]], -1.212_885_0);
        assert_close(tensor[[0, 2, 57, 111]], 1.646_536_1);

        // resized (x=40, y=70) = [31, 64, 185]
        assert_close(tensor[[0, 0, 70, 40]], -1.587_036_6);
        assert_close(tensor[[0, 1, 70, 40]], -0.915_266_04);
        assert_close(tensor[[0, 2, 70, 40]], 1.419_956_6);
    }

    #[test]
    fn test_golden_grayscale_expands_to_three_channels() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(300, 300, Luma([150])));
        let tensor = preprocess(&img);

        assert_close(tensor[[0, 0, 10, 10]], 0.450_809_2);
        assert_close(tensor[[0, 1, 10, 10]], 0.590_336_2);
        assert_close(tensor[[0, 2, 10, 10]], 0.809_934_8);
    }

    #[test]
    fn test_alpha_is_discarded() {
        let transparent = DynamicImage::ImageRgba8(RgbaImage::from_pixel(64, 64, Rgba([255, 255, 255, 0])));
        let opaque = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([255, 255, 255])));

        let a = preprocess(&transparent);
        assert_eq!(a, preprocess(&opaque));
        assert_close(a[[0, 0, 0, 0]], (1.0 - MEAN[0]) / STD[0]);
        assert_close(a[[0, 1, 0, 0]], 2.428_571_5);
        assert_close(a[[0, 2, 0, 0]], 2.640_000_1);
    }

    #[test]
    fn test_preprocess_is_bit_identical_across_runs() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(513, 97, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
        }));

        let first = preprocess(&img);
        let second = preprocess(&img);
        let first_bits: Vec<u32> = first.iter().map(|v| v.to_bits()).collect();
        let second_bits: Vec<u32> = second.iter().map(|v| v.to_bits()).collect();
        assert_eq!(first_bits, second_bits);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[2.0, -1.0, 0.5, 3.25, 0.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(probs[3] > probs[0] && probs[0] > probs[2]);
    }

    #[test]
    fn test_softmax_handles_large_logits() {
        let probs = softmax(&[1000.0, 1000.0, -1000.0]);
        assert!(probs.iter().all(|p| p.is_finite()));
        assert!((probs[0] - 0.5).abs() < 1e-6);
        assert!(probs[2] < 1e-6);
    }
}

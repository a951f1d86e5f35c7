//! 8-bit affine quantization
//!
//! Each tensor is mapped to `u8` with one `(scale, zero_point)` pair:
//! `real = (q - zero_point) * scale`. The representable range always
//! contains zero, so zero-valued weights and padding are exact.

use serde::{Deserialize, Serialize};

/// Per-tensor quantization parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: u8,
}

impl QuantParams {
    /// Parameters covering `[min, max]` (extended to include zero)
    pub fn from_range(min: f32, max: f32) -> Self {
        let min = min.min(0.0);
        let max = max.max(0.0);

        if !(max > min) || !(max - min).is_finite() {
            return Self {
                scale: 1.0,
                zero_point: 0,
            };
        }

        let scale = (max - min) / 255.0;
        let zero_point = (-min / scale).round().clamp(0.0, 255.0) as u8;
        Self { scale, zero_point }
    }

    /// Quantize a single value
    pub fn quantize(&self, value: f32) -> u8 {
        (value / self.scale + self.zero_point as f32)
            .round()
            .clamp(0.0, 255.0) as u8
    }

    /// Recover an approximation of the original value
    pub fn dequantize(&self, q: u8) -> f32 {
        (q as f32 - self.zero_point as f32) * self.scale
    }
}

/// Quantize a tensor's values with parameters fitted to its range
pub fn quantize(values: &[f32]) -> (Vec<u8>, QuantParams) {
    let (min, max) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0f32, 0.0f32), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    let params = QuantParams::from_range(min, max);
    let data = values.iter().map(|&v| params.quantize(v)).collect();
    (data, params)
}

/// Dequantize a tensor
pub fn dequantize(data: &[u8], params: QuantParams) -> Vec<f32> {
    data.iter().map(|&q| params.dequantize(q)).collect()
}

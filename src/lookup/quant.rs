//! Row-wise 8-bit quantization producing the `(scale, bias)` pairs the lookup kernels consume.

use crate::error::{LookupError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct QuantTable {
    pub rows: usize,
    pub block_size: usize,
    pub data: Vec<u8>,        // rows x block_size
    pub scale_bias: Vec<f32>, // rows x (scale, bias)
}

/// Quantize each row to `[0, 255]` with `x ~= scale * q + bias`, `bias = min(row)`.
pub fn quantize_rowwise(table: &[f32], block_size: usize) -> Result<QuantTable> {
    if block_size == 0 || table.len() % block_size != 0 {
        return Err(LookupError::RaggedTable { len: table.len(), block_size });
    }
    let rows = table.len() / block_size;
    let mut data = Vec::with_capacity(table.len());
    let mut scale_bias = Vec::with_capacity(2 * rows);
    for row in table.chunks_exact(block_size) {
        let (lo, hi) = row
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
        let range = hi - lo;
        // constant rows: every code is 0 and the bias alone reconstructs them
        let scale = if range > 0.0 { range / 255.0 } else { 1.0 };
        let inv = 1.0 / scale;
        data.extend(row.iter().map(|&x| ((x - lo) * inv).round().clamp(0.0, 255.0) as u8));
        scale_bias.push(scale);
        scale_bias.push(lo);
    }
    Ok(QuantTable { rows, block_size, data, scale_bias })
}

impl QuantTable {
    pub fn dequantize_row(&self, row: usize) -> Option<Vec<f32>> {
        if row >= self.rows { return None; }
        let (scale, bias) = (self.scale_bias[2 * row], self.scale_bias[2 * row + 1]);
        let codes = &self.data[row * self.block_size..(row + 1) * self.block_size];
        Some(codes.iter().map(|&q| scale * q as f32 + bias).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ragged_input_rejected() {
        assert_eq!(
            quantize_rowwise(&[1.0, 2.0, 3.0], 2),
            Err(LookupError::RaggedTable { len: 3, block_size: 2 })
        );
        assert!(quantize_rowwise(&[], 0).is_err());
    }

    #[test]
    fn endpoints_are_exact_codes() {
        let q = quantize_rowwise(&[10.0, 265.0, 61.0], 3).unwrap();
        assert_eq!(q.data, vec![0, 255, 51]);
        assert_eq!(q.scale_bias, vec![1.0, 10.0]);
    }
}

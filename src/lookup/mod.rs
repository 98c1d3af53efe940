//! Embedding-bag lookup: gather table rows by index, reduce each segment into one output row.
//!
//! ```text
//! out[m] = sum_{k in segment m} w_k * (scale[idx_k] * table[idx_k] + bias[idx_k])
//! ```
//! optionally divided by the segment length. All buffers are borrowed; the
//! kernels allocate nothing and write only `out`.

use half::f16;

use crate::error::{LookupError, Result};

pub mod accumulator;
#[cfg(all(target_arch = "x86_64", feature = "simd-avx2"))]
pub mod avx2;
pub mod case;
pub mod dispatch;
pub mod generic;
pub mod quant;
pub mod table;

pub use accumulator::{Element, ElementKind, RowIndex};
pub use dispatch::{cpu_features, select, CpuFeatures, KernelTier};

/// Borrowed arguments of one lookup call.
///
/// `index_size`, `output_size` and `data_size` are the logical sizes; the
/// slices may be longer but never shorter.
#[derive(Clone, Copy)]
pub struct Lookup<'a, I, E> {
    pub block_size: usize,
    pub output_size: usize,
    pub index_size: usize,
    pub data_size: usize,
    pub input: &'a [E],
    pub indices: &'a [I],
    pub lengths: &'a [i32],
    pub weights: Option<&'a [f32]>,
    pub scale_bias: Option<&'a [f32]>,
    pub normalize: bool,
}

impl<'a, I: RowIndex, E: Element> Lookup<'a, I, E> {
    /// Sizes are taken from the slices: one segment per length, one row per
    /// `block_size` table elements.
    pub fn new(block_size: usize, input: &'a [E], indices: &'a [I], lengths: &'a [i32]) -> Self {
        let data_size = if block_size == 0 { 0 } else { input.len() / block_size };
        Self {
            block_size,
            output_size: lengths.len(),
            index_size: indices.len(),
            data_size,
            input,
            indices,
            lengths,
            weights: None,
            scale_bias: None,
            normalize: false,
        }
    }

    pub fn with_data_size(mut self, data_size: usize) -> Self {
        self.data_size = data_size;
        self
    }

    pub fn with_weights(mut self, weights: &'a [f32]) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_scale_bias(mut self, scale_bias: &'a [f32]) -> Self {
        self.scale_bias = Some(scale_bias);
        self
    }

    pub fn normalized(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Number of `f32` elements `out` must hold.
    pub fn output_len(&self) -> usize { self.output_size.saturating_mul(self.block_size) }

    /// Run on the best kernel for this CPU.
    pub fn run(&self, out: &mut [f32]) -> Result<()> { dispatch::dispatch(self, out) }

    /// Run on a specific kernel tier.
    pub fn run_with(&self, tier: KernelTier, out: &mut [f32]) -> Result<()> {
        dispatch::run_tier(tier, self, out)
    }

    /// Slice capacity checks; done before any output row is touched.
    pub(crate) fn check_buffers(&self, out_len: usize) -> Result<()> {
        fn need(buffer: &'static str, needed: usize, got: usize) -> Result<()> {
            if got < needed { Err(LookupError::BufferTooSmall { buffer, needed, got }) } else { Ok(()) }
        }
        need("table", self.data_size.saturating_mul(self.block_size), self.input.len())?;
        need("indices", self.index_size, self.indices.len())?;
        need("lengths", self.output_size, self.lengths.len())?;
        if let Some(w) = self.weights {
            need("weights", self.index_size, w.len())?;
        }
        if let Some(sb) = self.scale_bias {
            need("scale_bias", self.data_size.saturating_mul(2), sb.len())?;
        }
        need("output", self.output_len(), out_len)
    }

    #[inline]
    pub(crate) fn segment_len(&self, segment: usize) -> Result<usize> {
        let length = self.lengths[segment];
        usize::try_from(length).map_err(|_| LookupError::NegativeLength { segment, length })
    }

    #[inline]
    pub(crate) fn row_at(&self, position: usize) -> Result<usize> {
        let raw = self.indices[position];
        raw.to_row(self.data_size).ok_or(LookupError::InvalidIndex {
            position,
            index: raw.as_i64(),
            data_size: self.data_size,
        })
    }

    /// Effective weight and additive bias of the entry at `position` addressing `row`.
    #[inline]
    pub(crate) fn weight_and_bias(&self, position: usize, row: usize) -> (f32, f32) {
        let mut w = self.weights.map_or(1.0, |ws| ws[position]);
        let mut b = 0.0;
        if let Some(sb) = self.scale_bias {
            // bias takes the caller weight; only then is the weight rescaled
            b = w * sb[2 * row + 1];
            w *= sb[2 * row];
        }
        (w, b)
    }

    #[inline]
    pub(crate) fn row(&self, row: usize) -> &'a [E] {
        let input = self.input;
        &input[row * self.block_size..(row + 1) * self.block_size]
    }
}

/// Positional form of the lookup contract, dispatched to the best kernel.
#[allow(clippy::too_many_arguments)]
pub fn embedding_lookup<I: RowIndex, E: Element>(
    block_size: usize,
    output_size: usize,
    index_size: usize,
    data_size: usize,
    input: &[E],
    indices: &[I],
    lengths: &[i32],
    weights: Option<&[f32]>,
    scale_bias: Option<&[f32]>,
    normalize: bool,
    out: &mut [f32],
) -> Result<()> {
    Lookup {
        block_size,
        output_size,
        index_size,
        data_size,
        input,
        indices,
        lengths,
        weights,
        scale_bias,
        normalize,
    }
    .run(out)
}

macro_rules! lookup_entry_points {
    ($($name:ident => $index:ty, $elem:ty;)*) => {$(
        #[doc = concat!("[`embedding_lookup`] over `", stringify!($index), "` indices and `",
                        stringify!($elem), "` table rows.")]
        #[allow(clippy::too_many_arguments)]
        pub fn $name(
            block_size: usize,
            output_size: usize,
            index_size: usize,
            data_size: usize,
            input: &[$elem],
            indices: &[$index],
            lengths: &[i32],
            weights: Option<&[f32]>,
            scale_bias: Option<&[f32]>,
            normalize: bool,
            out: &mut [f32],
        ) -> Result<()> {
            embedding_lookup::<$index, $elem>(
                block_size, output_size, index_size, data_size, input, indices, lengths,
                weights, scale_bias, normalize, out,
            )
        }
    )*};
}

lookup_entry_points! {
    embedding_lookup_i32_f32_f32 => i32, f32;
    embedding_lookup_i64_f32_f32 => i64, f32;
    embedding_lookup_i32_f16_f32 => i32, f16;
    embedding_lookup_i64_f16_f32 => i64, f16;
    embedding_lookup_i32_u8_f32 => i32, u8;
    embedding_lookup_i64_u8_f32 => i64, u8;
}

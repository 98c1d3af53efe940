//! AVX2 + FMA reduction tier for x86_64.
//!
//! Same contract and checks as [`super::generic::reduce`]; rows are
//! accumulated eight lanes at a time and the next row is prefetched while
//! the current one is summed.
#![allow(unsafe_op_in_unsafe_fn)]

use half::f16;
use std::arch::x86_64::*;

use super::{Element, Lookup, RowIndex};
use crate::error::{LookupError, Result};

/// # Safety
/// Requires AVX2 and FMA, plus whatever [`Element::avx2_ready`] demands for `E`.
#[target_feature(enable = "avx2,fma")]
pub unsafe fn reduce<I: RowIndex, E: Element>(args: &Lookup<'_, I, E>, out: &mut [f32]) -> Result<()> {
    args.check_buffers(out.len())?;
    let block = args.block_size;
    let mut current = 0usize;
    for m in 0..args.output_size {
        let len = args.segment_len(m)?;
        let acc = &mut out[m * block..(m + 1) * block];
        acc.fill(0.0);
        for _ in 0..len {
            if current >= args.index_size {
                return Err(LookupError::IndexStreamExhausted { segment: m, current, index_size: args.index_size });
            }
            let idx = args.row_at(current)?;
            if current + 1 < args.index_size {
                prefetch_row(args, current + 1);
            }
            let (w, b) = args.weight_and_bias(current, idx);
            E::axpy_avx2(w, args.row(idx), acc);
            if args.scale_bias.is_some() {
                add_scalar(acc, b);
            }
            current += 1;
        }
        if args.normalize && len > 0 {
            scale(acc, 1.0 / len as f32);
        }
    }
    if current != args.index_size {
        return Err(LookupError::LengthMismatch { consumed: current, index_size: args.index_size });
    }
    Ok(())
}

#[inline(always)]
unsafe fn prefetch_row<I: RowIndex, E: Element>(args: &Lookup<'_, I, E>, position: usize) {
    // Out-of-range entries are left for the checked path to report.
    if args.block_size == 0 { return; }
    if let Some(next) = args.indices[position].to_row(args.data_size) {
        let ptr = args.input.as_ptr().add(next * args.block_size);
        _mm_prefetch(ptr.cast::<i8>(), _MM_HINT_T2);
    }
}

#[target_feature(enable = "avx2,fma")]
pub unsafe fn axpy_f32(w: f32, row: &[f32], out: &mut [f32]) {
    let n = out.len().min(row.len());
    let chunks = n / 8;
    let wv = _mm256_set1_ps(w);
    for i in 0..chunks {
        let off = i * 8;
        let x = _mm256_loadu_ps(row.as_ptr().add(off));
        let acc = _mm256_loadu_ps(out.as_ptr().add(off));
        _mm256_storeu_ps(out.as_mut_ptr().add(off), _mm256_fmadd_ps(wv, x, acc));
    }
    for i in (chunks * 8)..n {
        out[i] += w * row[i];
    }
}

#[target_feature(enable = "avx2,fma,f16c")]
pub unsafe fn axpy_f16(w: f32, row: &[f16], out: &mut [f32]) {
    let n = out.len().min(row.len());
    let chunks = n / 8;
    let wv = _mm256_set1_ps(w);
    for i in 0..chunks {
        let off = i * 8;
        let x = _mm256_cvtph_ps(_mm_loadu_si128(row.as_ptr().add(off).cast()));
        let acc = _mm256_loadu_ps(out.as_ptr().add(off));
        _mm256_storeu_ps(out.as_mut_ptr().add(off), _mm256_fmadd_ps(wv, x, acc));
    }
    for i in (chunks * 8)..n {
        out[i] += w * f32::from(row[i]);
    }
}

#[target_feature(enable = "avx2,fma")]
pub unsafe fn axpy_u8(w: f32, row: &[u8], out: &mut [f32]) {
    let n = out.len().min(row.len());
    let chunks = n / 8;
    let wv = _mm256_set1_ps(w);
    for i in 0..chunks {
        let off = i * 8;
        // 8 bytes -> 8 x i32 (zero-extended) -> 8 x f32
        let bytes = _mm_loadl_epi64(row.as_ptr().add(off).cast());
        let x = _mm256_cvtepi32_ps(_mm256_cvtepu8_epi32(bytes));
        let acc = _mm256_loadu_ps(out.as_ptr().add(off));
        _mm256_storeu_ps(out.as_mut_ptr().add(off), _mm256_fmadd_ps(wv, x, acc));
    }
    for i in (chunks * 8)..n {
        out[i] += w * row[i] as f32;
    }
}

#[target_feature(enable = "avx2")]
unsafe fn add_scalar(v: &mut [f32], b: f32) {
    let chunks = v.len() / 8;
    let bv = _mm256_set1_ps(b);
    for i in 0..chunks {
        let p = v.as_mut_ptr().add(i * 8);
        _mm256_storeu_ps(p, _mm256_add_ps(_mm256_loadu_ps(p), bv));
    }
    for x in &mut v[chunks * 8..] {
        *x += b;
    }
}

#[target_feature(enable = "avx2")]
unsafe fn scale(v: &mut [f32], s: f32) {
    let chunks = v.len() / 8;
    let sv = _mm256_set1_ps(s);
    for i in 0..chunks {
        let p = v.as_mut_ptr().add(i * 8);
        _mm256_storeu_ps(p, _mm256_mul_ps(_mm256_loadu_ps(p), sv));
    }
    for x in &mut v[chunks * 8..] {
        *x *= s;
    }
}

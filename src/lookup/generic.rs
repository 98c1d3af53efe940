//! Portable reduction engine; the fallback every other tier must agree with.

use super::{Element, Lookup, RowIndex};
use crate::error::{LookupError, Result};

/// Reduce every segment of `args` into `out`, one `block_size` row per segment.
///
/// A single cursor walks the index stream across all segments. Fails on the
/// first bad entry; rows written before that point are not meaningful.
pub fn reduce<I: RowIndex, E: Element>(args: &Lookup<'_, I, E>, out: &mut [f32]) -> Result<()> {
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
            let (w, b) = args.weight_and_bias(current, idx);
            E::axpy(w, args.row(idx), acc);
            if args.scale_bias.is_some() {
                for v in acc.iter_mut() { *v += b; }
            }
            current += 1;
        }
        if args.normalize && len > 0 {
            let inv = 1.0 / len as f32;
            for v in acc.iter_mut() { *v *= inv; }
        }
    }
    if current != args.index_size {
        return Err(LookupError::LengthMismatch { consumed: current, index_size: args.index_size });
    }
    Ok(())
}

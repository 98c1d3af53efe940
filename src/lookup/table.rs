use anyhow::{bail, Context, Result};
use half::f16;
use log::debug;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::quant::QuantTable;
use super::{Element, ElementKind, KernelTier, Lookup};
use crate::error::LookupError;

const T_MAGIC: &[u8; 8] = b"EMBTBL01"; // embedding table v1
const T_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum TableData {
    F32(Vec<f32>),
    F16(Vec<f16>),
    U8(Vec<u8>),
}

impl TableData {
    pub fn kind(&self) -> ElementKind {
        match self {
            TableData::F32(_) => ElementKind::F32,
            TableData::F16(_) => ElementKind::F16,
            TableData::U8(_) => ElementKind::U8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TableData::F32(v) => v.len(),
            TableData::F16(v) => v.len(),
            TableData::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Owned embedding table: `rows x block_size` elements plus optional row-wise scale-bias.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingTable {
    pub rows: usize,
    pub block_size: usize,
    pub data: TableData,
    pub scale_bias: Option<Vec<f32>>,
}

impl EmbeddingTable {
    pub fn new(block_size: usize, data: TableData) -> std::result::Result<Self, LookupError> {
        let len = data.len();
        if block_size == 0 || len % block_size != 0 {
            return Err(LookupError::RaggedTable { len, block_size });
        }
        Ok(Self { rows: len / block_size, block_size, data, scale_bias: None })
    }

    pub fn from_quant(q: QuantTable) -> Self {
        Self { rows: q.rows, block_size: q.block_size, data: TableData::U8(q.data), scale_bias: Some(q.scale_bias) }
    }

    pub fn kind(&self) -> ElementKind { self.data.kind() }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Format (little endian):
        // magic: 8 bytes b"EMBTBL01"
        // u32 version
        // u32 dtype (0=f32, 1=f16, 2=u8)
        // u32 rows, u32 block_size, u32 has_scale_bias
        // dtype data[rows * block_size]
        // f32 scale_bias[2 * rows] (if has_scale_bias)
        let f = File::open(&path).with_context(|| format!("open table file: {}", path.as_ref().display()))?;
        let mut r = BufReader::new(f);
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic).context("read magic")?;
        if &magic != T_MAGIC { bail!("bad embedding table magic"); }
        let version = read_u32(&mut r, "version")?;
        if version != T_VERSION { bail!("unsupported embedding table version {}", version); }
        let code = read_u32(&mut r, "dtype")?;
        let Some(kind) = ElementKind::from_code(code) else { bail!("unknown table dtype code {}", code) };
        let rows = read_u32(&mut r, "rows")? as usize;
        let block_size = read_u32(&mut r, "block_size")? as usize;
        let has_scale_bias = read_u32(&mut r, "has_scale_bias")? != 0;

        let n = rows.checked_mul(block_size).context("table dimensions overflow")?;
        let data_len = n.checked_mul(kind.size_of()).context("table data size overflow")?;
        let bytes = read_bytes(&mut r, data_len, "table data")?;
        let data = match kind {
            ElementKind::F32 => TableData::F32(bytes.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect()),
            ElementKind::F16 => TableData::F16(bytes.chunks_exact(2).map(|b| f16::from_le_bytes([b[0], b[1]])).collect()),
            ElementKind::U8 => TableData::U8(bytes),
        };
        let scale_bias = if has_scale_bias {
            let sb_len = rows.checked_mul(2 * 4).context("scale_bias size overflow")?;
            let sb = read_bytes(&mut r, sb_len, "scale_bias")?;
            Some(sb.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect())
        } else {
            None
        };
        debug!("loaded {} table {}x{} from {}", kind.label(), rows, block_size, path.as_ref().display());
        Ok(Self { rows, block_size, data, scale_bias })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let f = File::create(&path).with_context(|| format!("create table file: {}", path.as_ref().display()))?;
        let mut w = BufWriter::new(f);
        let rows = u32::try_from(self.rows).context("rows exceed u32")?;
        let block = u32::try_from(self.block_size).context("block_size exceeds u32")?;
        w.write_all(T_MAGIC)?;
        for v in [T_VERSION, self.kind() as u32, rows, block, self.scale_bias.is_some() as u32] {
            w.write_all(&v.to_le_bytes())?;
        }
        match &self.data {
            TableData::F32(v) => for x in v { w.write_all(&x.to_le_bytes())?; },
            TableData::F16(v) => for x in v { w.write_all(&x.to_le_bytes())?; },
            TableData::U8(v) => w.write_all(v)?,
        }
        if let Some(sb) = &self.scale_bias {
            for x in sb { w.write_all(&x.to_le_bytes())?; }
        }
        w.flush().context("flush table file")?;
        Ok(())
    }

    /// Reduce the bags described by `indices`/`lengths` into `out`.
    ///
    /// `tier` of `None` uses the dispatcher's choice.
    pub fn lookup_into(
        &self,
        indices: &[i64],
        lengths: &[i32],
        weights: Option<&[f32]>,
        normalize: bool,
        tier: Option<KernelTier>,
        out: &mut [f32],
    ) -> std::result::Result<(), LookupError> {
        match &self.data {
            TableData::F32(v) => self.run(v, indices, lengths, weights, normalize, tier, out),
            TableData::F16(v) => self.run(v, indices, lengths, weights, normalize, tier, out),
            TableData::U8(v) => self.run(v, indices, lengths, weights, normalize, tier, out),
        }
    }

    pub fn lookup(
        &self,
        indices: &[i64],
        lengths: &[i32],
        weights: Option<&[f32]>,
        normalize: bool,
        tier: Option<KernelTier>,
    ) -> std::result::Result<Vec<f32>, LookupError> {
        let mut out = vec![0f32; lengths.len() * self.block_size];
        self.lookup_into(indices, lengths, weights, normalize, tier, &mut out)?;
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn run<E: Element>(
        &self,
        input: &[E],
        indices: &[i64],
        lengths: &[i32],
        weights: Option<&[f32]>,
        normalize: bool,
        tier: Option<KernelTier>,
        out: &mut [f32],
    ) -> std::result::Result<(), LookupError> {
        let mut args = Lookup::new(self.block_size, input, indices, lengths)
            .with_data_size(self.rows)
            .normalized(normalize);
        args.weights = weights;
        args.scale_bias = self.scale_bias.as_deref();
        match tier {
            Some(t) => args.run_with(t, out),
            None => args.run(out),
        }
    }
}

fn read_u32<R: Read>(r: &mut R, what: &str) -> Result<u32> {
    let mut b4 = [0u8; 4];
    r.read_exact(&mut b4).with_context(|| format!("read {}", what))?;
    Ok(u32::from_le_bytes(b4))
}

fn read_bytes<R: Read>(r: &mut R, n: usize, what: &str) -> Result<Vec<u8>> {
    // Strict: a short payload would shift every later row.
    // Buffer grows with the bytes present, not with the header's claim.
    let mut buf = Vec::new();
    let got = r.by_ref().take(n as u64).read_to_end(&mut buf).with_context(|| format!("read {} ({} bytes)", what, n))?;
    if got != n {
        bail!("read {} ({} bytes): file ends after {} bytes", what, n, got);
    }
    Ok(buf)
}

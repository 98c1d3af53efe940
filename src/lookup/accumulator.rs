//! Weighted-row accumulate primitives: `out += w * row` for each table element type.
//!
//! The reduction engines only ever see rows through [`Element::axpy`] (or its
//! AVX2 twin), so widening and dequantization of narrow storage happen here.

use half::f16;
use serde::{Deserialize, Serialize};

use super::dispatch::CpuFeatures;

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for half::f16 {}
    impl Sealed for u8 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
}

/// Storage type of an embedding table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    F32 = 0,
    F16 = 1,
    U8 = 2,
}

impl ElementKind {
    pub const fn label(self) -> &'static str {
        match self {
            ElementKind::F32 => "f32",
            ElementKind::F16 => "f16",
            ElementKind::U8 => "u8",
        }
    }

    pub const fn size_of(self) -> usize {
        match self {
            ElementKind::F32 => 4,
            ElementKind::F16 => 2,
            ElementKind::U8 => 1,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(ElementKind::F32),
            1 => Some(ElementKind::F16),
            2 => Some(ElementKind::U8),
            _ => None,
        }
    }
}

impl std::str::FromStr for ElementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "f32" | "float" | "float32" => Ok(ElementKind::F32),
            "f16" | "half" | "float16" => Ok(ElementKind::F16),
            "u8" | "uint8" => Ok(ElementKind::U8),
            other => Err(format!("unknown element type: {other}")),
        }
    }
}

/// Table element type. Output accumulation is always `f32`.
pub trait Element: sealed::Sealed + Copy + Send + Sync + 'static {
    const KIND: ElementKind;

    fn to_f32(self) -> f32;

    /// Scalar reference: `out[i] += w * row[i]`.
    #[inline]
    fn axpy(w: f32, row: &[Self], out: &mut [f32]) {
        for (o, &x) in out.iter_mut().zip(row) {
            *o += w * x.to_f32();
        }
    }

    /// Whether the AVX2 row kernel for this type may run on `caps`.
    fn avx2_ready(caps: &CpuFeatures) -> bool {
        caps.avx2 && caps.fma
    }

    /// # Safety
    /// Caller must have checked [`Element::avx2_ready`] on the running CPU.
    #[cfg(all(target_arch = "x86_64", feature = "simd-avx2"))]
    unsafe fn axpy_avx2(w: f32, row: &[Self], out: &mut [f32]);
}

impl Element for f32 {
    const KIND: ElementKind = ElementKind::F32;

    #[inline]
    fn to_f32(self) -> f32 { self }

    #[cfg(all(target_arch = "x86_64", feature = "simd-avx2"))]
    #[inline]
    unsafe fn axpy_avx2(w: f32, row: &[Self], out: &mut [f32]) {
        super::avx2::axpy_f32(w, row, out)
    }
}

impl Element for f16 {
    const KIND: ElementKind = ElementKind::F16;

    #[inline]
    fn to_f32(self) -> f32 { f32::from(self) }

    fn avx2_ready(caps: &CpuFeatures) -> bool {
        caps.avx2 && caps.fma && caps.f16c
    }

    #[cfg(all(target_arch = "x86_64", feature = "simd-avx2"))]
    #[inline]
    unsafe fn axpy_avx2(w: f32, row: &[Self], out: &mut [f32]) {
        super::avx2::axpy_f16(w, row, out)
    }
}

impl Element for u8 {
    const KIND: ElementKind = ElementKind::U8;

    #[inline]
    fn to_f32(self) -> f32 { self as f32 }

    #[cfg(all(target_arch = "x86_64", feature = "simd-avx2"))]
    #[inline]
    unsafe fn axpy_avx2(w: f32, row: &[Self], out: &mut [f32]) {
        super::avx2::axpy_u8(w, row, out)
    }
}

/// Integer type of the index stream.
pub trait RowIndex: sealed::Sealed + Copy + Send + Sync + 'static {
    fn as_i64(self) -> i64;

    /// The row this entry addresses, if it lies in `[0, data_size)`.
    #[inline]
    fn to_row(self, data_size: usize) -> Option<usize> {
        let v = self.as_i64();
        if v >= 0 && (v as u64) < data_size as u64 { Some(v as usize) } else { None }
    }
}

impl RowIndex for i32 {
    #[inline]
    fn as_i64(self) -> i64 { self as i64 }
}

impl RowIndex for i64 {
    #[inline]
    fn as_i64(self) -> i64 { self }
}

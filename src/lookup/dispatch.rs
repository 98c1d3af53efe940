//! Runtime selection of the reduction kernel.
//!
//! The CPU is probed once per process. Each table element type then resolves
//! to the most specialized tier the CPU supports, falling back to the generic
//! engine, and that choice is cached.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use log::{debug, info};

use super::{generic, Element, ElementKind, Lookup, RowIndex};
use crate::error::{LookupError, Result};

/// Environment switch: `0`, `off`, `false`, `disable` or `scalar` pins the generic engine.
pub const SIMD_ENV: &str = "EMBEDBAG_SIMD";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuFeatures {
    pub avx2: bool,
    pub fma: bool,
    pub f16c: bool,
}

impl CpuFeatures {
    #[cfg(target_arch = "x86_64")]
    fn detect() -> Self {
        Self {
            avx2: is_x86_feature_detected!("avx2"),
            fma: is_x86_feature_detected!("fma"),
            f16c: is_x86_feature_detected!("f16c"),
        }
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn detect() -> Self { Self::default() }
}

impl fmt::Display for CpuFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (avx2={}, fma={}, f16c={})", std::env::consts::ARCH, self.avx2, self.fma, self.f16c)
    }
}

static FEATURES: OnceLock<CpuFeatures> = OnceLock::new();

pub fn cpu_features() -> &'static CpuFeatures {
    FEATURES.get_or_init(|| {
        let caps = CpuFeatures::detect();
        debug!("cpu features: {}", caps);
        caps
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimdMode {
    Auto,
    Disable,
}

impl SimdMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "0" | "off" | "false" | "disable" | "scalar" => Some(SimdMode::Disable),
            "1" | "on" | "true" | "auto" => Some(SimdMode::Auto),
            _ => None,
        }
    }
}

static MODE: OnceLock<SimdMode> = OnceLock::new();

pub fn simd_mode() -> SimdMode {
    *MODE.get_or_init(|| match env::var(SIMD_ENV) {
        Ok(v) => SimdMode::parse(&v).unwrap_or_else(|| {
            debug!("ignoring unrecognised {}={:?}", SIMD_ENV, v);
            SimdMode::Auto
        }),
        Err(_) => SimdMode::Auto,
    })
}

/// Implementation tiers, most specialized first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelTier {
    Avx2Fma,
    Generic,
}

impl KernelTier {
    pub const ALL: [KernelTier; 2] = [KernelTier::Avx2Fma, KernelTier::Generic];

    pub const fn label(self) -> &'static str {
        match self {
            KernelTier::Avx2Fma => "avx2-fma",
            KernelTier::Generic => "generic",
        }
    }

    /// Whether this tier has a kernel for `E` that can run on `caps`.
    pub fn supports<E: Element>(self, caps: &CpuFeatures) -> bool {
        match self {
            KernelTier::Generic => true,
            KernelTier::Avx2Fma => cfg!(all(target_arch = "x86_64", feature = "simd-avx2")) && E::avx2_ready(caps),
        }
    }
}

impl fmt::Display for KernelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.label()) }
}

impl FromStr for KernelTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "avx2" | "avx2-fma" => Ok(KernelTier::Avx2Fma),
            "generic" | "scalar" => Ok(KernelTier::Generic),
            other => Err(format!("unknown kernel tier: {other}")),
        }
    }
}

/// First tier in [`KernelTier::ALL`] that supports `E`, unless SIMD is disabled.
pub fn resolve<E: Element>(mode: SimdMode, caps: &CpuFeatures) -> KernelTier {
    if mode == SimdMode::Disable {
        return KernelTier::Generic;
    }
    KernelTier::ALL
        .into_iter()
        .find(|tier| tier.supports::<E>(caps))
        .unwrap_or(KernelTier::Generic)
}

static SELECTED: [OnceLock<KernelTier>; 3] = [OnceLock::new(), OnceLock::new(), OnceLock::new()];

fn slot(kind: ElementKind) -> &'static OnceLock<KernelTier> {
    match kind {
        ElementKind::F32 => &SELECTED[0],
        ElementKind::F16 => &SELECTED[1],
        ElementKind::U8 => &SELECTED[2],
    }
}

/// Cached tier for tables of `E`.
pub fn select<E: Element>() -> KernelTier {
    *slot(E::KIND).get_or_init(|| {
        let tier = resolve::<E>(simd_mode(), cpu_features());
        info!("embedding lookup over {} rows uses the {} kernel", E::KIND.label(), tier);
        tier
    })
}

/// Run `args` on `tier`, failing if that tier cannot run here.
pub fn run_tier<I: RowIndex, E: Element>(tier: KernelTier, args: &Lookup<'_, I, E>, out: &mut [f32]) -> Result<()> {
    if !tier.supports::<E>(cpu_features()) {
        return Err(LookupError::TierUnavailable { tier: tier.label(), element: E::KIND.label() });
    }
    match tier {
        KernelTier::Generic => generic::reduce(args, out),
        KernelTier::Avx2Fma => run_avx2(args, out),
    }
}

pub fn dispatch<I: RowIndex, E: Element>(args: &Lookup<'_, I, E>, out: &mut [f32]) -> Result<()> {
    run_tier(select::<E>(), args, out)
}

#[cfg(all(target_arch = "x86_64", feature = "simd-avx2"))]
fn run_avx2<I: RowIndex, E: Element>(args: &Lookup<'_, I, E>, out: &mut [f32]) -> Result<()> {
    // Safety: run_tier checked E::avx2_ready against the probed CPU.
    unsafe { super::avx2::reduce(args, out) }
}

#[cfg(not(all(target_arch = "x86_64", feature = "simd-avx2")))]
fn run_avx2<I: RowIndex, E: Element>(_args: &Lookup<'_, I, E>, _out: &mut [f32]) -> Result<()> {
    Err(LookupError::TierUnavailable { tier: KernelTier::Avx2Fma.label(), element: E::KIND.label() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    #[test]
    fn mode_parsing() {
        assert_eq!(SimdMode::parse("OFF"), Some(SimdMode::Disable));
        assert_eq!(SimdMode::parse(" scalar "), Some(SimdMode::Disable));
        assert_eq!(SimdMode::parse("1"), Some(SimdMode::Auto));
        assert_eq!(SimdMode::parse("maybe"), None);
    }

    #[test]
    fn disabled_mode_pins_generic() {
        let caps = CpuFeatures { avx2: true, fma: true, f16c: true };
        assert_eq!(resolve::<f32>(SimdMode::Disable, &caps), KernelTier::Generic);
    }

    #[test]
    fn f16_needs_f16c() {
        let caps = CpuFeatures { avx2: true, fma: true, f16c: false };
        assert_eq!(resolve::<f16>(SimdMode::Auto, &caps), KernelTier::Generic);
        let none = CpuFeatures::default();
        assert_eq!(resolve::<u8>(SimdMode::Auto, &none), KernelTier::Generic);
    }

    #[cfg(all(target_arch = "x86_64", feature = "simd-avx2"))]
    #[test]
    fn full_caps_pick_avx2() {
        let caps = CpuFeatures { avx2: true, fma: true, f16c: true };
        assert_eq!(resolve::<f32>(SimdMode::Auto, &caps), KernelTier::Avx2Fma);
        assert_eq!(resolve::<f16>(SimdMode::Auto, &caps), KernelTier::Avx2Fma);
        assert_eq!(resolve::<u8>(SimdMode::Auto, &caps), KernelTier::Avx2Fma);
    }

    #[test]
    fn tier_names_parse() {
        assert_eq!("avx2".parse::<KernelTier>(), Ok(KernelTier::Avx2Fma));
        assert_eq!("Generic".parse::<KernelTier>(), Ok(KernelTier::Generic));
        assert!("sse".parse::<KernelTier>().is_err());
    }
}

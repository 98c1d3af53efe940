use anyhow::{Context, Result};
use clap::Parser;
use embedbag::lookup::quant::quantize_rowwise;
use embedbag::lookup::table::{EmbeddingTable, TableData};
use embedbag::lookup::{cpu_features, ElementKind, KernelTier};
use half::f16;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "embedbag-bench", version, about = "Benchmark embedding-bag lookup throughput")]
struct Args {
    /// Table rows
    #[arg(long, default_value_t = 1_000_000)]
    rows: usize,

    /// Embedding dimension (block size)
    #[arg(long, default_value_t = 64)]
    dim: usize,

    /// Bags per lookup call
    #[arg(long, default_value_t = 1024)]
    bags: usize,

    /// Indices per bag
    #[arg(long, default_value_t = 32)]
    pooling: usize,

    /// Table element type: f32, f16 or u8 (row-wise quantized)
    #[arg(long, default_value = "f32")]
    dtype: ElementKind,

    /// Lookup calls to run
    #[arg(long, default_value_t = 200)]
    iters: usize,

    /// Threads; each runs independent calls into its own output buffer
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Kernel tier to force (avx2, generic)
    #[arg(long)]
    tier: Option<KernelTier>,

    /// Mean pooling instead of sum
    #[arg(long, default_value_t = false)]
    normalize: bool,

    #[arg(long, default_value_t = 0x5EED)]
    seed: u64,
}

fn random_table(rng: &mut SmallRng, kind: ElementKind, rows: usize, dim: usize) -> Result<EmbeddingTable> {
    let values: Vec<f32> = (0..rows * dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    let table = match kind {
        ElementKind::F32 => EmbeddingTable::new(dim, TableData::F32(values))?,
        ElementKind::F16 => EmbeddingTable::new(dim, TableData::F16(values.into_iter().map(f16::from_f32).collect()))?,
        ElementKind::U8 => EmbeddingTable::from_quant(quantize_rowwise(&values, dim)?),
    };
    Ok(table)
}

/// Every bag holds `pooling` indices.
fn bag_lengths(bags: usize, pooling: usize) -> Result<Vec<i32>> {
    Ok(vec![i32::try_from(pooling).context("pooling exceeds i32")?; bags])
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    println!("cpu: {}", cpu_features());
    let mut rng = SmallRng::seed_from_u64(args.seed);
    let table = random_table(&mut rng, args.dtype, args.rows.max(1), args.dim)?;
    let n = args.bags.checked_mul(args.pooling).context("bags * pooling overflows")?;
    let indices: Vec<i64> = (0..n).map(|_| rng.gen_range(0..table.rows as i64)).collect();
    let lengths = bag_lengths(args.bags, args.pooling)?;
    let weights: Vec<f32> = (0..n).map(|_| rng.gen_range(0.0f32..1.0)).collect();

    let pool = rayon::ThreadPoolBuilder::new().num_threads(args.threads.max(1)).build().context("thread pool")?;
    let t0 = Instant::now();
    pool.install(|| {
        (0..args.iters).into_par_iter().try_for_each_init(
            || vec![0f32; args.bags * args.dim],
            |out, _| table.lookup_into(&indices, &lengths, Some(&weights), args.normalize, args.tier, out),
        )
    })?;
    let dt = t0.elapsed().as_secs_f64();
    let calls = args.iters as f64;
    let bytes = calls * n as f64 * args.dim as f64 * args.dtype.size_of() as f64;
    let rate = |x: f64| if dt > 0.0 { x / dt } else { 0.0 };
    println!(
        "dtype={} tier={} calls={} elapsed={:.3}s lookups/s={:.1} rows/s={:.3e} GB/s={:.2}",
        args.dtype.label(),
        args.tier.map_or_else(|| "auto".to_string(), |t| t.to_string()),
        args.iters,
        dt,
        rate(calls),
        rate(calls * n as f64),
        rate(bytes) / 1e9,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::bag_lengths;

    #[test]
    fn bag_lengths_reject_pooling_past_i32() {
        assert_eq!(bag_lengths(3, 32).unwrap(), vec![32, 32, 32]);
        assert!(bag_lengths(1, i32::MAX as usize + 1).is_err());
    }
}

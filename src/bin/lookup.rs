use anyhow::Result;
use clap::Parser;
use embedbag::lookup::case::LookupCase;
use embedbag::lookup::table::EmbeddingTable;
use embedbag::lookup::{dispatch, Element, ElementKind, KernelTier};
use half::f16;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "embedbag-lookup", version, about = "Reduce bags of table rows described by a JSON case file")]
struct Args {
    /// Embedding table file (EMBTBL01)
    #[arg(long)]
    table: PathBuf,

    /// JSON case: {"indices": [..], "lengths": [..], "weights": [..], "normalize": bool}
    #[arg(long)]
    case: PathBuf,

    /// Kernel tier to force (avx2, generic); default picks the best for this CPU
    #[arg(long)]
    tier: Option<KernelTier>,

    /// Pretty-print the JSON output
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[derive(Serialize)]
struct Report {
    dtype: ElementKind,
    tier: String,
    block_size: usize,
    output: Vec<Vec<f32>>,
}

fn default_tier(kind: ElementKind) -> KernelTier {
    fn pick<E: Element>() -> KernelTier { dispatch::select::<E>() }
    match kind {
        ElementKind::F32 => pick::<f32>(),
        ElementKind::F16 => pick::<f16>(),
        ElementKind::U8 => pick::<u8>(),
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let table = EmbeddingTable::load(&args.table)?;
    let case = LookupCase::from_path(&args.case)?;
    let tier = args.tier.unwrap_or_else(|| default_tier(table.kind()));
    let output = case.run(&table, Some(tier))?;
    let report = Report { dtype: table.kind(), tier: tier.to_string(), block_size: table.block_size, output };
    let text = if args.pretty { serde_json::to_string_pretty(&report)? } else { serde_json::to_string(&report)? };
    println!("{}", text);
    Ok(())
}

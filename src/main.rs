//! kv-cache-bridge benchmark driver.
//!
//! Runs the compress+transform path over synthetic workloads for a chosen
//! model family and reports timings and the final quality report.

use clap::Parser;
use tracing::info;

use kv_cache_bridge::benchmark::benchmark;
use kv_cache_bridge::config::{Cli, Config};
use kv_cache_bridge::registry;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "kv_cache_bridge=debug"
    } else {
        "kv_cache_bridge=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("kv-cache-bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&cli.config)?;
    info!(
        threshold_override = ?config.compression.attention_threshold,
        min_tokens = config.compression.min_tokens,
        chunk_size = config.streaming.chunk_size,
        "Configuration loaded"
    );

    let pattern = registry::lookup(&cli.model);
    info!(
        model = cli.model,
        family = pattern.model_family,
        attention = %pattern.attention,
        recommended_threshold = pattern.recommended_threshold,
        "Resolved model adapter"
    );

    let summary = benchmark(&cli.model, cli.tokens, cli.dimension, cli.iterations)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!(
            mean_compression_micros = summary.mean_compression_micros,
            mean_projection_micros = summary.mean_projection_micros,
            decompression_micros = summary.decompression_micros,
            mean_compression_ratio = summary.mean_compression_ratio,
            passed = summary.final_report.passed,
            "Benchmark complete"
        );
        for warning in &summary.final_report.warnings {
            info!(warning = %warning, "Quality warning");
        }
    }

    Ok(())
}

use std::error::Error;
use std::time::Instant;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use oracle_shmem::{CacheConfig, QuoteTable};

#[derive(clap::Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "oracle-bench.toml")]
    config: String,
    #[clap(short = 'n', long = "ops", default_value = "10000000")]
    ops: usize,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts: Opts = Opts::parse();
    let cfg = CacheConfig::load(&opts.config)?;
    info!("{:?}", cfg);
    let table = &mut QuoteTable::from_config(&cfg)?;
    table.clear()?;
    run(table, opts.ops)?;
    table.close()?;
    Ok(())
}

fn run(table: &mut QuoteTable, ops: usize) -> Result<(), Box<dyn Error>> {
    let tickers: Vec<String> = (0..table.capacity()).map(|i| format!("T:{}", i)).collect();
    if tickers.is_empty() {
        return Err("capacity must be positive".into());
    }

    let start = Instant::now();
    let mut called = 0usize;
    while called < ops {
        let ticker = &tickers[called % tickers.len()];
        if !table.put(ticker, called as u64)? {
            return Err(format!("table rejected {}", ticker).into());
        }
        if called % 1_000_000 == 0 {
            eprint!("\rTotal {} ops (len: {})", called, table.len()?);
        }
        called += 1;
    }

    let duration = start.elapsed();
    let iops = (called as f64) / duration.as_secs_f64();
    println!(
        "\n{:#?}K puts/s. Total time: {:#?}",
        (iops / 1000f64) as u64,
        duration
    );
    Ok(())
}

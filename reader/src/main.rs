use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use serde_derive::{Deserialize, Serialize};
use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;
use tracing_subscriber::EnvFilter;

use oracle_shmem::{CacheConfig, QuoteTable};

#[derive(clap::Parser)]
#[clap(about = "Looks up ticker prices in the shared quote table")]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "oracle-reader.toml")]
    config: String,
    /// Print every record as `key -> price`.
    #[clap(long)]
    dump: bool,
    /// Poll the tickers every MS milliseconds until interrupted.
    #[clap(long, value_name = "MS")]
    watch: Option<u64>,
    tickers: Vec<String>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ReaderConfig {
    cache: CacheConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let opts: Opts = Opts::parse();
    let cfg: ReaderConfig = confy::load_path(&opts.config)?;
    // Readers never create the segment, a missing writer is an error.
    let mut table = QuoteTable::open(&cfg.cache.name, cfg.cache.capacity)?;

    if opts.dump {
        println!(
            "{} ({}/{}): {}",
            table.name(),
            table.len()?,
            table.capacity(),
            table
        );
    }

    match opts.watch {
        Some(interval) => {
            let closing = on_signal()?;
            while !closing.load(Ordering::Relaxed) {
                print_quotes(&table, &opts.tickers)?;
                thread::sleep(Duration::from_millis(interval));
            }
        }
        None => print_quotes(&table, &opts.tickers)?,
    }

    table.close()?;
    Ok(())
}

fn on_signal() -> Result<Arc<AtomicBool>, Box<dyn Error>> {
    let closing = Arc::new(AtomicBool::new(false));
    let mut signals = Signals::new(&[SIGHUP, SIGINT, SIGQUIT, SIGTERM])?;
    let flag = closing.clone();
    thread::spawn(move || {
        for signal in signals.forever() {
            info!("received signal {}, closing", signal);
            flag.store(true, Ordering::SeqCst);
        }
    });
    Ok(closing)
}

fn print_quotes(table: &QuoteTable, tickers: &[String]) -> Result<(), Box<dyn Error>> {
    for ticker in tickers {
        match table.get(ticker)? {
            Some(price) => println!("{} {}", ticker, price),
            None => println!("{} -", ticker),
        }
    }
    Ok(())
}

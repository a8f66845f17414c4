use std::error::Error;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use serde_derive::{Deserialize, Serialize};
use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use oracle_shmem::{CacheConfig, CacheError, QuoteTable, WriterLock};

#[derive(clap::Parser)]
#[clap(
    about = "Publishes ticker prices into the shared quote table",
    long_about = "Publishes ticker prices into the shared quote table.\n\n\
                  The first writer to run creates the table and removes it again \
                  when it exits, together with the quotes it published. Run that \
                  writer with --hold to keep the table readable."
)]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "oracle-writer.toml")]
    config: String,
    /// Empty the table before publishing.
    #[clap(long)]
    clear: bool,
    /// Serialise puts through the cross-process writer lock.
    #[clap(long)]
    lock: bool,
    /// Keep running until SIGINT/SIGTERM. Without it, a writer that created the
    /// table unlinks it on exit and readers find nothing.
    #[clap(long)]
    hold: bool,
    /// Quotes to publish. Lines of `TICKER PRICE` are read from stdin when empty.
    #[clap(value_name = "TICKER=PRICE")]
    quotes: Vec<String>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct WriterConfig {
    cache: CacheConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let opts: Opts = Opts::parse();
    let cfg: WriterConfig = confy::load_path(&opts.config)?;
    info!("{:?}", &cfg.cache);

    let closing = on_signal()?;
    let mut table = QuoteTable::from_config(&cfg.cache)?;
    let mut lock = if opts.lock {
        Some(WriterLock::open_or_create(&cfg.cache.name)?)
    } else {
        None
    };
    if opts.clear {
        table.clear()?;
    }

    let published = if opts.quotes.is_empty() {
        run_stdin(&mut table, lock.as_ref(), &closing)?
    } else {
        let mut count = 0;
        for quote in opts.quotes.iter() {
            let (ticker, price) = parse_quote(quote)?;
            if publish(&mut table, lock.as_ref(), &ticker, price)? {
                count += 1;
            }
        }
        count
    };
    info!(
        "published {} quotes, table holds {}/{}",
        published,
        table.len()?,
        table.capacity()
    );

    if opts.hold {
        if !table.is_creator() {
            warn!("--hold has no effect on an attached table, segment belongs to another process");
        }
        while !closing.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(100));
        }
    }

    if let Some(lock) = lock.as_mut() {
        lock.close()?;
        // The lock goes with the table; later writers start a fresh pair.
        if table.is_creator() {
            WriterLock::remove(&cfg.cache.name)?;
        }
    }
    table.close()?;
    Ok(())
}

/// Flag raised when the process is asked to stop.
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

fn run_stdin(
    table: &mut QuoteTable,
    lock: Option<&WriterLock>,
    closing: &AtomicBool,
) -> Result<usize, Box<dyn Error>> {
    let mut count = 0;
    for line in io::stdin().lock().lines() {
        if closing.load(Ordering::Relaxed) {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_quote(&line) {
            Ok((ticker, price)) => {
                if publish(table, lock, &ticker, price)? {
                    count += 1;
                }
            }
            Err(e) => warn!("skipping line {:?}: {}", line, e),
        }
    }
    Ok(count)
}

fn publish(
    table: &mut QuoteTable,
    lock: Option<&WriterLock>,
    ticker: &str,
    price: u64,
) -> Result<bool, CacheError> {
    let stored = match lock {
        Some(lock) => lock.write(|| table.put(ticker, price))??,
        None => table.put(ticker, price)?,
    };
    if !stored {
        warn!("table is full, dropped {}", ticker);
    }
    Ok(stored)
}

/// Parses `TICKER=PRICE` or `TICKER PRICE`.
fn parse_quote(quote: &str) -> Result<(String, u64), String> {
    let quote = quote.trim();
    let mut parts = quote.splitn(2, |c: char| c == '=' || c.is_whitespace());
    let ticker = parts.next().unwrap_or("");
    let price = parts
        .next()
        .ok_or_else(|| format!("expected TICKER=PRICE, got {:?}", quote))?
        .trim();
    if ticker.is_empty() {
        return Err(format!("missing ticker in {:?}", quote));
    }
    let price = price
        .parse::<u64>()
        .map_err(|e| format!("invalid price {:?}: {}", price, e))?;
    Ok((ticker.to_string(), price))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quote_accepts_both_forms() {
        assert_eq!(parse_quote("BTCUSD=8000"), Ok(("BTCUSD".to_string(), 8000)));
        assert_eq!(parse_quote("  USDRUB   70 "), Ok(("USDRUB".to_string(), 70)));
    }

    #[test]
    fn parse_quote_rejects_garbage() {
        assert!(parse_quote("BTCUSD").is_err());
        assert!(parse_quote("=10").is_err());
        assert!(parse_quote("BTCUSD=abc").is_err());
        assert!(parse_quote("BTCUSD=-1").is_err());
    }

    #[test]
    fn help_warns_that_the_creator_removes_the_table() {
        use clap::CommandFactory;

        let mut help = Vec::new();
        Opts::command()
            .write_long_help(&mut help)
            .expect("render help");
        let help = String::from_utf8(help).expect("utf-8 help");
        // Undo line wrapping.
        let help = help.split_whitespace().collect::<Vec<_>>().join(" ");
        assert!(help.contains("removes it again when it exits"));
        assert!(help.contains("unlinks it on exit"));
    }
}

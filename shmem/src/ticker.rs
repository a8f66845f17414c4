use std::fmt;
use std::hash::Hasher;

use twox_hash::XxHash64;

/// Turns a lowercased ticker into the 64-bit search key.
///
/// Keys are compared across processes, so implementations must be
/// deterministic and must not use per-process seeds.
pub trait KeyHasher {
    fn hash_ticker(lowercase_ticker: &str) -> u64;
}

/// XXH64 with seed 0, matching the xxhash used by the Go writers of this layout.
pub struct XxKeyHasher;

impl KeyHasher for XxKeyHasher {
    #[inline]
    fn hash_ticker(lowercase_ticker: &str) -> u64 {
        let mut hash = XxHash64::with_seed(0);
        hash.write(lowercase_ticker.as_bytes());
        hash.finish()
    }
}

/// Ticker hash as stored in a record.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialOrd, PartialEq, Hash)]
pub struct TickerKey(pub u64);

impl TickerKey {
    /// Key for `ticker`, case-insensitive for ASCII letters only.
    ///
    /// Non-ASCII characters are hashed as given, so `"ÄUSD"` and `"äusd"`
    /// are different tickers. Writers in other languages that fold Unicode
    /// case agree with these keys only for ASCII tickers.
    pub fn new(ticker: &str) -> TickerKey {
        TickerKey::with_hasher::<XxKeyHasher>(ticker)
    }

    pub fn with_hasher<H: KeyHasher>(ticker: &str) -> TickerKey {
        TickerKey(H::hash_ticker(&ticker.to_ascii_lowercase()))
    }
}

impl fmt::Display for TickerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_case() {
        assert_eq!(TickerKey::new("BTCUSD"), TickerKey::new("btcusd"));
        assert_eq!(TickerKey::new("BTCUSD"), TickerKey::new("BtCuSd"));
        assert_ne!(TickerKey::new("BTCUSD"), TickerKey::new("USDRUB"));
    }

    #[test]
    fn case_folding_is_ascii_only() {
        assert_eq!(TickerKey::new("ÄUSD"), TickerKey::new("Äusd"));
        assert_ne!(TickerKey::new("ÄUSD"), TickerKey::new("äusd"));
        assert_eq!(TickerKey::new("ÄUSD").0, XxKeyHasher::hash_ticker("Äusd"));
    }

    #[test]
    fn key_is_plain_xxh64() {
        // Reference value of XXH64("", seed = 0).
        assert_eq!(XxKeyHasher::hash_ticker(""), 0xEF46_DB37_51D8_E999);
        assert_eq!(TickerKey::new("").0, 0xEF46_DB37_51D8_E999);
    }

    #[test]
    fn custom_hasher_is_fed_lowercase() {
        struct LenHasher;
        impl KeyHasher for LenHasher {
            fn hash_ticker(lowercase_ticker: &str) -> u64 {
                assert_eq!(lowercase_ticker, lowercase_ticker.to_ascii_lowercase());
                lowercase_ticker.len() as u64
            }
        }
        assert_eq!(TickerKey::with_hasher::<LenHasher>("ETHUSD"), TickerKey(6));
    }
}

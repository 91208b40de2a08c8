// Durable state: atomic JSON state file + append-only CSV trade ledger
pub mod ledger;
pub mod state_store;

pub use ledger::TradeLedger;
pub use state_store::{LoadedState, StateStore};

/// File-name safe form of a symbol (XLM/USDT -> XLMUSDT)
fn file_key(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

// =============================================================================
// Signals Module
// =============================================================================
//
// Everything derived from the raw indicators:
// - MACD / signal-line crossover flags
// - The per-key indicator bundle the cache stores
// - Latest-value snapshot for the read API

pub mod bundle;
pub mod crossover;
pub mod snapshot;

pub use bundle::SeriesBundle;
pub use snapshot::MarketSnapshot;

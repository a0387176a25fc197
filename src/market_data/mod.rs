pub mod price_history;
pub mod tick;

pub use price_history::PriceHistory;
pub use tick::{parse_market_message, TickBatch};

pub mod candle_buffer;
pub mod ticker;

pub use candle_buffer::{Candle, CandleBuffer, CandleKey};
pub use ticker::{Ticker, TickerCache};

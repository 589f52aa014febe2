pub mod exchange;
pub mod logger;

pub use exchange::{Exchange, Metadata, Role};
pub use logger::{ChatHistoryLogger, HistoryError};

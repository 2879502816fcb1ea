// Utils module - Utility functions

pub mod line_reader;
pub mod network;
pub mod proxy;

pub use line_reader::{LineReader, NumericLine, NumericResponse};
pub use proxy::ProxyConfig;

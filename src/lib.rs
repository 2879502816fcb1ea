// certsentry - X.509 certificate expiry and hash checker
// Copyright (C) 2025 certsentry contributors
// Licensed under GPL-3.0

pub mod certificates;
pub mod cli;
pub mod error;
pub mod monitor;
pub mod starttls;
pub mod utils;

pub use cli::Args;
pub use error::{Error, Result, RetrievalError, VerificationError};

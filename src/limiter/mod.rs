//! Token limiters: rate parameters, the emission actor and its handle.

mod actor;
mod config;
mod handle;

pub use actor::{LimiterState, Token, TokenLimiter};
pub use config::{LimiterConfig, LimiterDefinition};
pub use handle::{Acquisition, LimiterHandle};

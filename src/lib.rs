pub mod canonical;
pub mod citations;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod mapping;
pub mod metrics;
pub mod partition;
pub mod ranking;
pub mod source;
pub mod store;
pub mod types;
pub mod util;

pub use error::BrandscopeError;
pub use types::*;

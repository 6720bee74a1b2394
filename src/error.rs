use std::fmt;

/// Typed error for brandscope library operations.
#[derive(Debug)]
pub enum BrandscopeError {
    /// Rejected before computation (bad scope name, inverted date range, bad batch size)
    Validation(String),
    /// No qualifying responses exist yet for the requested run/date range
    NoData(String),
    /// SQLite errors from the aggregate store
    Store(String),
    /// Parsing errors (JSON payloads, TOML config)
    Parse(String),
    /// Configuration errors (missing dirs, unusable paths)
    Config(String),
    /// IO errors (file read/write)
    Io(std::io::Error),
}

impl BrandscopeError {
    /// True when the error only means "nothing ingested yet" rather than a fault.
    pub fn is_no_data(&self) -> bool {
        matches!(self, BrandscopeError::NoData(_))
    }
}

impl fmt::Display for BrandscopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrandscopeError::Validation(msg) => write!(f, "validation error: {}", msg),
            BrandscopeError::NoData(msg) => write!(f, "no data yet: {}", msg),
            BrandscopeError::Store(msg) => write!(f, "store error: {}", msg),
            BrandscopeError::Parse(msg) => write!(f, "parse error: {}", msg),
            BrandscopeError::Config(msg) => write!(f, "config error: {}", msg),
            BrandscopeError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for BrandscopeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BrandscopeError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BrandscopeError {
    fn from(err: std::io::Error) -> Self {
        BrandscopeError::Io(err)
    }
}

impl From<serde_json::Error> for BrandscopeError {
    fn from(err: serde_json::Error) -> Self {
        BrandscopeError::Parse(err.to_string())
    }
}

impl From<rusqlite::Error> for BrandscopeError {
    fn from(err: rusqlite::Error) -> Self {
        BrandscopeError::Store(err.to_string())
    }
}

impl From<toml::de::Error> for BrandscopeError {
    fn from(err: toml::de::Error) -> Self {
        BrandscopeError::Parse(format!("config: {}", err))
    }
}

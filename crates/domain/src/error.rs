use thiserror::Error;

/// Errors raised by a driver's `connect`/`disconnect`/`read`/`write`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("read timed out")]
    Timeout,

    #[error("write error: {0}")]
    Write(String),

    #[error("write not supported by this driver")]
    UnsupportedWrite,

    #[error("invalid driver configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised by the formula engine.
///
/// `DivisionByZero` is kept distinct from `Runtime` since callers must be
/// able to tell the two apart.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("invalid formula: {0}")]
    Invalid(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("type error: {0}")]
    Type(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;
pub type FormulaResult<T> = std::result::Result<T, FormulaError>;

//!
//! # Nets Result and Error Types
//!

/// # [NetsError] Result Type
pub type NetsResult<T> = Result<T, NetsError>;

///
/// # Nets Error Enumeration
///
pub enum NetsError {
    /// Build cancelled through its progress sink
    Cancelled,
    /// Invalid hierarchy, e.g. a cell-instantiation cycle
    Hierarchy(String),
    /// Boxed External Errors
    Boxed(Box<dyn std::error::Error + Send + Sync>),
    /// Uncategorized Error, with String Message
    Str(String),
}
impl NetsError {
    /// Create a [NetsError::Str] from anything String-convertible
    pub fn msg(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }
    /// Create an error-variant [Result] of our [NetsError::Str] variant from anything String-convertible
    pub fn fail<T>(s: impl Into<String>) -> Result<T, Self> {
        Err(Self::msg(s))
    }
}
impl std::fmt::Debug for NetsError {
    /// Display a [NetsError]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            NetsError::Cancelled => write!(f, "Build Cancelled"),
            NetsError::Hierarchy(msg) => write!(f, "Hierarchy Error: {}", msg),
            NetsError::Boxed(err) => err.fmt(f),
            NetsError::Str(err) => err.fmt(f),
        }
    }
}
impl std::fmt::Display for NetsError {
    /// Display a [NetsError]
    /// Delegates to the [Debug] implementation
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
impl std::error::Error for NetsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Boxed(e) => Some(&**e),
            _ => None,
        }
    }
}

impl From<String> for NetsError {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}
impl From<&str> for NetsError {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}
impl From<std::num::TryFromIntError> for NetsError {
    fn from(e: std::num::TryFromIntError) -> Self {
        Self::Boxed(Box::new(e))
    }
}

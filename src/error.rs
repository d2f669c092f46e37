use std::error::Error as StdError;

/// Error type user marshal hooks return.
pub type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("json: unsupported type: {type_name}")]
    UnsupportedType { type_name: &'static str },
    #[error("json: unsupported value: {message}")]
    UnsupportedValue { message: String },
    #[error("json: unsupported value: {}", float_repr(.value))]
    UnsupportedFloat { value: f64 },
    #[error("json: error calling {method} for type {type_name}: {source}")]
    Marshaler {
        type_name: &'static str,
        method: &'static str,
        source: BoxError,
    },
    #[error("json: invalid UTF-8 in string at byte {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("json: invalid number literal {literal:?}")]
    InvalidNumber { literal: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Stable classification of [`EncodeError`], one per boundary error name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedType,
    UnsupportedValue,
    UnsupportedFloat,
    Marshaler,
    InvalidUtf8,
    InvalidNumber,
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::UnsupportedType => "unsupported-type",
            ErrorKind::UnsupportedValue => "unsupported-value",
            ErrorKind::UnsupportedFloat => "unsupported-float",
            ErrorKind::Marshaler => "marshaler-error",
            ErrorKind::InvalidUtf8 => "invalid-utf8",
            ErrorKind::InvalidNumber => "invalid-number",
            ErrorKind::Io => "io",
        }
    }
}

impl EncodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EncodeError::UnsupportedType { .. } => ErrorKind::UnsupportedType,
            EncodeError::UnsupportedValue { .. } => ErrorKind::UnsupportedValue,
            EncodeError::UnsupportedFloat { .. } => ErrorKind::UnsupportedFloat,
            EncodeError::Marshaler { .. } => ErrorKind::Marshaler,
            EncodeError::InvalidUtf8 { .. } => ErrorKind::InvalidUtf8,
            EncodeError::InvalidNumber { .. } => ErrorKind::InvalidNumber,
            EncodeError::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn cycle(type_name: &str) -> Self {
        EncodeError::UnsupportedValue {
            message: format!("encountered a cycle via {type_name}"),
        }
    }
}

/// Raised when a `MarshalJson` hook returns bytes that are not a JSON value.
#[derive(Debug, thiserror::Error)]
#[error("invalid JSON at line {line} column {column}: {reason}")]
pub struct InvalidJson {
    pub line: usize,
    pub column: usize,
    pub reason: String,
}

fn float_repr(v: &f64) -> &'static str {
    if v.is_nan() {
        "NaN"
    } else if v.is_sign_negative() {
        "-Inf"
    } else {
        "+Inf"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_error_names_the_value() {
        let err = EncodeError::UnsupportedFloat { value: f64::NEG_INFINITY };
        assert_eq!(err.to_string(), "json: unsupported value: -Inf");
        let err = EncodeError::UnsupportedFloat { value: f64::NAN };
        assert_eq!(err.to_string(), "json: unsupported value: NaN");
        assert_eq!(err.kind().as_str(), "unsupported-float");
    }

    #[test]
    fn marshaler_error_keeps_source() {
        let err = EncodeError::Marshaler {
            type_name: "Token",
            method: "MarshalJson",
            source: "boom".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Marshaler);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn io_errors_convert() {
        let err: EncodeError = std::io::Error::other("disk full").into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.to_string(), "disk full");
    }
}

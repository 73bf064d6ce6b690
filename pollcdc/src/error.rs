use std::error;
use std::fmt;

use pollcdc_config::shared::ValidationError;

/// Result type of every fallible pollcdc operation.
pub type CdcResult<T> = Result<T, CdcError>;

/// Main error type of the polling engine.
///
/// A [`CdcError`] is either a single error with a kind and a static description, optionally
/// carrying a dynamic detail, or an aggregation of many errors.
#[derive(Debug, Clone)]
pub struct CdcError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    Many(Vec<CdcError>),
}

/// Categories of errors, grouped by the component which raises them.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Source
    SourceConnectionFailed,
    SourceQueryFailed,
    SourceTimeout,
    SourceSchemaError,

    // Sink
    DestinationConnectionFailed,
    DestinationQueryFailed,
    DestinationTableMissing,
    DestinationError,

    // State store
    StateStoreFailed,

    // Data
    ConversionError,
    InvalidData,

    // Configuration
    ConfigError,

    // IO & serialization
    IoError,
    SerializationError,
    DeserializationError,

    // Security
    AuthenticationError,
    PermissionDenied,

    // State & workflow
    InvalidState,
    PollWorkerPanic,

    Unknown,

    /// Raised by an activated failpoint.
    #[cfg(feature = "failpoints")]
    FailpointTriggered,
}

impl CdcError {
    /// Creates a [`CdcError`] aggregating `errors`.
    pub fn many(errors: Vec<CdcError>) -> CdcError {
        CdcError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors this is the kind of the first one, or [`ErrorKind::Unknown`] when
    /// there are none.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error, flattening aggregations.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the detail of the error, or of the first aggregated error which has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }
}

impl PartialEq for CdcError {
    fn eq(&self, other: &CdcError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for CdcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;
                f.write_str(" -> ")?;
                detail.fmt(f)
            }
            ErrorRepr::Many(ref errors) => {
                if errors.is_empty() {
                    write!(f, "Multiple errors occurred (empty)")?;
                } else if errors.len() == 1 {
                    errors[0].fmt(f)?;
                } else {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for CdcError {}

impl From<(ErrorKind, &'static str)> for CdcError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> CdcError {
        CdcError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for CdcError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> CdcError {
        CdcError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl<E> From<Vec<E>> for CdcError
where
    E: Into<CdcError>,
{
    fn from(errors: Vec<E>) -> CdcError {
        CdcError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<std::io::Error> for CdcError {
    fn from(err: std::io::Error) -> CdcError {
        CdcError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::IoError,
                "I/O error occurred",
                err.to_string(),
            ),
        }
    }
}

impl From<serde_json::Error> for CdcError {
    fn from(err: serde_json::Error) -> CdcError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        CdcError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

impl From<chrono::ParseError> for CdcError {
    fn from(err: chrono::ParseError) -> CdcError {
        CdcError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::ConversionError,
                "Chrono parse failed",
                err.to_string(),
            ),
        }
    }
}

/// Converts [`sqlx::Error`] into a source error.
///
/// Transport failures map to [`ErrorKind::SourceConnectionFailed`], decoding failures to
/// [`ErrorKind::ConversionError`] and everything else to [`ErrorKind::SourceQueryFailed`].
/// Callers talking to a database other than the source remap the kind.
impl From<sqlx::Error> for CdcError {
    fn from(err: sqlx::Error) -> CdcError {
        let (kind, description) = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => (
                ErrorKind::SourceConnectionFailed,
                "Database connection failed",
            ),
            sqlx::Error::Configuration(_) => (ErrorKind::ConfigError, "Invalid database options"),
            sqlx::Error::ColumnNotFound(_) | sqlx::Error::ColumnIndexOutOfBounds { .. } => (
                ErrorKind::SourceSchemaError,
                "Column missing from the result set",
            ),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                (ErrorKind::ConversionError, "Database value decoding failed")
            }
            _ => (ErrorKind::SourceQueryFailed, "Database operation failed"),
        };

        CdcError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

impl From<ValidationError> for CdcError {
    fn from(err: ValidationError) -> CdcError {
        CdcError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::ConfigError,
                "Invalid pipeline configuration",
                err.to_string(),
            ),
        }
    }
}

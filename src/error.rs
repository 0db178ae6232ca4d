//! Error handling.

use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_smithy_types::byte_stream::error::Error as ByteStreamError;
use std::error::Error;
use strum_macros::Display;
use thiserror::Error;
use tracing::{event, Level};

use crate::models::ChunkCoord;

/// Boxed error used to carry the underlying cause of a failure.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Hyperslab reconstruction error type
///
/// Every failure of a reconstruction call is reported as exactly one of these variants. No
/// partially reconstructed data accompanies an error.
#[derive(Debug, Error)]
pub enum ReconstructionError {
    /// The layout or chunk index violates a structural invariant
    #[error("invalid manifest: {reason}")]
    Manifest {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A declared codec, element layout or filter combination is not implemented
    #[error("unsupported encoding: {encoding}")]
    UnsupportedEncoding { encoding: String },

    /// A byte range could not be retrieved
    #[error("failed to retrieve chunk(s) {coords:?} ({})", .cause.kind)]
    Retrieval {
        coords: Vec<ChunkCoord>,
        #[source]
        cause: RetrievalFailure,
    },

    /// A codec stage failed while decoding a chunk
    #[error("failed to decode chunk {coord:?} ({} stage: {})", .error.codec, .error.kind)]
    Decompression {
        coord: ChunkCoord,
        #[source]
        error: DecodeError,
    },

    /// The requested hyperslab does not fit the array
    #[error("hyperslab out of range{}: {reason}", dimension_suffix(.dimension))]
    OutOfRange {
        dimension: Option<usize>,
        reason: String,
    },
}

fn dimension_suffix(dimension: &Option<usize>) -> String {
    match dimension {
        Some(dimension) => format!(" in dimension {}", dimension),
        None => String::new(),
    }
}

impl ReconstructionError {
    /// Returns a [ReconstructionError::Manifest] with no underlying cause.
    pub fn manifest(reason: impl Into<String>) -> Self {
        Self::Manifest {
            reason: reason.into(),
            source: None,
        }
    }

    /// Returns a [ReconstructionError::Manifest] caused by another error.
    pub fn manifest_caused_by<E>(reason: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Manifest {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    /// Returns a [ReconstructionError::UnsupportedEncoding].
    pub fn unsupported(encoding: impl Into<String>) -> Self {
        Self::UnsupportedEncoding {
            encoding: encoding.into(),
        }
    }

    /// Returns a [ReconstructionError::OutOfRange] for a dimension of the hyperslab.
    pub fn out_of_range(dimension: usize, reason: impl Into<String>) -> Self {
        Self::OutOfRange {
            dimension: Some(dimension),
            reason: reason.into(),
        }
    }
}

/// Classification of a failed byte-range retrieval.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum FailureKind {
    /// The request or the whole call exceeded its deadline
    #[strum(serialize = "timeout")]
    Timeout,
    /// The location does not exist
    #[strum(serialize = "not found")]
    NotFound,
    /// Access to the location was refused
    #[strum(serialize = "permission denied")]
    PermissionDenied,
    /// The byte range is not satisfiable
    #[strum(serialize = "invalid range")]
    InvalidRange,
    /// A condition that may succeed if retried (connection reset, 5xx, throttling)
    #[strum(serialize = "transient failure")]
    Transient,
    /// The number of bytes returned differs from the number requested
    #[strum(serialize = "length mismatch")]
    LengthMismatch,
    /// Any other non-transient failure
    #[strum(serialize = "retrieval failure")]
    Other,
}

/// Failure reported by a [RetrievalBackend](crate::retrieval::RetrievalBackend).
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct RetrievalFailure {
    pub kind: FailureKind,
    pub message: String,
    #[source]
    pub source: Option<BoxError>,
}

impl RetrievalFailure {
    /// Returns a new failure with no underlying cause.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach an underlying cause.
    pub fn with_source<E: Into<BoxError>>(mut self, source: E) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, FailureKind::Transient | FailureKind::Timeout)
    }
}

/// Classification of a failed codec stage.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum DecodeFailureKind {
    /// A checksum stage detected corrupt payload bytes
    #[strum(serialize = "corrupt payload")]
    Corrupt,
    /// The codec could not decode its input
    #[strum(serialize = "malformed input")]
    Malformed,
    /// The decoded byte count is not what the layout requires
    #[strum(serialize = "size mismatch")]
    SizeMismatch,
}

/// Error produced by a single stage of the filter pipeline.
#[derive(Debug, Error)]
#[error("{codec} stage failed: {kind}: {message}")]
pub struct DecodeError {
    pub codec: &'static str,
    pub kind: DecodeFailureKind,
    pub message: String,
    #[source]
    pub source: Option<BoxError>,
}

impl DecodeError {
    /// Returns a new decode error with no underlying cause.
    pub fn new(codec: &'static str, kind: DecodeFailureKind, message: impl Into<String>) -> Self {
        Self {
            codec,
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Returns a [DecodeFailureKind::Malformed] error caused by a codec library error.
    pub fn malformed<E: Into<BoxError>>(codec: &'static str, source: E) -> Self {
        let source = source.into();
        Self {
            codec,
            kind: DecodeFailureKind::Malformed,
            message: source.to_string(),
            source: Some(source),
        }
    }
}

impl From<std::io::Error> for RetrievalFailure {
    /// Convert a local I/O error into a retrieval failure.
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match error.kind() {
            ErrorKind::NotFound => FailureKind::NotFound,
            ErrorKind::PermissionDenied => FailureKind::PermissionDenied,
            ErrorKind::UnexpectedEof => FailureKind::LengthMismatch,
            ErrorKind::TimedOut => FailureKind::Timeout,
            ErrorKind::Interrupted
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => FailureKind::Transient,
            _ => FailureKind::Other,
        };
        RetrievalFailure::new(kind, error.to_string()).with_source(error)
    }
}

impl From<ByteStreamError> for RetrievalFailure {
    /// Errors while streaming an object body are treated as transient.
    fn from(error: ByteStreamError) -> Self {
        RetrievalFailure::new(FailureKind::Transient, "error receiving object body")
            .with_source(error)
    }
}

impl From<SdkError<GetObjectError>> for RetrievalFailure {
    /// Convert an S3 GetObject error into a retrieval failure.
    fn from(error: SdkError<GetObjectError>) -> Self {
        // Tailor the failure based on the specific SdkError variant.
        let kind = match &error {
            // These are generic SdkError variants.
            SdkError::TimeoutError(_) => FailureKind::Timeout,
            SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => FailureKind::Transient,
            SdkError::ConstructionFailure(_) => FailureKind::Other,

            // This is a more specific ServiceError variant, with GetObjectError as the
            // inner error.
            SdkError::ServiceError(service_error) => {
                let status = service_error.raw().status().as_u16();
                match service_error.err() {
                    GetObjectError::NoSuchKey(_) => FailureKind::NotFound,
                    GetObjectError::InvalidObjectState(_) => FailureKind::Other,

                    // Quite a lot of error cases end up as unhandled. Attempt to determine
                    // the error from the code.
                    get_obj_error => match get_obj_error.code() {
                        Some("NoSuchBucket") | Some("NoSuchKey") => FailureKind::NotFound,
                        Some("InvalidAccessKeyId")
                        | Some("SignatureDoesNotMatch")
                        | Some("AccessDenied") => FailureKind::PermissionDenied,
                        Some("InvalidRange") => FailureKind::InvalidRange,
                        Some("SlowDown") | Some("RequestTimeout") | Some("InternalError") => {
                            FailureKind::Transient
                        }
                        _ if status >= 500 => FailureKind::Transient,
                        _ => FailureKind::Other,
                    },
                }
            }

            // The enum is marked as non-exhaustive
            _ => FailureKind::Other,
        };
        RetrievalFailure::new(kind, "error retrieving object from S3 storage").with_source(error)
    }
}

/// Log an error and its chain of causes.
///
/// Duplicate consecutive messages in the chain are skipped.
pub fn log_error(error: &(dyn Error + 'static)) {
    event!(Level::ERROR, "{}", error);
    let mut previous = error.to_string();
    let mut current = error.source();
    while let Some(source) = current {
        let message = source.to_string();
        if message != previous {
            event!(Level::ERROR, "Caused by: {}", message);
        }
        previous = message;
        current = source.source();
    }
}

/// Collect the messages of an error's chain of causes.
pub fn caused_by(error: &(dyn Error + 'static)) -> Vec<String> {
    let mut causes: Vec<String> = Vec::new();
    let mut current = error.source();
    while let Some(source) = current {
        causes.push(source.to_string());
        current = source.source();
    }
    // Remove duplicate entries.
    causes.dedup();
    causes
}

#[cfg(test)]
mod tests {
    use super::*;

    use aws_sdk_s3::types::error::NoSuchKey;
    use aws_smithy_runtime_api::http::Response as SmithyResponse;
    use aws_smithy_runtime_api::http::StatusCode as SmithyStatusCode;
    use aws_smithy_types::error::ErrorMetadata as SmithyError;

    fn get_smithy_response(status: u16) -> SmithyResponse {
        let sdk_body = "body";
        let status: SmithyStatusCode = status.try_into().unwrap();
        SmithyResponse::new(status, sdk_body.into())
    }

    // Jump through hoops to create an SdkError with an error code.
    fn sdk_error_with_code(code: &str, status: u16) -> SdkError<GetObjectError> {
        let smithy_error = SmithyError::builder()
            .message("fake smithy error")
            .code(code)
            .build();
        let get_object_error = GetObjectError::generic(smithy_error);
        SdkError::service_error(get_object_error, get_smithy_response(status))
    }

    #[test]
    fn manifest_error_message() {
        let error = ReconstructionError::manifest("chunk rank 2 does not match array rank 3");
        assert_eq!(
            "invalid manifest: chunk rank 2 does not match array rank 3",
            error.to_string()
        );
        assert!(caused_by(&error).is_empty());
    }

    #[test]
    fn manifest_error_caused_by() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let error = ReconstructionError::manifest_caused_by("failed to read manifest", io_error);
        assert_eq!(vec!["no such file".to_string()], caused_by(&error));
    }

    #[test]
    fn unsupported_encoding_message() {
        let error = ReconstructionError::unsupported("variable length strings");
        assert_eq!(
            "unsupported encoding: variable length strings",
            error.to_string()
        );
    }

    #[test]
    fn retrieval_error_names_coordinates() {
        let error = ReconstructionError::Retrieval {
            coords: vec![vec![3, 1], vec![3, 2]],
            cause: RetrievalFailure::new(FailureKind::NotFound, "HTTP status 404"),
        };
        assert_eq!(
            "failed to retrieve chunk(s) [[3, 1], [3, 2]] (not found)",
            error.to_string()
        );
        assert_eq!(vec!["not found: HTTP status 404".to_string()], caused_by(&error));
    }

    #[test]
    fn decompression_error_names_codec() {
        let error = ReconstructionError::Decompression {
            coord: vec![7],
            error: DecodeError::new("fletcher32", DecodeFailureKind::Corrupt, "checksum mismatch"),
        };
        assert_eq!(
            "failed to decode chunk [7] (fletcher32 stage: corrupt payload)",
            error.to_string()
        );
    }

    #[test]
    fn out_of_range_message() {
        let error = ReconstructionError::out_of_range(0, "last index 104 >= extent 100");
        assert_eq!(
            "hyperslab out of range in dimension 0: last index 104 >= extent 100",
            error.to_string()
        );
        let error = ReconstructionError::OutOfRange {
            dimension: None,
            reason: "rank 2 does not match array rank 1".to_string(),
        };
        assert_eq!(
            "hyperslab out of range: rank 2 does not match array rank 1",
            error.to_string()
        );
    }

    #[test]
    fn transient_kinds() {
        assert!(RetrievalFailure::new(FailureKind::Transient, "").is_transient());
        assert!(RetrievalFailure::new(FailureKind::Timeout, "").is_transient());
        assert!(!RetrievalFailure::new(FailureKind::NotFound, "").is_transient());
        assert!(!RetrievalFailure::new(FailureKind::PermissionDenied, "").is_transient());
        assert!(!RetrievalFailure::new(FailureKind::LengthMismatch, "").is_transient());
    }

    #[test]
    fn io_error_kinds() {
        let failure = RetrievalFailure::from(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(FailureKind::NotFound, failure.kind);
        let failure =
            RetrievalFailure::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert_eq!(FailureKind::LengthMismatch, failure.kind);
        let failure =
            RetrievalFailure::from(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(failure.is_transient());
    }

    #[test]
    fn byte_stream_error_is_transient() {
        // ByteStreamError provides a From impl for std::io:Error.
        let failure = RetrievalFailure::from(ByteStreamError::from(std::io::Error::from(
            std::io::ErrorKind::UnexpectedEof,
        )));
        assert!(failure.is_transient());
    }

    #[test]
    fn s3_no_such_key() {
        // Jump through hoops to create an SdkError.
        let no_such_key = NoSuchKey::builder().build();
        let get_object_error = GetObjectError::NoSuchKey(no_such_key);
        let sdk_error = SdkError::service_error(get_object_error, get_smithy_response(404));
        assert_eq!(FailureKind::NotFound, RetrievalFailure::from(sdk_error).kind);
    }

    #[test]
    fn s3_no_such_bucket() {
        let failure = RetrievalFailure::from(sdk_error_with_code("NoSuchBucket", 404));
        assert_eq!(FailureKind::NotFound, failure.kind);
    }

    #[test]
    fn s3_access_denied() {
        for code in ["InvalidAccessKeyId", "SignatureDoesNotMatch", "AccessDenied"] {
            let failure = RetrievalFailure::from(sdk_error_with_code(code, 403));
            assert_eq!(FailureKind::PermissionDenied, failure.kind, "{}", code);
            assert!(!failure.is_transient());
        }
    }

    #[test]
    fn s3_invalid_range() {
        let failure = RetrievalFailure::from(sdk_error_with_code("InvalidRange", 416));
        assert_eq!(FailureKind::InvalidRange, failure.kind);
    }

    #[test]
    fn s3_server_error_is_transient() {
        let failure = RetrievalFailure::from(sdk_error_with_code("SomethingOdd", 503));
        assert!(failure.is_transient());
        let failure = RetrievalFailure::from(sdk_error_with_code("SlowDown", 503));
        assert!(failure.is_transient());
    }

    #[test]
    fn s3_unknown_client_error() {
        let failure = RetrievalFailure::from(sdk_error_with_code("SomethingOdd", 400));
        assert_eq!(FailureKind::Other, failure.kind);
    }
}

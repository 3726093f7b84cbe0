use std::{fmt, io};

/// Failure of a single remote call.
///
/// The bench treats all of these the same (fatal), the variants only exist
/// to produce a precise diagnostic.
#[derive(Debug)]
pub enum CallError {
    /// The request could not be encoded.
    Encode(io::Error),
    /// The connection was lost, before or while the call was in flight.
    Disconnected(String),
    /// The server answered with an error response.
    Server { code: u32, message: String },
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(err) => write!(f, "encode request: {err}"),
            Self::Disconnected(reason) => write!(f, "connection lost: {reason}"),
            Self::Server { code, message } => {
                write!(f, "server error (code {code}): {message}")
            }
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(err) => Some(err),
            Self::Disconnected(_) | Self::Server { .. } => None,
        }
    }
}

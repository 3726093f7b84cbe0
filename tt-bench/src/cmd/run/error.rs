use std::fmt;

use rama::error::OpaqueError;
use tt_bench_lib::client::CallError;

/// Why a bench run did not produce a report.
#[derive(Debug)]
pub enum BenchError {
    /// Opening the connection (connect, greeting or auth) failed.
    Connect(OpaqueError),
    /// The first call that failed, all workers were stopped because of it.
    Call(CallError),
    /// The run was cancelled from outside (e.g. ctrl-c) before it completed.
    Interrupted,
}

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(err) => write!(f, "Connect: {err}"),
            Self::Call(err) => write!(f, "Call: {err}"),
            Self::Interrupted => f.write_str("interrupted before all requests completed"),
        }
    }
}

impl std::error::Error for BenchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect(err) => Some(err),
            Self::Call(err) => Some(err),
            Self::Interrupted => None,
        }
    }
}

impl From<CallError> for BenchError {
    fn from(err: CallError) -> Self {
        Self::Call(err)
    }
}

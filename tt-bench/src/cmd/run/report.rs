use std::{fmt, time::Duration};

/// Aggregate result of a completed run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchReport {
    /// Completed calls, always `concurrency * requests per worker`.
    pub requests: u64,
    pub elapsed: Duration,
}

impl BenchReport {
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// Requests per second.
    ///
    /// A zero elapsed time is not special cased:
    /// it gives `inf`, or `NaN` when no requests were made.
    pub fn rps(&self) -> f64 {
        self.requests as f64 / self.elapsed_secs()
    }

    /// Single line JSON form, non-finite rps is reported as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "requests": self.requests,
            "elapsed_secs": self.elapsed_secs(),
            "rps": self.rps(),
        })
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "REQUESTS: {}", self.requests)?;
        writeln!(f, "ELAPSED: {:.2}", self.elapsed_secs())?;
        write!(f, "RPS: {:.0}", self.rps())
    }
}

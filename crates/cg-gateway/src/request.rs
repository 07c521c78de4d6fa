//! Execution request and result types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier assigned to each request on submission.
///
/// Ids are unique per gateway and increase in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Wraps a raw id.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An executable plus its argument vector.
///
/// Arguments are handed to the process as-is. Nothing is ever joined into a
/// shell string.
///
/// # Examples
///
/// ```
/// use cg_gateway::{CommandRequest, RequestId};
///
/// let request = CommandRequest::new(RequestId::new(1), "git", ["status", "--short"]);
/// assert_eq!(request.to_string(), "git status --short");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Submission id.
    pub id: RequestId,
    /// Executable name or path.
    pub command: String,
    /// Arguments, in order.
    pub args: Vec<String>,
}

impl CommandRequest {
    /// Creates a new request.
    pub fn new<I, S>(id: RequestId, command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id,
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Process-level outcome of a completed execution.
///
/// `exit_code` may be non-zero; interpreting it is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    /// Exit code reported by the process.
    pub exit_code: i32,
    /// Captured standard output, lossily decoded and capped.
    pub stdout: String,
    /// Captured standard error, lossily decoded and capped.
    pub stderr: String,
    /// Wall-clock time from spawn to exit.
    pub duration_ms: u64,
    /// Whether the process hit its timeout.
    ///
    /// Always `false` on a returned result: timeouts surface as
    /// [`GatewayError::Timeout`](crate::GatewayError::Timeout) instead. The
    /// field stays so the serialized result keeps its `timedOut` key.
    pub timed_out: bool,
}

impl CommandResult {
    /// Returns `true` if the process exited with code 0.
    #[inline]
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_display_keeps_args_separate() {
        let request = CommandRequest::new(RequestId::new(7), "store", ["put", "a b"]);
        assert_eq!(request.args, vec!["put", "a b"]);
        assert_eq!(request.to_string(), "store put a b");
        assert_eq!(request.id.to_string(), "#7");
    }

    #[test]
    fn test_result_wire_shape() {
        let result = CommandResult {
            exit_code: 2,
            stdout: "out".to_owned(),
            stderr: String::new(),
            duration_ms: 12,
            timed_out: false,
        };
        assert!(!result.succeeded());
        insta::assert_json_snapshot!(result, @r###"
        {
          "exitCode": 2,
          "stdout": "out",
          "stderr": "",
          "durationMs": 12,
          "timedOut": false
        }
        "###);
    }
}

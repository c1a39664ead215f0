// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Exit reports and verdict classification.
//!
//! The harness leaves a `meta` file of `key:value` lines in the scratch
//! directory; the boundary parses it into an [`ExitReport`] or synthesizes
//! one for conditions only it can observe (timeout, harness killed).
//! [`classify`] turns the report and the state of the output file into a
//! [`Verdict`]. It is total: every input maps to exactly one verdict.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status marker for an internal/setup failure.
pub const STATUS_INTERNAL: &str = "XX";
/// Status marker for a wall-clock timeout.
pub const STATUS_TIMEOUT: &str = "TO";
/// Status marker for a non-zero program exit.
pub const STATUS_RUNTIME: &str = "RE";
/// Status marker for a program killed by a signal.
pub const STATUS_SIGNAL: &str = "SG";

/// Classified outcome of one code execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Program exited normally
    Ok,
    /// The harness or its setup failed
    InternalError,
    /// Wall-clock budget exceeded
    Timeout,
    /// Program exited non-zero or threw
    RuntimeError,
    /// Program was killed by a signal
    Crashed,
    /// Unrecognized status marker
    #[serde(other)]
    UnknownError,
}

impl Verdict {
    /// String constant used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Ok => "OK",
            Verdict::InternalError => "INTERNAL_ERROR",
            Verdict::Timeout => "TIMEOUT",
            Verdict::RuntimeError => "RUNTIME_ERROR",
            Verdict::Crashed => "CRASHED",
            Verdict::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Whether the unit that ran this execution must be wiped before reuse.
    ///
    /// A program that merely failed inside its own runtime leaves the
    /// sandbox intact; anything else may have left it in an unknown state.
    pub fn taints_unit(&self) -> bool {
        !matches!(self, Verdict::Ok | Verdict::RuntimeError)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable exit status of one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitReport {
    /// Two-letter status marker, absent on normal exit
    pub status: Option<String>,
    /// Program exit code
    pub exit_code: Option<i32>,
    /// Signal that terminated the program
    pub exit_signal: Option<i32>,
    /// Free-form diagnostic
    pub message: Option<String>,
}

impl ExitReport {
    /// Parse `key:value` lines. Unknown keys and malformed lines are ignored.
    pub fn parse(text: &str) -> Self {
        let mut report = Self::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "status" if !value.is_empty() => report.status = Some(value.to_string()),
                "exitcode" => report.exit_code = value.parse().ok(),
                "exitsig" => report.exit_signal = value.parse().ok(),
                "message" => report.message = Some(value.to_string()),
                _ => {}
            }
        }
        report
    }

    /// Report for an execution killed after exceeding its timeout.
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self {
            status: Some(STATUS_TIMEOUT.to_string()),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Report for an execution whose harness was killed by a signal.
    pub fn signaled(signal: i32) -> Self {
        Self {
            status: Some(STATUS_SIGNAL.to_string()),
            exit_signal: Some(signal),
            ..Self::default()
        }
    }

    /// Report for a failure of the harness itself.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: Some(STATUS_INTERNAL.to_string()),
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// State of the program's declared output file.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputFile {
    /// No output file was written
    Missing,
    /// The output file is not valid JSON
    Malformed(String),
    /// Parsed output value
    Valid(Value),
}

impl OutputFile {
    /// Interpret raw output file contents.
    pub fn from_contents(contents: Option<&str>) -> Self {
        match contents {
            None => OutputFile::Missing,
            Some(raw) => match serde_json::from_str(raw) {
                Ok(value) => OutputFile::Valid(value),
                Err(e) => OutputFile::Malformed(e.to_string()),
            },
        }
    }
}

/// Map an exit report and output file state to a verdict.
pub fn classify(report: Option<&ExitReport>, output: &OutputFile) -> Verdict {
    let Some(report) = report else {
        // Harness never ran to completion; trust a valid output only
        return match output {
            OutputFile::Valid(_) => Verdict::Ok,
            _ => Verdict::InternalError,
        };
    };

    match report.status.as_deref() {
        Some(STATUS_INTERNAL) => Verdict::InternalError,
        Some(STATUS_TIMEOUT) => Verdict::Timeout,
        Some(STATUS_RUNTIME) => Verdict::RuntimeError,
        Some(STATUS_SIGNAL) => Verdict::Crashed,
        Some(_) => Verdict::UnknownError,
        None => match (report.exit_code, output) {
            (Some(code), _) if code != 0 => Verdict::RuntimeError,
            (_, OutputFile::Malformed(_)) => Verdict::InternalError,
            _ => Verdict::Ok,
        },
    }
}

/// Diagnostic line for a non-OK verdict, used when the program left no stderr.
pub fn describe(verdict: Verdict, report: Option<&ExitReport>, output: &OutputFile) -> String {
    let message = report.and_then(|r| r.message.as_deref());
    match verdict {
        Verdict::Ok => String::new(),
        Verdict::Timeout => message.unwrap_or("Execution timed out").to_string(),
        Verdict::Crashed => match report.and_then(|r| r.exit_signal) {
            Some(signal) => format!("Program was killed by signal {}", signal),
            None => "Program was killed by a signal".to_string(),
        },
        Verdict::RuntimeError => match report.and_then(|r| r.exit_code) {
            Some(code) => format!("Program exited with code {}", code),
            None => "Program failed".to_string(),
        },
        Verdict::InternalError => match (message, output) {
            (Some(m), _) => format!("Internal error: {}", m),
            (None, OutputFile::Malformed(e)) => format!("Internal error: malformed output: {}", e),
            (None, _) => "Internal error: harness produced no status".to_string(),
        },
        Verdict::UnknownError => match report.and_then(|r| r.status.as_deref()) {
            Some(status) => format!("Unknown execution status: {}", status),
            None => "Unknown execution status".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(text: &str) -> ExitReport {
        ExitReport::parse(text)
    }

    #[test]
    fn test_parse_meta_file() {
        let r = report("status:RE\nexitcode:3\nmessage: boom \ngarbage\n");
        assert_eq!(r.status.as_deref(), Some("RE"));
        assert_eq!(r.exit_code, Some(3));
        assert_eq!(r.message.as_deref(), Some("boom"));
        assert_eq!(r.exit_signal, None);
    }

    #[test]
    fn test_parse_empty_status_is_absent() {
        let r = report("status:\nexitcode:0\n");
        assert!(r.status.is_none());
        assert_eq!(r.exit_code, Some(0));
    }

    #[test]
    fn test_classify_table() {
        let valid = OutputFile::Valid(json!({"ok": true}));
        let cases = [
            ("exitcode:0\n", Verdict::Ok),
            ("status:XX\n", Verdict::InternalError),
            ("status:TO\n", Verdict::Timeout),
            ("status:RE\nexitcode:1\n", Verdict::RuntimeError),
            ("status:SG\nexitsig:9\n", Verdict::Crashed),
            ("status:ZZ\n", Verdict::UnknownError),
            ("exitcode:2\n", Verdict::RuntimeError),
        ];
        for (meta, expected) in cases {
            assert_eq!(classify(Some(&report(meta)), &valid), expected, "meta {:?}", meta);
        }
    }

    #[test]
    fn test_classify_without_report() {
        assert_eq!(classify(None, &OutputFile::Valid(json!(1))), Verdict::Ok);
        assert_eq!(classify(None, &OutputFile::Missing), Verdict::InternalError);
        assert_eq!(
            classify(None, &OutputFile::Malformed("eof".into())),
            Verdict::InternalError
        );
    }

    #[test]
    fn test_malformed_output_degrades_ok() {
        let ok = report("exitcode:0\n");
        assert_eq!(
            classify(Some(&ok), &OutputFile::Malformed("expected value".into())),
            Verdict::InternalError
        );
        assert_eq!(classify(Some(&ok), &OutputFile::Missing), Verdict::Ok);
    }

    #[test]
    fn test_status_wins_over_output() {
        // A timed-out program may still have written output; it is ignored
        let timed_out = ExitReport::timed_out("killed after 1s");
        assert_eq!(
            classify(Some(&timed_out), &OutputFile::Valid(json!(1))),
            Verdict::Timeout
        );
    }

    #[test]
    fn test_taints_unit() {
        assert!(!Verdict::Ok.taints_unit());
        assert!(!Verdict::RuntimeError.taints_unit());
        assert!(Verdict::Timeout.taints_unit());
        assert!(Verdict::Crashed.taints_unit());
        assert!(Verdict::InternalError.taints_unit());
        assert!(Verdict::UnknownError.taints_unit());
    }

    #[test]
    fn test_verdict_wire_constants() {
        assert_eq!(serde_json::to_string(&Verdict::RuntimeError).unwrap(), "\"RUNTIME_ERROR\"");
        assert_eq!(serde_json::to_string(&Verdict::Ok).unwrap(), "\"OK\"");
        let unknown: Verdict = serde_json::from_str("\"MEMORY_LIMIT\"").unwrap();
        assert_eq!(unknown, Verdict::UnknownError);
        assert_eq!(Verdict::Crashed.to_string(), "CRASHED");
    }

    #[test]
    fn test_describe_messages() {
        let sg = ExitReport::signaled(11);
        assert_eq!(
            describe(Verdict::Crashed, Some(&sg), &OutputFile::Missing),
            "Program was killed by signal 11"
        );
        assert!(describe(Verdict::InternalError, None, &OutputFile::Missing).contains("no status"));
    }
}

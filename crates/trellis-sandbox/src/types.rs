// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Code execution request/result contract.
//!
//! This is the only wire contract of the code runner. Field names are
//! camelCase on the wire and the verdict is a string constant.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::verdict::Verdict;

/// One code step to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeExecutionRequest {
    /// Bundled, runnable program
    #[serde(with = "base64_bytes")]
    pub artifact: Vec<u8>,
    /// Structured value passed to the program
    #[serde(default)]
    pub input: Value,
    /// Maximum wall-clock duration; the runner default applies when unset or zero
    #[serde(
        default,
        rename = "timeoutMs",
        with = "optional_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

impl CodeExecutionRequest {
    /// Create a request with the runner's default timeout.
    pub fn new(artifact: impl Into<Vec<u8>>, input: Value) -> Self {
        Self {
            artifact: artifact.into(),
            input,
            timeout: None,
        }
    }

    /// Override the execution timeout. A zero timeout means the runner's default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of one code step.
///
/// `output` is only set when `verdict` is `OK`; other verdicts carry their
/// diagnostic in `standard_error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeExecutionResult {
    /// Classified outcome
    pub verdict: Verdict,
    /// Measured wall-clock execution time
    pub duration_seconds: f64,
    /// Value returned by the program
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Captured stdout (bounded)
    #[serde(default)]
    pub standard_output: String,
    /// Captured stderr (bounded)
    #[serde(default)]
    pub standard_error: String,
}

impl CodeExecutionResult {
    /// Whether the program completed normally.
    pub fn is_ok(&self) -> bool {
        self.verdict == Verdict::Ok
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_u64(d.as_millis() as u64),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scratch directory preparation.
//!
//! Input/output is exchanged via files in the unit's scratch directory:
//! - Program: {scratch}/artifact
//! - Input: {scratch}/input.json
//! - Harness: {scratch}/harness.sh
//! - Output: {scratch}/output.json (written by the program)
//! - Status: {scratch}/meta (written by the harness)

use std::path::{Path, PathBuf};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use crate::error::{Result, SandboxError};
use crate::unit::IsolationUnit;

/// File name of the staged program.
pub const ARTIFACT_FILE: &str = "artifact";
/// File name of the input payload.
pub const INPUT_FILE: &str = "input.json";
/// File name of the harness script.
pub const HARNESS_FILE: &str = "harness.sh";
/// File name the program writes its result to.
pub const OUTPUT_FILE: &str = "output.json";
/// File name the harness writes its status marker to.
pub const META_FILE: &str = "meta";

/// Harness run by the boundary: executes the program and records how it exited.
///
/// Exit codes above 128 follow the shell convention for "killed by signal".
const HARNESS_SCRIPT: &str = r#"#!/bin/sh
# Generated by trellis-sandbox. Runs one staged artifact.
if [ ! -x ./artifact ]; then
    printf 'status:XX\nmessage:artifact is not executable\n' > ./meta
    exit 0
fi
./artifact ./input.json ./output.json
code=$?
if [ "$code" -eq 0 ]; then
    printf 'exitcode:0\n' > ./meta
elif [ "$code" -gt 128 ]; then
    printf 'status:SG\nexitsig:%d\nexitcode:%d\n' "$((code - 128))" "$code" > ./meta
else
    printf 'status:RE\nexitcode:%d\n' "$code" > ./meta
fi
exit 0
"#;

/// A unit's scratch directory after staging.
#[derive(Debug, Clone)]
pub struct StagedExecution {
    /// Scratch directory (working directory of the run)
    pub scratch_dir: PathBuf,
    /// Staged program
    pub artifact_path: PathBuf,
    /// Input payload
    pub input_path: PathBuf,
    /// Harness script
    pub harness_path: PathBuf,
    /// Output written by the program
    pub output_path: PathBuf,
    /// Status marker written by the harness
    pub meta_path: PathBuf,
    /// Hex SHA-256 of the artifact
    pub artifact_digest: String,
}

impl StagedExecution {
    fn at(scratch_dir: &Path, artifact_digest: String) -> Self {
        Self {
            scratch_dir: scratch_dir.to_path_buf(),
            artifact_path: scratch_dir.join(ARTIFACT_FILE),
            input_path: scratch_dir.join(INPUT_FILE),
            harness_path: scratch_dir.join(HARNESS_FILE),
            output_path: scratch_dir.join(OUTPUT_FILE),
            meta_path: scratch_dir.join(META_FILE),
            artifact_digest,
        }
    }
}

/// Materializes the runnable bundle, input and harness into a unit.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStager;

impl ArtifactStager {
    /// Create a new stager.
    pub fn new() -> Self {
        Self
    }

    /// Write artifact, input and harness into the unit's scratch directory.
    pub async fn stage(
        &self,
        unit: &IsolationUnit,
        artifact: &[u8],
        input: &Value,
    ) -> Result<StagedExecution> {
        if artifact.is_empty() {
            return Err(SandboxError::InvalidArtifact("artifact is empty".to_string()));
        }

        let scratch_dir = unit.scratch_path();
        fs::create_dir_all(scratch_dir)
            .await
            .map_err(|e| staging_error("create scratch directory", e))?;

        let staged = StagedExecution::at(scratch_dir, artifact_digest(artifact));

        fs::write(&staged.artifact_path, artifact)
            .await
            .map_err(|e| staging_error("write artifact", e))?;
        set_mode(&staged.artifact_path, 0o755).map_err(|e| staging_error("chmod artifact", e))?;

        let payload = serde_json::to_string_pretty(input)?;
        fs::write(&staged.input_path, payload)
            .await
            .map_err(|e| staging_error("write input", e))?;

        fs::write(&staged.harness_path, HARNESS_SCRIPT)
            .await
            .map_err(|e| staging_error("write harness", e))?;
        set_mode(&staged.harness_path, 0o755).map_err(|e| staging_error("chmod harness", e))?;

        debug!(
            unit_id = %unit.id(),
            digest = %staged.artifact_digest,
            artifact_bytes = artifact.len(),
            "Staged execution"
        );
        Ok(staged)
    }
}

fn staging_error(step: &str, e: std::io::Error) -> SandboxError {
    SandboxError::Staging(format!("{}: {}", step, e))
}

fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

fn artifact_digest(artifact: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(artifact);
    format!("{:x}", hasher.finalize())
}

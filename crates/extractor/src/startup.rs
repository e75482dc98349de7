//! Startup checks
//!
//! Verifies that the external tools used by the ffmpeg decoder are present
//! before any job starts:
//! - `ffprobe -version` runs
//! - `ffmpeg -version` runs and reports major version 6 or newer

use std::process::Command;
use thiserror::Error;

/// Oldest supported ffmpeg major version
pub const MIN_FFMPEG_MAJOR: u32 = 6;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{tool} not available: {message}")]
    ToolUnavailable { tool: &'static str, message: String },

    #[error("FFmpeg version requirement not met: {0}")]
    FfmpegVersion(String),
}

/// Parse the major version out of `<tool> -version` output.
///
/// Handles the usual formats:
/// - Standard: "ffmpeg version 6.1.1 ..."
/// - N-prefixed: "ffprobe version n7.0-12-gabcdef ..."
pub fn parse_tool_version(version_output: &str, tool: &str) -> Option<u32> {
    let marker = format!("{} version", tool.to_lowercase());
    let version_line = version_output
        .lines()
        .map(str::to_lowercase)
        .find(|line| line.contains(&marker))?;

    let version_part = version_line
        .split(&marker)
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');
    let major_str = version_str.split(|c| c == '.' || c == '-').next()?;
    major_str.parse().ok()
}

/// Major version from `ffmpeg -version` output
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    parse_tool_version(version_output, "ffmpeg")
}

/// Run `<tool> -version` and return its stdout
fn tool_version_output(tool: &'static str) -> Result<String, StartupError> {
    let output = Command::new(tool)
        .arg("-version")
        .output()
        .map_err(|e| StartupError::ToolUnavailable {
            tool,
            message: format!("{} -version failed; is it installed and in PATH? Error: {}", tool, e),
        })?;

    if !output.status.success() {
        return Err(StartupError::ToolUnavailable {
            tool,
            message: format!("{} -version exited with {}", tool, output.status),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Check the ffmpeg output for a supported major version
pub fn check_ffmpeg_version(version_output: &str) -> Result<u32, StartupError> {
    let major = parse_ffmpeg_version(version_output).ok_or_else(|| {
        StartupError::FfmpegVersion(format!(
            "Could not parse FFmpeg version from output: {}",
            version_output.lines().next().unwrap_or("(empty)")
        ))
    })?;

    if major < MIN_FFMPEG_MAJOR {
        return Err(StartupError::FfmpegVersion(format!(
            "FFmpeg {}.x or newer required, got: {}",
            MIN_FFMPEG_MAJOR, major
        )));
    }
    Ok(major)
}

/// Run all startup checks: ffprobe availability, then ffmpeg version
pub fn run_startup_checks() -> Result<(), StartupError> {
    tool_version_output("ffprobe")?;
    let ffmpeg = tool_version_output("ffmpeg")?;
    let major = check_ffmpeg_version(&ffmpeg)?;
    tracing::debug!(major, "ffmpeg version check passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_version_parsing_standard(
            major in 1u32..20,
            minor in 0u32..10,
            patch in 0u32..10,
        ) {
            let output = format!(
                "ffmpeg version {}.{}.{} Copyright (c) 2000-2024 the FFmpeg developers",
                major, minor, patch
            );
            prop_assert_eq!(parse_ffmpeg_version(&output), Some(major));
        }

        #[test]
        fn prop_version_parsing_n_prefixed(
            major in 1u32..20,
            minor in 0u32..10,
            git_hash in "[a-f0-9]{7}",
        ) {
            let output = format!(
                "ffprobe version n{}.{}-123-g{} Copyright (c) 2007-2024",
                major, minor, git_hash
            );
            prop_assert_eq!(parse_tool_version(&output, "ffprobe"), Some(major));
        }

        #[test]
        fn prop_minimum_version_enforced(major in 1u32..20, minor in 0u32..10) {
            let output = format!("ffmpeg version {}.{} Copyright (c) 2000-2024", major, minor);
            let result = check_ffmpeg_version(&output);
            prop_assert_eq!(result.is_ok(), major >= MIN_FFMPEG_MAJOR);
        }
    }

    #[test]
    fn test_parse_version_multiline() {
        let output = r#"ffmpeg version n6.1-5-g1234567 Copyright (c) 2000-2024
built with gcc 12.2.0
configuration: --enable-gpl"#;
        assert_eq!(parse_ffmpeg_version(output), Some(6));
    }

    #[test]
    fn test_parse_version_wrong_tool() {
        let output = "ffprobe version 6.0 Copyright (c) 2007-2023";
        assert_eq!(parse_ffmpeg_version(output), None);
        assert_eq!(parse_tool_version(output, "ffprobe"), Some(6));
    }

    #[test]
    fn test_parse_version_invalid() {
        assert_eq!(parse_ffmpeg_version("not ffmpeg output"), None);
        assert_eq!(parse_ffmpeg_version(""), None);
        assert!(matches!(
            check_ffmpeg_version(""),
            Err(StartupError::FfmpegVersion(_))
        ));
    }

    #[test]
    fn test_old_ffmpeg_rejected() {
        let err = check_ffmpeg_version("ffmpeg version 4.4.2-0ubuntu0.22.04.1").unwrap_err();
        assert!(err.to_string().contains("6.x"));
    }
}

//! Typed wrappers around the external helper processes.
//!
//! Deterministic document work (PDF inspection, rasterization, office
//! conversion, Tesseract) runs in external tools; each wrapper shells out
//! and parses the tool's JSON or file output. Missing binaries surface as
//! `ToolError::Unavailable` with an install hint.

pub mod office;
pub mod pdf;
pub mod tesseract;

pub use office::OfficeToolkit;
pub use pdf::PdfToolkit;
pub use tesseract::TesseractTool;

use std::process::Output;

use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not available: {0}")]
    Unavailable(String),
    #[error("Tool failed: {0}")]
    Failed(String),
    #[error("Failed to parse tool output: {0}")]
    Parse(String),
    #[error(transparent)]
    Io(std::io::Error),
}

/// Whether a binary resolves on PATH.
pub fn check_binary(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Run a command, mapping a missing binary to `Unavailable` and a
/// non-zero exit to `Failed` with the captured stderr.
pub(crate) async fn run_tool(
    mut command: Command,
    name: &str,
    install_hint: &str,
) -> Result<Output, ToolError> {
    let output = match command.output().await {
        Ok(output) => output,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ToolError::Unavailable(format!(
                "{} not found ({})",
                name, install_hint
            )));
        }
        Err(e) => return Err(ToolError::Io(e)),
    };
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ToolError::Failed(format!("{}: {}", name, stderr.trim())));
    }
    Ok(output)
}

/// Parse a tool's stdout as JSON. A top-level `error` key is a failure.
pub(crate) fn parse_json_output<T: serde::de::DeserializeOwned>(
    stdout: &[u8],
    name: &str,
) -> Result<T, ToolError> {
    let value: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| ToolError::Parse(format!("{} output: {}", name, e)))?;
    if let Some(error) = value.get("error").and_then(|v| v.as_str()) {
        return Err(ToolError::Failed(format!("{}: {}", name, error)));
    }
    serde_json::from_value(value).map_err(|e| ToolError::Parse(format!("{} output: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let command = Command::new("definitely-not-a-real-binary-xyz");
        let err = run_tool(command, "definitely-not-a-real-binary-xyz", "install it")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Unavailable(_)));
    }

    #[test]
    fn test_parse_json_output_error_key() {
        #[derive(Debug, serde::Deserialize)]
        struct Empty {}
        let err =
            parse_json_output::<Empty>(br#"{"error": "corrupt pdf"}"#, "helper").unwrap_err();
        assert!(matches!(err, ToolError::Failed(_)));
        assert!(err.to_string().contains("corrupt pdf"));
    }

    #[test]
    fn test_parse_json_output_ok() {
        #[derive(serde::Deserialize)]
        struct Out {
            text: String,
        }
        let out = parse_json_output::<Out>(br#"{"text": "hello"}"#, "helper").unwrap();
        assert_eq!(out.text, "hello");
    }
}

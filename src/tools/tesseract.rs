//! Tesseract wrapper for the cheap OCR pre-filter.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use super::{run_tool, ToolError};

/// Tesseract invocation with an overridable binary path.
#[derive(Debug, Clone)]
pub struct TesseractTool {
    binary: PathBuf,
}

impl Default for TesseractTool {
    fn default() -> Self {
        Self::new()
    }
}

impl TesseractTool {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
        }
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run Tesseract on an image and return the recognized text.
    pub async fn recognize(
        &self,
        image_path: &Path,
        languages: &str,
        psm: u32,
    ) -> Result<String, ToolError> {
        let mut command = Command::new(&self.binary);
        command
            .arg(image_path)
            .arg("stdout")
            .args(["-l", languages])
            .args(["--psm", &psm.to_string()]);
        let output = run_tool(command, "tesseract", "install tesseract-ocr").await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_without_install() {
        let tool = TesseractTool::with_binary("no-tesseract-here");
        let err = tool
            .recognize(Path::new("/tmp/x.png"), "eng+fra", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Unavailable(_)));
    }
}

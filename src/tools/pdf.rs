//! PDF helper tool: analysis, text extraction, rasterization, splitting.
//!
//! One helper binary with JSON subcommands covers the deterministic PDF
//! work. `analyze` drives routing (text path vs OCR path vs split),
//! `extract` reads the native text layer, `rasterize` produces the WebP
//! for the vision pipeline, and `split` cuts page ranges into new PDFs.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::models::{PreAnalysisResult, SimpleExtractResult};

use super::{parse_json_output, run_tool, ToolError};

const HELPER: &str = "docgather-pdf";
const INSTALL_HINT: &str = "install the docgather-pdf helper";

/// Crop applied to a split segment's first-page mediabox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitCrop {
    TopHalf,
    BottomHalf,
    LeftHalf,
    RightHalf,
}

impl SplitCrop {
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint {
            "top_half" => Some(Self::TopHalf),
            "bottom_half" => Some(Self::BottomHalf),
            "left_half" => Some(Self::LeftHalf),
            "right_half" => Some(Self::RightHalf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopHalf => "top_half",
            Self::BottomHalf => "bottom_half",
            Self::LeftHalf => "left_half",
            Self::RightHalf => "right_half",
        }
    }
}

/// Wrapper for the PDF helper binary.
#[derive(Debug, Clone)]
pub struct PdfToolkit {
    helper: PathBuf,
}

impl Default for PdfToolkit {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfToolkit {
    pub fn new() -> Self {
        Self {
            helper: PathBuf::from(HELPER),
        }
    }

    /// Override the helper path (tests point this at a stub script).
    pub fn with_helper(helper: impl Into<PathBuf>) -> Self {
        Self {
            helper: helper.into(),
        }
    }

    /// Deterministic inspection: page count, text layer quality, language
    /// guess, and multi-document segmentation.
    pub async fn analyze(&self, pdf_path: &Path) -> Result<PreAnalysisResult, ToolError> {
        let mut command = Command::new(&self.helper);
        command.arg("analyze").arg(pdf_path);
        let output = run_tool(command, HELPER, INSTALL_HINT).await?;
        parse_json_output(&output.stdout, HELPER)
    }

    /// Native text-layer extraction.
    pub async fn extract_text(&self, pdf_path: &Path) -> Result<SimpleExtractResult, ToolError> {
        let mut command = Command::new(&self.helper);
        command.arg("extract").arg(pdf_path);
        let output = run_tool(command, HELPER, INSTALL_HINT).await?;
        parse_json_output(&output.stdout, HELPER)
    }

    /// Rasterize the first page to WebP. `longest_side` of 0 keeps the
    /// page's full resolution (the OCR endpoint prefers it).
    pub async fn rasterize(
        &self,
        pdf_path: &Path,
        output_path: &Path,
        longest_side: u32,
    ) -> Result<(), ToolError> {
        let mut command = Command::new(&self.helper);
        command
            .arg("rasterize")
            .arg(pdf_path)
            .arg("--output")
            .arg(output_path)
            .arg("--longest-side")
            .arg(longest_side.to_string());
        run_tool(command, HELPER, INSTALL_HINT).await?;
        if !output_path.exists() {
            return Err(ToolError::Failed(format!(
                "{}: rasterize produced no output",
                HELPER
            )));
        }
        Ok(())
    }

    /// Extract 1-based `pages` into a new PDF, optionally cropping the
    /// first mediabox.
    pub async fn split(
        &self,
        pdf_path: &Path,
        pages: &[u32],
        crop: Option<SplitCrop>,
        output_path: &Path,
    ) -> Result<(), ToolError> {
        let pages_arg = pages
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let mut command = Command::new(&self.helper);
        command
            .arg("split")
            .arg(pdf_path)
            .arg("--pages")
            .arg(pages_arg)
            .arg("--output")
            .arg(output_path);
        if let Some(crop) = crop {
            command.arg("--crop").arg(crop.as_str());
        }
        run_tool(command, HELPER, INSTALL_HINT).await?;
        if !output_path.exists() {
            return Err(ToolError::Failed(format!(
                "{}: split produced no output",
                HELPER
            )));
        }
        Ok(())
    }
}

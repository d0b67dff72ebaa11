//! Office-format conversion tools: LibreOffice, mutool, and the Python
//! helpers for spreadsheets and email.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::process::Command;

use super::{parse_json_output, run_tool, ToolError};

/// Wrapper for the office conversion commands. Paths are overridable so
/// tests can substitute stubs.
#[derive(Debug, Clone)]
pub struct OfficeToolkit {
    soffice: PathBuf,
    mutool: PathBuf,
    xlsx2text: PathBuf,
    eml2html: PathBuf,
}

impl Default for OfficeToolkit {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct SpreadsheetText {
    text: String,
}

impl OfficeToolkit {
    pub fn new() -> Self {
        Self {
            soffice: PathBuf::from("soffice"),
            mutool: PathBuf::from("mutool"),
            xlsx2text: PathBuf::from("docgather-xlsx2text"),
            eml2html: PathBuf::from("docgather-eml2html"),
        }
    }

    pub fn with_commands(
        soffice: impl Into<PathBuf>,
        mutool: impl Into<PathBuf>,
        xlsx2text: impl Into<PathBuf>,
        eml2html: impl Into<PathBuf>,
    ) -> Self {
        Self {
            soffice: soffice.into(),
            mutool: mutool.into(),
            xlsx2text: xlsx2text.into(),
            eml2html: eml2html.into(),
        }
    }

    /// Convert a document with LibreOffice. Returns the produced file
    /// path (LibreOffice names it after the input stem inside `outdir`).
    pub async fn libreoffice_convert(
        &self,
        input: &Path,
        outdir: &Path,
        target: &str,
    ) -> Result<PathBuf, ToolError> {
        let mut command = Command::new(&self.soffice);
        command
            .arg("--headless")
            .arg("--convert-to")
            .arg(target)
            .arg("--outdir")
            .arg(outdir)
            .arg(input);
        run_tool(command, "soffice", "install libreoffice").await?;

        let extension = target.split(':').next().unwrap_or(target);
        let stem = input
            .file_stem()
            .ok_or_else(|| ToolError::Failed("input has no file stem".into()))?;
        let produced = outdir.join(format!("{}.{}", stem.to_string_lossy(), extension));
        if !produced.exists() {
            return Err(ToolError::Failed(format!(
                "soffice produced no {} output for {:?}",
                extension, input
            )));
        }
        Ok(produced)
    }

    /// Convert XPS (and friends) to PDF with mutool.
    pub async fn mutool_convert_to_pdf(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        let mut command = Command::new(&self.mutool);
        command.arg("convert").arg("-o").arg(output).arg(input);
        run_tool(command, "mutool", "install mupdf-tools").await?;
        if !output.exists() {
            return Err(ToolError::Failed("mutool produced no output".into()));
        }
        Ok(())
    }

    /// Extract sheet text from a spreadsheet via the pandas-based helper.
    pub async fn spreadsheet_to_text(&self, input: &Path) -> Result<String, ToolError> {
        let mut command = Command::new(&self.xlsx2text);
        command.arg(input);
        let output = run_tool(
            command,
            "docgather-xlsx2text",
            "install the docgather python helpers",
        )
        .await?;
        let parsed: SpreadsheetText = parse_json_output(&output.stdout, "docgather-xlsx2text")?;
        Ok(parsed.text)
    }

    /// Render an email (.eml) to HTML via the Python helper so
    /// LibreOffice can take it to PDF.
    pub async fn email_to_html(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        let mut command = Command::new(&self.eml2html);
        command.arg(input).arg("--output").arg(output);
        run_tool(
            command,
            "docgather-eml2html",
            "install the docgather python helpers",
        )
        .await?;
        if !output.exists() {
            return Err(ToolError::Failed("eml2html produced no output".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_helper_is_unavailable() {
        let toolkit = OfficeToolkit::with_commands(
            "no-soffice-here",
            "no-mutool-here",
            "no-xlsx2text-here",
            "no-eml2html-here",
        );
        let err = toolkit
            .spreadsheet_to_text(Path::new("/tmp/x.xlsx"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Unavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spreadsheet_text_parses_json() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let stub = dir.path().join("xlsx2text");
        let mut file = std::fs::File::create(&stub).unwrap();
        writeln!(file, "#!/bin/sh\necho '{{\"text\": \"Sheet1: totals\"}}'").unwrap();
        drop(file);
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        let toolkit = OfficeToolkit::with_commands("soffice", "mutool", &stub, "eml2html");
        let text = toolkit
            .spreadsheet_to_text(Path::new("/tmp/x.xlsx"))
            .await
            .unwrap();
        assert_eq!(text, "Sheet1: totals");
    }
}

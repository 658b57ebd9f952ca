use async_trait::async_trait;
use forge_scheduler::{DiffEditor, EditorOutcome, ToolError};
use std::io::Write;
use std::process::Command;
use tracing::warn;

/// Opens the proposed content in `$VISUAL` or `$EDITOR`. Leaving the file
/// untouched counts as cancelling the edit.
#[derive(Debug, Default)]
pub struct ExternalDiffEditor;

#[async_trait]
impl DiffEditor for ExternalDiffEditor {
    async fn open_diff_for_edit(
        &self,
        file_path: &str,
        _original: &str,
        proposed: &str,
    ) -> Result<EditorOutcome, ToolError> {
        let Some(editor) = std::env::var("VISUAL")
            .ok()
            .or_else(|| std::env::var("EDITOR").ok())
            .filter(|editor| !editor.trim().is_empty())
        else {
            warn!(file_path, "no $VISUAL or $EDITOR set; edit cancelled");
            return Ok(EditorOutcome::Cancelled);
        };
        let proposed = proposed.to_string();
        tokio::task::spawn_blocking(move || edit_in_place(&editor, &proposed))
            .await
            .map_err(|err| ToolError::Execution(format!("editor task failed: {err}")))?
    }
}

fn edit_in_place(editor: &str, proposed: &str) -> Result<EditorOutcome, ToolError> {
    let io_error = |err: std::io::Error| ToolError::Execution(format!("editor io failed: {err}"));
    let mut file = tempfile::NamedTempFile::new().map_err(io_error)?;
    file.write_all(proposed.as_bytes()).map_err(io_error)?;
    file.flush().map_err(io_error)?;

    let status = Command::new("sh")
        .arg("-c")
        .arg(format!("{editor} \"$1\""))
        .arg("forge-editor")
        .arg(file.path())
        .status()
        .map_err(io_error)?;
    if !status.success() {
        return Ok(EditorOutcome::Cancelled);
    }

    let edited = std::fs::read_to_string(file.path()).map_err(io_error)?;
    if edited == proposed {
        return Ok(EditorOutcome::Cancelled);
    }
    Ok(EditorOutcome::Saved(edited))
}

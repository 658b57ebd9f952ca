use crate::ToolError;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditorOutcome {
    Saved(String),
    Cancelled,
}

/// External collaborator that lets the user rewrite a proposed edit before
/// it is applied.
#[async_trait]
pub trait DiffEditor: Send + Sync {
    async fn open_diff_for_edit(
        &self,
        file_path: &str,
        original: &str,
        proposed: &str,
    ) -> Result<EditorOutcome, ToolError>;
}

pub struct CallbackDiffEditor {
    callback: Arc<dyn Fn(&str, &str, &str) -> EditorOutcome + Send + Sync>,
}

impl CallbackDiffEditor {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str, &str, &str) -> EditorOutcome + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }
}

#[async_trait]
impl DiffEditor for CallbackDiffEditor {
    async fn open_diff_for_edit(
        &self,
        file_path: &str,
        original: &str,
        proposed: &str,
    ) -> Result<EditorOutcome, ToolError> {
        Ok((self.callback)(file_path, original, proposed))
    }
}

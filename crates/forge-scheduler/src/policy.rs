use crate::{Allowlist, AllowlistEntry, ToolInvocation, ToolKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Global policy controlling which calls need a human decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Confirm every mutating or side-effecting tool.
    #[default]
    Default,
    /// Auto-approve file edits; everything else still follows `Default`.
    AutoEdit,
    /// Auto-approve everything.
    Yolo,
}

impl FromStr for ApprovalMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "default" => Ok(Self::Default),
            "auto_edit" | "autoedit" => Ok(Self::AutoEdit),
            "yolo" => Ok(Self::Yolo),
            other => Err(format!("unknown approval mode '{other}'")),
        }
    }
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Default => "default",
            Self::AutoEdit => "auto_edit",
            Self::Yolo => "yolo",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoApproveReason {
    Allowlisted,
    Yolo,
    ReadOnly,
    AutoEdit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyVerdict {
    AutoApprove(AutoApproveReason),
    NeedsConfirmation,
}

/// Decides whether `invocation` may run without a decision. Reads the
/// allowlist and never blocks.
pub fn evaluate_policy(
    mode: ApprovalMode,
    invocation: &dyn ToolInvocation,
    allowlist: &Allowlist,
) -> PolicyVerdict {
    if allowlist.contains(&AllowlistEntry::for_invocation(invocation)) {
        return PolicyVerdict::AutoApprove(AutoApproveReason::Allowlisted);
    }
    let kind = invocation.kind();
    match mode {
        ApprovalMode::Yolo => PolicyVerdict::AutoApprove(AutoApproveReason::Yolo),
        _ if kind.is_read_only() => PolicyVerdict::AutoApprove(AutoApproveReason::ReadOnly),
        ApprovalMode::AutoEdit if kind == ToolKind::Edit => {
            PolicyVerdict::AutoApprove(AutoApproveReason::AutoEdit)
        }
        ApprovalMode::Default | ApprovalMode::AutoEdit => PolicyVerdict::NeedsConfirmation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OutputSink, ToolError, ToolOutput};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tokio_util::sync::CancellationToken;

    struct FakeInvocation {
        kind: ToolKind,
        arguments: Value,
    }

    #[async_trait]
    impl ToolInvocation for FakeInvocation {
        fn tool_name(&self) -> &str {
            "fake"
        }

        fn kind(&self) -> ToolKind {
            self.kind
        }

        fn arguments(&self) -> &Value {
            &self.arguments
        }

        fn description(&self) -> String {
            "fake".to_string()
        }

        async fn execute(
            &self,
            _cancel: CancellationToken,
            _output: OutputSink,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::default())
        }
    }

    fn fake(kind: ToolKind) -> FakeInvocation {
        FakeInvocation {
            kind,
            arguments: json!({"path": "x"}),
        }
    }

    #[test]
    fn default_mode_confirms_mutating_kinds_only() {
        let allowlist = Allowlist::new();
        for kind in [ToolKind::Edit, ToolKind::Delete, ToolKind::Execute, ToolKind::Fetch] {
            assert_eq!(
                evaluate_policy(ApprovalMode::Default, &fake(kind), &allowlist),
                PolicyVerdict::NeedsConfirmation
            );
        }
        assert_eq!(
            evaluate_policy(ApprovalMode::Default, &fake(ToolKind::Read), &allowlist),
            PolicyVerdict::AutoApprove(AutoApproveReason::ReadOnly)
        );
    }

    #[test]
    fn auto_edit_approves_edits_but_not_shell() {
        let allowlist = Allowlist::new();
        assert_eq!(
            evaluate_policy(ApprovalMode::AutoEdit, &fake(ToolKind::Edit), &allowlist),
            PolicyVerdict::AutoApprove(AutoApproveReason::AutoEdit)
        );
        assert_eq!(
            evaluate_policy(ApprovalMode::AutoEdit, &fake(ToolKind::Execute), &allowlist),
            PolicyVerdict::NeedsConfirmation
        );
    }

    #[test]
    fn yolo_approves_everything() {
        let allowlist = Allowlist::new();
        assert_eq!(
            evaluate_policy(ApprovalMode::Yolo, &fake(ToolKind::Delete), &allowlist),
            PolicyVerdict::AutoApprove(AutoApproveReason::Yolo)
        );
    }

    #[test]
    fn allowlisted_signature_wins_in_any_mode() {
        let allowlist = Allowlist::new();
        let invocation = fake(ToolKind::Execute);
        allowlist.insert(AllowlistEntry::for_invocation(&invocation));

        assert_eq!(
            evaluate_policy(ApprovalMode::Default, &invocation, &allowlist),
            PolicyVerdict::AutoApprove(AutoApproveReason::Allowlisted)
        );
        let other_arguments = FakeInvocation {
            kind: ToolKind::Execute,
            arguments: json!({"path": "elsewhere"}),
        };
        assert_eq!(
            evaluate_policy(ApprovalMode::Default, &other_arguments, &allowlist),
            PolicyVerdict::NeedsConfirmation
        );
    }

    #[test]
    fn approval_mode_parses_common_spellings() {
        assert_eq!("YOLO".parse::<ApprovalMode>(), Ok(ApprovalMode::Yolo));
        assert_eq!("auto-edit".parse::<ApprovalMode>(), Ok(ApprovalMode::AutoEdit));
        assert_eq!("autoEdit".parse::<ApprovalMode>(), Ok(ApprovalMode::AutoEdit));
        assert!("sometimes".parse::<ApprovalMode>().is_err());
        assert_eq!(ApprovalMode::AutoEdit.to_string(), "auto_edit");
    }
}

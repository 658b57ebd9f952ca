use crate::{SchedulerConfig, ToolKind};

/// Which part of an over-long output survives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TruncationMode {
    KeepEnds,
    KeepTail,
}

impl TruncationMode {
    /// Search results and edit reports matter most at the end.
    pub fn for_kind(kind: ToolKind) -> Self {
        match kind {
            ToolKind::Search | ToolKind::Edit => Self::KeepTail,
            _ => Self::KeepEnds,
        }
    }
}

/// Shortens output fed back to the model using the tool's character limit,
/// then its line limit when one is configured.
pub fn truncate_tool_output(
    output: &str,
    tool_name: &str,
    kind: ToolKind,
    config: &SchedulerConfig,
) -> String {
    let limited = truncate_chars(
        output,
        config.output_limit_for(tool_name),
        TruncationMode::for_kind(kind),
    );
    match config.tool_line_limits.get(tool_name) {
        Some(&max_lines) => truncate_lines(&limited, max_lines),
        None => limited,
    }
}

pub fn truncate_chars(output: &str, max_chars: usize, mode: TruncationMode) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_string();
    }
    let omitted = total - max_chars;
    match mode {
        TruncationMode::KeepEnds => {
            let head = max_chars / 2;
            format!(
                "{}\n[output truncated: {omitted} characters omitted]\n{}",
                char_prefix(output, head),
                char_suffix(output, total, max_chars - head)
            )
        }
        TruncationMode::KeepTail => format!(
            "[output truncated: first {omitted} characters omitted]\n{}",
            char_suffix(output, total, max_chars)
        ),
    }
}

pub fn truncate_lines(output: &str, max_lines: usize) -> String {
    let total = output.lines().count();
    if total <= max_lines {
        return output.to_string();
    }
    let head = max_lines / 2;
    let tail = max_lines - head;
    let marker = format!("[output truncated: {} lines omitted]", total - max_lines);

    let mut kept: Vec<&str> = output.lines().take(head).collect();
    kept.push(&marker);
    kept.extend(output.lines().skip(total - tail));
    kept.join("\n")
}

fn char_prefix(text: &str, count: usize) -> &str {
    match text.char_indices().nth(count) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

fn char_suffix(text: &str, total: usize, count: usize) -> &str {
    match text.char_indices().nth(total.saturating_sub(count)) {
        Some((index, _)) => &text[index..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_ends_drops_the_middle() {
        assert_eq!(
            truncate_chars("abcdefghij", 6, TruncationMode::KeepEnds),
            "abc\n[output truncated: 4 characters omitted]\nhij"
        );
        assert_eq!(truncate_chars("abc", 6, TruncationMode::KeepEnds), "abc");
    }

    #[test]
    fn keep_tail_respects_char_boundaries() {
        assert_eq!(
            truncate_chars("ééééé", 2, TruncationMode::KeepTail),
            "[output truncated: first 3 characters omitted]\néé"
        );
    }

    #[test]
    fn line_limit_keeps_first_and_last_lines() {
        assert_eq!(
            truncate_lines("1\n2\n3\n4\n5\n6", 4),
            "1\n2\n[output truncated: 2 lines omitted]\n5\n6"
        );
        assert_eq!(truncate_lines("1\n2", 4), "1\n2");
    }

    #[test]
    fn tool_limits_come_from_config() {
        let mut config = SchedulerConfig::default();
        config.tool_output_limits.insert("grep".to_string(), 4);
        config.tool_line_limits.remove("grep");

        assert_eq!(
            truncate_tool_output("abcdefgh", "grep", ToolKind::Search, &config),
            "[output truncated: first 4 characters omitted]\nefgh"
        );
        assert_eq!(
            truncate_tool_output("abcdefgh", "other", ToolKind::Read, &config),
            "abcdefgh"
        );
    }
}

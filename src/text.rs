//! String helpers shared by logging and the history writer

/// Replace line feeds with a visible `\n` so a value fits on one log line
pub fn escape_linefeed(content: &str) -> String {
    content.replace('\n', "\\n")
}

/// Limit `content` to `length` characters, marking the cut with `...`
pub fn trunc_right(content: &str, length: usize) -> String {
    if content.chars().count() > length {
        let head: String = content.chars().take(length).collect();
        format!("{}...", head)
    } else {
        content.to_string()
    }
}

/// Keep the head and the tail of `content`, dropping the middle
///
/// Used for history records where both the beginning (the prompt) and the
/// end (the answer or last command output) carry the interesting part.
pub fn trunc_middle(content: &str, length: usize) -> String {
    let count = content.chars().count();
    if count <= length {
        return content.to_string();
    }
    let half = length / 2;
    let head: String = content.chars().take(half).collect();
    let tail: String = content.chars().skip(count - half).collect();
    format!("{}\n...(truncated)...\n{}", head, tail)
}

/// One-line preview for log output
pub fn preview(content: &str) -> String {
    escape_linefeed(&trunc_right(content, 100))
}

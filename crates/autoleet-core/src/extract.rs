//! Title and code extraction from generator replies.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A generated solution: optional problem title plus script source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateScript {
    pub title: Option<String>,
    pub code: String,
}

impl CandidateScript {
    pub fn new(title: Option<String>, code: impl Into<String>) -> Self {
        Self {
            title,
            code: code.into(),
        }
    }

    /// Title for display, `Untitled` when none was found.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Untitled")
    }
}

fn title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t>#*_-]*(?:题目名称|Title)[*_]*[ \t]*[:：][ \t]*(.+?)[ \t]*$")
            .expect("title pattern is valid")
    })
}

fn python_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*(?i:python3?|py)[ \t]*\r?\n(.*?)```")
            .expect("python fence pattern is valid")
    })
}

fn any_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[^\n`]*\r?\n(.*?)```").expect("fence pattern is valid")
    })
}

/// Split a generator reply into title and code.
pub fn extract_script(response: &str) -> CandidateScript {
    CandidateScript {
        title: extract_title(response),
        code: extract_code(response),
    }
}

/// First labelled title line, with markdown emphasis trimmed.
pub fn extract_title(response: &str) -> Option<String> {
    let caps = title_re().captures(response)?;
    let title = caps[1].trim_matches(|c: char| c == '*' || c == '_' || c == '`' || c.is_whitespace());
    (!title.is_empty()).then(|| title.to_string())
}

/// The solution code: a python-tagged fence, else any fence, else the whole
/// reply minus the title line.
pub fn extract_code(response: &str) -> String {
    if let Some(caps) = python_fence_re().captures(response) {
        return caps[1].trim().to_string();
    }
    if let Some(caps) = any_fence_re().captures(response) {
        return caps[1].trim().to_string();
    }
    match title_re().find(response) {
        Some(m) => {
            let mut rest = String::with_capacity(response.len());
            rest.push_str(&response[..m.start()]);
            rest.push_str(&response[m.end()..]);
            rest.trim().to_string()
        }
        None => response.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chinese_label_and_python_fence() {
        let reply = "题目名称: Two Sum\n\n```python\nprint(\"ok\")\n```\n";
        let script = extract_script(reply);
        assert_eq!(script.title.as_deref(), Some("Two Sum"));
        assert_eq!(script.code, "print(\"ok\")");
    }

    #[test]
    fn full_width_colon_and_markdown_decoration() {
        assert_eq!(
            extract_title("**题目名称：** 两数之和\n").as_deref(),
            Some("两数之和")
        );
        assert_eq!(
            extract_title("## Title: Valid Parentheses **\n").as_deref(),
            Some("Valid Parentheses")
        );
    }

    #[test]
    fn title_on_last_line_without_newline() {
        assert_eq!(extract_title("Title: LRU Cache").as_deref(), Some("LRU Cache"));
    }

    #[test]
    fn label_inside_code_is_not_a_title() {
        let reply = "```python\nclass Title:\n    pass\n```";
        assert_eq!(extract_title(reply), None);
        assert_eq!(extract_script(reply).display_title(), "Untitled");
    }

    #[test]
    fn python_fence_preferred_over_earlier_fence() {
        let reply = "```text\ninput: [1,2]\n```\n\n```python\nx = 1\n```";
        assert_eq!(extract_code(reply), "x = 1");
    }

    #[test]
    fn generic_fence_drops_info_string() {
        let reply = "Title: A\n```py3k\nprint(1)\n```";
        assert_eq!(extract_code(reply), "print(1)");

        let reply = "```\nprint(2)\n```";
        assert_eq!(extract_code(reply), "print(2)");
    }

    #[test]
    fn unfenced_reply_drops_title_line() {
        let reply = "Title: Add\nprint(1 + 1)\n";
        assert_eq!(extract_code(reply), "print(1 + 1)");
    }

    #[test]
    fn crlf_fences() {
        let reply = "Title: X\r\n```python\r\nprint(3)\r\n```\r\n";
        assert_eq!(extract_code(reply), "print(3)");
        assert_eq!(extract_title(reply).as_deref(), Some("X"));
    }
}

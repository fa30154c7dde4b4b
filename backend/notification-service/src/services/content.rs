//! Text helpers for turning ingested markup into push copy
//!
//! Tags are removed with a regex; block-level tags become line breaks so the
//! first line of the result is the post's lead. A `<` that does not open a tag
//! is kept as text.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Maximum push title length, in characters
pub const PUSH_TITLE_MAX: usize = 60;

/// Maximum push body length, in characters
pub const PUSH_BODY_MAX: usize = 160;

const ELLIPSIS: &str = "...";

const BLOCK_TAGS: &[&str] = &[
    "br", "p", "div", "li", "ul", "ol", "blockquote", "h1", "h2", "h3", "h4", "h5", "h6", "tr",
];

/// Comments, doctypes and opening/closing tags; group 1 is the tag name
static TAG_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<!--.*?-->|<!?/?([a-zA-Z][a-zA-Z0-9]*)(?:\s[^>]*)?/?>")
        .expect("Invalid markup tag regex")
});

/// Strip tags and decode the common entities
pub fn strip_markup(content: &str) -> String {
    let text = TAG_REGEX.replace_all(content, |caps: &Captures| {
        match caps.get(1) {
            Some(name) if is_block_tag(name.as_str()) => "\n",
            _ => "",
        }
    });

    let decoded = decode_entities(&text);

    decoded
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_block_tag(name: &str) -> bool {
    BLOCK_TAGS.contains(&name.to_ascii_lowercase().as_str())
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Push title from markup-free text.
///
/// Uses the first line; when longer than `PUSH_TITLE_MAX` it is cut after the
/// last sentence end inside the limit, or else at the last word boundary with
/// an ellipsis.
pub fn push_title(text: &str) -> String {
    let first_line = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");

    if first_line.chars().count() <= PUSH_TITLE_MAX {
        return first_line.to_string();
    }

    let head: String = first_line.chars().take(PUSH_TITLE_MAX).collect();
    if let Some(idx) = head.rfind(['.', '!', '?']) {
        if idx > 0 {
            return head[..=idx].to_string();
        }
    }

    truncate_words(first_line, PUSH_TITLE_MAX)
}

/// Truncate at a word boundary so the result, ellipsis included, fits in `max` chars
pub fn truncate_words(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }

    let budget = max.saturating_sub(ELLIPSIS.len());
    let cut: String = text.chars().take(budget).collect();
    let trimmed = match cut.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => cut[..idx].trim_end(),
        _ => cut.as_str(),
    };
    format!("{}{}", trimmed, ELLIPSIS)
}

/// Push body: the whole text on one line, word-truncated
pub fn push_body(text: &str) -> String {
    let flat = text.lines().collect::<Vec<_>>().join(" ");
    truncate_words(&flat, PUSH_BODY_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_markup_keeps_text_and_breaks_blocks() {
        let html = "<p>Breaking: <b>markets</b> rally</p><p>Second&nbsp;para &amp; more</p>";
        assert_eq!(
            strip_markup(html),
            "Breaking: markets rally\nSecond para & more"
        );
    }

    #[test]
    fn test_strip_markup_handles_br_and_attributes() {
        let html = r#"<a href="https://x.test">Link</a><br/>next <span class="x">line</span>"#;
        assert_eq!(strip_markup(html), "Link\nnext line");
    }

    #[test]
    fn test_strip_markup_keeps_literal_angle_brackets() {
        assert_eq!(
            strip_markup("Rates fall < 5% today. Markets calm"),
            "Rates fall < 5% today. Markets calm"
        );
        assert_eq!(strip_markup("<p>I <3 this team</p>"), "I <3 this team");
        assert_eq!(
            push_title(&strip_markup("I <3 this team. Big win tonight")),
            "I <3 this team. Big win tonight"
        );
    }

    #[test]
    fn test_strip_markup_drops_comments() {
        assert_eq!(strip_markup("<!-- lead -->Lead<hr>"), "Lead");
    }

    #[test]
    fn test_short_first_line_is_title() {
        assert_eq!(push_title("Short headline\nbody text"), "Short headline");
    }

    #[test]
    fn test_title_cut_at_sentence_end() {
        let text = "Parliament passes the budget. Opposition walks out in protest over cuts";
        let title = push_title(text);
        assert_eq!(title, "Parliament passes the budget.");
        assert!(title.chars().count() <= PUSH_TITLE_MAX);
    }

    #[test]
    fn test_title_cut_at_word_boundary() {
        let text = "An extraordinarily long headline without any sentence punctuation anywhere in it";
        let title = push_title(text);
        assert!(title.ends_with("..."));
        assert!(title.chars().count() <= PUSH_TITLE_MAX);
        assert!(!title.contains("punctuation anywhere"));
    }

    #[test]
    fn test_title_counts_characters_not_bytes() {
        let text = "é".repeat(70);
        let title = push_title(&text);
        assert!(title.chars().count() <= PUSH_TITLE_MAX);
    }

    #[test]
    fn test_push_body_flattens_lines() {
        assert_eq!(push_body("one\ntwo"), "one two");
        assert!(push_body(&"word ".repeat(100)).chars().count() <= PUSH_BODY_MAX);
    }
}

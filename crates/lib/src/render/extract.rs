//! Fenced code block extraction.

/// Delimiter that opens and closes a code block.
pub const FENCE: &str = "```";

/// Return the source inside the first fenced block of `text`, or None when there is no
/// complete block (fewer than two fences) or the block is empty.
///
/// The rest of the opening line is treated as a language tag (e.g. "latex") when a newline
/// follows it and it looks like a single word; it is never part of the source.
/// Surrounding whitespace is trimmed.
pub fn extract_code_block(text: &str) -> Option<&str> {
    let start = text.find(FENCE)? + FENCE.len();
    let rest = &text[start..];
    let end = rest.find(FENCE)?;
    let body = strip_language_tag(&rest[..end]).trim();
    if body.is_empty() {
        None
    } else {
        Some(body)
    }
}

fn strip_language_tag(inner: &str) -> &str {
    match inner.split_once('\n') {
        Some((first, rest)) if is_language_tag(first) => rest,
        _ => inner,
    }
}

fn is_language_tag(line: &str) -> bool {
    line.trim_end_matches('\r')
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latex_tag_is_excluded() {
        assert_eq!(extract_code_block(" ```latex\nE=mc^2\n```"), Some("E=mc^2"));
    }

    #[test]
    fn untagged_block() {
        assert_eq!(
            extract_code_block("```\n\\bad\\LaTeX{{{\n```"),
            Some("\\bad\\LaTeX{{{")
        );
    }

    #[test]
    fn single_line_block_keeps_everything() {
        assert_eq!(extract_code_block("```E=mc^2```"), Some("E=mc^2"));
    }

    #[test]
    fn no_backticks_is_no_match() {
        assert_eq!(extract_code_block("no backticks here"), None);
        assert_eq!(extract_code_block(""), None);
    }

    #[test]
    fn unterminated_block_is_no_match() {
        assert_eq!(extract_code_block("```latex\nE=mc^2"), None);
        assert_eq!(extract_code_block("only `` two and ` one"), None);
    }

    #[test]
    fn empty_block_is_no_match() {
        assert_eq!(extract_code_block("``````"), None);
        assert_eq!(extract_code_block("```latex\n\n```"), None);
    }

    #[test]
    fn only_first_block_is_used() {
        assert_eq!(
            extract_code_block("```\na\n``` then ```\nb\n```"),
            Some("a")
        );
    }

    #[test]
    fn first_line_with_source_is_not_a_tag() {
        assert_eq!(
            extract_code_block("```\\sum_i x_i\n= 1\n```"),
            Some("\\sum_i x_i\n= 1")
        );
    }

    #[test]
    fn any_tag_word_is_skipped() {
        assert_eq!(extract_code_block("```tex\r\nx^2\r\n```"), Some("x^2"));
        assert_eq!(extract_code_block("```math-block\nx^2\n```"), Some("x^2"));
    }

    #[test]
    fn text_around_block_is_ignored() {
        assert_eq!(
            extract_code_block("look: ```\na+b\n``` nice"),
            Some("a+b")
        );
    }
}

//! Source discovery from a markdown document
//!
//! Link destinations are pulled out of inline links (`[text](dest)`),
//! autolinks (`<scheme:dest>`) and reference links (`[text][label]`,
//! `[label][]`, `[label]` resolved against `[label]: dest` definitions).
//! Images, code spans, and fenced or indented code blocks are ignored.

use crate::error::{Error, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        #[allow(clippy::expect_used)]
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($regex).expect("literal pattern compiles"));
    };
}

regex!(
    DEFINITION_REGEX,
    r#"^ {0,3}\[([^\]]+)\]:[ \t]*<?([^\s>]+)>?(?:[ \t]+(?:"[^"]*"|'[^']*'|\([^)]*\)))?[ \t]*$"#
);
regex!(
    LINK_REGEX,
    r#"(!?)\[((?:[^\[\]]|\[[^\]]*\])*)\](?:\(\s*<?([^\s<>()]*)>?(?:\s+(?:"[^"]*"|'[^']*'))?\s*\)|\[([^\]]*)\])?|<([A-Za-z][A-Za-z0-9+.\-]{1,31}:[^\s<>]+)>"#
);
regex!(FENCE_REGEX, r"^ {0,3}(```|~~~)");
regex!(LIST_ITEM_REGEX, r"^ {0,3}(?:[-*+]|\d{1,9}[.)])(?:[ \t]|$)");

/// Read `path` and return every link destination ending with `suffix`
///
/// Destinations are returned in document order with duplicates preserved.
pub fn source_list(path: &Path, suffix: &str) -> Result<Vec<String>> {
    let markdown = std::fs::read_to_string(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read source document {}: {}", path.display(), e),
        ))
    })?;

    let links = parse_links(&markdown, suffix);
    tracing::debug!(
        document = %path.display(),
        count = links.len(),
        "Discovered package links"
    );
    Ok(links)
}

/// Every link destination in `markdown` ending with `suffix`, in document order
pub fn parse_links(markdown: &str, suffix: &str) -> Vec<String> {
    let body = strip_code_blocks(markdown);

    let mut definitions = HashMap::new();
    let mut text = String::with_capacity(body.len());
    for line in body.lines() {
        match DEFINITION_REGEX.captures(line) {
            Some(caps) => {
                // First definition of a label wins
                definitions
                    .entry(normalize_label(&caps[1]))
                    .or_insert_with(|| caps[2].to_string());
            }
            None => {
                text.push_str(line);
                text.push('\n');
            }
        }
    }

    let text = strip_code_spans(&text);
    let mut links = Vec::new();
    for caps in LINK_REGEX.captures_iter(&text) {
        if let Some(autolink) = caps.get(5) {
            links.push(autolink.as_str().to_string());
            continue;
        }
        if caps.get(1).is_some_and(|bang| !bang.as_str().is_empty()) {
            continue;
        }

        let destination = if let Some(inline) = caps.get(3) {
            Some(inline.as_str().to_string())
        } else {
            // Full `[text][label]`, collapsed `[label][]` or shortcut `[label]`
            let label = match caps.get(4) {
                Some(label) if !label.as_str().is_empty() => label.as_str(),
                _ => caps.get(2).map_or("", |m| m.as_str()),
            };
            definitions.get(&normalize_label(label)).cloned()
        };

        if let Some(destination) = destination {
            links.push(destination);
        }
    }

    links.retain(|link| link.ends_with(suffix));
    links
}

fn normalize_label(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Drop fenced code blocks and indented code blocks
///
/// An indented line only starts a code block after a blank line and outside a
/// list, where indentation continues the list item instead.
fn strip_code_blocks(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut fence: Option<&str> = None;
    let mut after_blank = true;
    let mut in_indented_code = false;
    let mut in_list = false;

    for line in markdown.lines() {
        let marker = FENCE_REGEX.captures(line).and_then(|c| c.get(1));
        match (fence, marker) {
            (None, Some(m)) => {
                fence = Some(m.as_str());
                continue;
            }
            (Some(open), Some(m)) if open == m.as_str() => {
                fence = None;
                after_blank = false;
                continue;
            }
            (Some(_), _) => continue,
            (None, None) => {}
        }

        let blank = line.trim().is_empty();
        let indented = !blank && indentation(line) >= 4;

        if indented && !in_list && (after_blank || in_indented_code) {
            in_indented_code = true;
            continue;
        }
        if !blank {
            in_indented_code = false;
            if LIST_ITEM_REGEX.is_match(line) {
                in_list = true;
            } else if !indented && after_blank {
                in_list = false;
            }
        }
        after_blank = blank;

        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Leading whitespace width, tabs counting to the next multiple of four
fn indentation(line: &str) -> usize {
    let mut width = 0;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width += 4 - width % 4,
            _ => break,
        }
    }
    width
}

/// Blank out backtick code spans, keeping unmatched backtick runs as text
fn strip_code_spans(text: &str) -> String {
    let bytes = text.as_bytes();
    let run_at = |i: usize| bytes[i..].iter().take_while(|&&b| b == b'`').count();

    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }
        let open = run_at(i);
        let mut j = i + open;
        let mut close = None;
        while j < bytes.len() {
            if bytes[j] == b'`' {
                let run = run_at(j);
                if run == open {
                    close = Some(j + run);
                    break;
                }
                j += run;
            } else {
                j += 1;
            }
        }
        match close {
            Some(end) => {
                out.push_str(&text[copied..i]);
                out.extend(text[i..end].chars().map(|c| if c == '\n' { '\n' } else { ' ' }));
                copied = end;
                i = end;
            }
            None => i += open,
        }
    }
    out.push_str(&text[copied..]);
    out
}

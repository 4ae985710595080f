//! Recovers the human-authored Info and Obtaining prose from existing page
//! markup, whichever generation of the template produced it. Never fails:
//! unrecognized input yields empty sections.

use crate::generate::{INFOBOX_TEMPLATE, SPOILER_WARNING};
use crate::model::Sections;

const INFO_HEADER_LABELS: [&str; 3] = ["Character", "Info", "Appearance"];
// Older pages carry the misspelling.
const OBTAINING_HEADER_LABELS: [&str; 2] = ["Obtaining", "Obataining"];
const CATEGORY_MARKER: &str = "[[Category:";
const BLOCK_CLOSE: &str = "</div";
const SPOILER_TABLE_OPEN: &str = "{|";
const SPOILER_TABLE_CLOSE: &str = "|}";
const SPOILER_TABLE_ROW: &str = "|-";
const SPOILER_DIV_PREFIX: &str = "<div class=\"mw-collapsible";
const DIV_CLOSE: &str = "</div>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionState {
    Outside,
    Info,
    Obtaining,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    pub sections: Sections,
    pub found_info_header: bool,
    pub found_obtaining_header: bool,
    pub used_hint_fallback: bool,
}

impl ParseOutcome {
    /// No recognizable structure at all; callers log this as a malformed page.
    pub fn is_unrecognized(&self) -> bool {
        !self.found_info_header && !self.found_obtaining_header && !self.used_hint_fallback
    }
}

pub fn parse(raw: &str) -> Sections {
    parse_detailed(raw).sections
}

pub fn parse_detailed(raw: &str) -> ParseOutcome {
    let lines: Vec<&str> = raw.lines().collect();
    let found_info_header = lines.iter().any(|line| is_info_header(line));
    let hint_fallback = if found_info_header {
        None
    } else {
        extract_infobox_hint(&lines)
    };

    let mut state = SectionState::Outside;
    let mut info: Vec<&str> = Vec::new();
    let mut obtaining: Vec<&str> = Vec::new();
    let mut found_obtaining_header = false;
    let mut in_spoiler_table = false;
    let mut saw_spoiler_table = false;

    for line in &lines {
        let trimmed = line.trim();

        if trimmed.starts_with(CATEGORY_MARKER) || trimmed.starts_with(BLOCK_CLOSE) {
            state = SectionState::Outside;
            in_spoiler_table = false;
            continue;
        }
        if is_info_header(trimmed) {
            state = SectionState::Info;
            info.clear();
            continue;
        }
        if is_obtaining_header(trimmed) {
            state = SectionState::Obtaining;
            found_obtaining_header = true;
            continue;
        }
        if is_other_header(trimmed) {
            state = SectionState::Outside;
            continue;
        }

        match state {
            SectionState::Outside => {}
            SectionState::Info => info.push(line),
            SectionState::Obtaining => {
                if let Some(rest) = spoiler_wrapper_remainder(trimmed) {
                    if !rest.is_empty() {
                        obtaining.push(rest);
                    }
                    continue;
                }
                if trimmed.starts_with(SPOILER_TABLE_OPEN) && trimmed.contains("mw-collapsible") {
                    in_spoiler_table = true;
                    saw_spoiler_table = true;
                    continue;
                }
                if in_spoiler_table {
                    if trimmed == SPOILER_TABLE_CLOSE {
                        in_spoiler_table = false;
                        continue;
                    }
                    if trimmed == SPOILER_TABLE_ROW || trimmed.starts_with('!') {
                        continue;
                    }
                    if let Some(cell) = trimmed.strip_prefix('|') {
                        obtaining.push(cell);
                        continue;
                    }
                }
                obtaining.push(line);
            }
        }
    }

    let mut info_text = info.join("\n").trim().to_string();
    let mut used_hint_fallback = false;
    if info_text.is_empty()
        && let Some(hint) = hint_fallback
    {
        info_text = hint;
        used_hint_fallback = true;
    }
    let obtaining_text =
        strip_trailing_artifacts(obtaining.join("\n").trim(), saw_spoiler_table);

    ParseOutcome {
        sections: Sections::new(info_text, obtaining_text),
        found_info_header,
        found_obtaining_header,
        used_hint_fallback,
    }
}

fn header_label(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.len() < 4 || !trimmed.starts_with("==") || !trimmed.ends_with("==") {
        return None;
    }
    let label = trimmed.trim_matches('=').trim();
    (!label.is_empty()).then_some(label)
}

fn header_matches(line: &str, labels: &[&str]) -> bool {
    header_label(line).is_some_and(|label| {
        let compact: String = label.chars().filter(|ch| !ch.is_whitespace()).collect();
        labels
            .iter()
            .any(|candidate| compact.eq_ignore_ascii_case(candidate))
    })
}

fn is_info_header(line: &str) -> bool {
    header_matches(line, &INFO_HEADER_LABELS)
}

fn is_obtaining_header(line: &str) -> bool {
    header_matches(line, &OBTAINING_HEADER_LABELS)
}

fn is_other_header(line: &str) -> bool {
    line.matches("==").count() >= 2
}

/// Body text left on a spoiler wrapper line once the warning and the
/// collapsible `<div>` tags are removed. `None` for ordinary lines. Older
/// pages put the whole body inline: `<div class="mw-collapsible-content">..</div>`.
fn spoiler_wrapper_remainder(trimmed: &str) -> Option<&str> {
    if trimmed == SPOILER_WARNING {
        return Some("");
    }
    if !trimmed.starts_with(SPOILER_DIV_PREFIX) {
        return None;
    }
    let mut rest = trimmed;
    while rest.starts_with(SPOILER_DIV_PREFIX) {
        rest = rest.split_once('>').map_or("", |(_, after)| after).trim_start();
    }
    while let Some(body) = rest.strip_suffix(DIV_CLOSE) {
        rest = body.trim_end();
    }
    Some(rest)
}

/// `|hint=` value from the infobox, used when a page has no info header.
/// Continuation lines belong to the hint until the next field or the
/// template close.
fn extract_infobox_hint(lines: &[&str]) -> Option<String> {
    let mut in_infobox = false;
    let mut hint: Option<Vec<String>> = None;

    for line in lines {
        let trimmed = line.trim();
        if !in_infobox {
            let Some(start) = trimmed
                .starts_with("{{")
                .then(|| trimmed.find(INFOBOX_TEMPLATE))
                .flatten()
            else {
                continue;
            };
            in_infobox = true;

            // Fields written on the opening line, as in `{{CharacterInfo|name=x|hint=y}}`.
            let (rest, closes) = split_template_close(&trimmed[start + INFOBOX_TEMPLATE.len()..]);
            let mut hint_ended = false;
            for field in rest.split('|').skip(1) {
                if hint.is_some() {
                    hint_ended = true;
                    break;
                }
                if let Some((key, value)) = field.split_once('=')
                    && key.trim().eq_ignore_ascii_case("hint")
                {
                    hint = Some(vec![value.trim().to_string()]);
                }
            }
            if closes || hint_ended {
                break;
            }
            continue;
        }

        if trimmed.starts_with("}}") {
            break;
        }
        let (body, closes) = split_template_close(trimmed);

        if let Some(field) = body.strip_prefix('|') {
            if hint.is_some() {
                break;
            }
            if let Some((key, value)) = field.split_once('=')
                && key.trim().eq_ignore_ascii_case("hint")
            {
                hint = Some(vec![value.trim().to_string()]);
            }
        } else if let Some(parts) = hint.as_mut() {
            parts.push(body.to_string());
        }

        if closes {
            break;
        }
    }

    hint.map(|parts| parts.join("\n").trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Splits a trailing `}}` that closes the template itself, not a nested one.
fn split_template_close(text: &str) -> (&str, bool) {
    match text.strip_suffix("}}") {
        Some(body) if !body.contains("{{") => (body.trim_end(), true),
        _ => (text, false),
    }
}

/// Drops leftover wrapper closers. `|}` only goes when a collapsible spoiler
/// table was opened; otherwise it closes a table the author wrote.
fn strip_trailing_artifacts(text: &str, strip_table_close: bool) -> String {
    let mut current = text.trim_end();
    loop {
        let next = current
            .strip_suffix(DIV_CLOSE)
            .or_else(|| {
                strip_table_close
                    .then(|| current.strip_suffix(SPOILER_TABLE_CLOSE))
                    .flatten()
            })
            .map(str::trim_end);
        match next {
            Some(stripped) => current = stripped,
            None => break,
        }
    }
    current.trim().to_string()
}

//! Text clean-up applied to generated fragments before and after stitching.

/// Remove a Markdown code fence wrapped around `text`.
///
/// Only the fence lines go; the code between them is returned untouched so
/// that leading indentation of a continuation survives.
pub fn strip_code_fences(text: &str) -> String {
    let mut body = text;

    let lead = body.trim_start();
    if lead.starts_with("```") {
        body = match lead.find('\n') {
            Some(i) => &lead[i + 1..],
            None => "",
        };
    }

    let tail = body.trim_end();
    if let Some(without) = tail.strip_suffix("```") {
        body = match without.rfind('\n') {
            Some(i) if without[i + 1..].trim().is_empty() => &without[..=i],
            _ if without.trim().is_empty() => "",
            _ => without,
        };
    }

    body.to_string()
}

/// Remove every occurrence of the stop sentinel.
///
/// Text without the sentinel comes back unchanged; otherwise trailing
/// whitespace left behind is collapsed to a single newline.
pub fn strip_stop_sentinel(text: &str, sentinel: &str) -> String {
    if sentinel.is_empty() || !text.contains(sentinel) {
        return text.to_string();
    }
    let mut out = text.replace(sentinel, "");
    out.truncate(out.trim_end().len());
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// A decorator line cut off before its closing bracket or quote.
fn is_open_decorator(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('@')
        && (t.matches('(').count() > t.matches(')').count()
            || t.matches('\'').count() % 2 == 1
            || t.matches('"').count() % 2 == 1)
}

/// Post-stitch tidy: re-join decorators split across the seam and drop
/// leading and trailing blank lines.
///
/// When a cut-off decorator is followed by a fresh decorator line the
/// fragment is dropped; otherwise the next line is appended to it.
pub fn tidy(code: &str) -> String {
    let mut lines: Vec<String> = Vec::new();

    for line in code.lines() {
        let trimmed = line.trim_start();
        let prev_open = lines.last().is_some_and(|p| is_open_decorator(p));

        if prev_open && !trimmed.is_empty() {
            if let Some(prev) = lines.last_mut() {
                if trimmed.starts_with('@') {
                    *prev = line.to_string();
                } else {
                    let joined = format!("{}{}", prev.trim_end(), trimmed);
                    *prev = joined;
                }
            }
            continue;
        }

        lines.push(line.to_string());
    }

    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    match (first, last) {
        (Some(first), Some(last)) => {
            let mut out = lines[first..=last].join("\n");
            out.push('\n');
            out
        }
        _ => String::new(),
    }
}

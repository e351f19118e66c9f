//! Bounded textual repairs for almost-JSON model output.
//!
//! The repair pass is a single scan: it never reorders content and never adds
//! values, it only closes what was left open and escapes what would otherwise
//! break the parser.

/// Strip a surrounding Markdown code fence (```` ```json ... ``` ````).
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Slice from the first `{` to the last `}`; to the end when no `}` follows.
pub fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    match text.rfind('}') {
        Some(end) if end > start => Some(&text[start..=end]),
        _ => Some(&text[start..]),
    }
}

/// Apply the repair set to `text` and return the candidate document.
///
/// Repairs, in scan order:
/// - commentary outside the outermost braces is dropped
/// - raw newlines and tabs inside strings are escaped, other control characters dropped
/// - a quote inside a string that is not followed by `,` `:` `}` `]` or end of input is escaped
/// - trailing commas before `}` or `]` are removed
/// - unmatched closers are dropped
/// - a truncated document is cut back to its last complete value, then closed
pub fn repair_json(text: &str) -> Option<String> {
    let body = outermost_object(strip_code_fence(text))?;
    let chars: Vec<char> = body.chars().collect();
    let mut out = String::with_capacity(body.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    // (output length, stack depth) just after the last complete value
    let mut safe: Option<(usize, usize)> = None;

    for (idx, &ch) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                out.push(ch);
                escaped = false;
                continue;
            }
            match ch {
                '\\' => {
                    out.push(ch);
                    escaped = true;
                }
                '"' => match next_significant(&chars[idx + 1..]) {
                    None | Some(',' | '}' | ']') => {
                        out.push('"');
                        in_string = false;
                        safe = Some((out.len(), stack.len()));
                    }
                    Some(':') => {
                        out.push('"');
                        in_string = false;
                    }
                    Some(_) => out.push_str("\\\""),
                },
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                c if c.is_control() => {}
                c => out.push(c),
            }
            continue;
        }

        match ch {
            '"' => {
                out.push(ch);
                in_string = true;
            }
            '{' => {
                out.push(ch);
                stack.push('}');
            }
            '[' => {
                out.push(ch);
                stack.push(']');
            }
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    drop_trailing_comma(&mut out);
                    out.push(ch);
                    stack.pop();
                    if stack.is_empty() {
                        return Some(out);
                    }
                    safe = Some((out.len(), stack.len()));
                }
            }
            c if c.is_control() && !c.is_whitespace() => {}
            c => out.push(c),
        }
    }

    if escaped {
        out.pop();
    }
    if in_string {
        out.push('"');
        safe = Some((out.len(), stack.len()));
    }
    // Truncated document: drop whatever dangles after the last complete value.
    if let Some((len, depth)) = safe {
        out.truncate(len);
        stack.truncate(depth);
    }
    while let Some(closer) = stack.pop() {
        drop_trailing_comma(&mut out);
        out.push(closer);
    }
    Some(out)
}

fn next_significant(rest: &[char]) -> Option<char> {
    rest.iter().copied().find(|c| !c.is_whitespace())
}

fn drop_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        out.truncate(trimmed_len - 1);
    }
}

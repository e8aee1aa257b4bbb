//! Placeholder expansion for command text
//!
//! `$NAME` and `${NAME}` are replaced when the lookup knows the variable.
//! Everything else is passed through for the shell: unknown variables,
//! positional parameters like `$5`, `$(...)` substitutions, escaped `\$`
//! and anything between single quotes.

/// Expand known placeholders in `text`
pub fn expand<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];
        let Some(c) = rest.chars().next() else {
            break;
        };

        match c {
            '\\' if !in_single => {
                // Keep the escape and whatever it escapes
                let escaped = rest[1..].chars().next().map(char::len_utf8).unwrap_or(0);
                out.push_str(&rest[..1 + escaped]);
                i += 1 + escaped;
                continue;
            }
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '$' if !in_single => {
                if let Some((name, consumed)) = placeholder(&rest[1..]) {
                    if let Some(value) = lookup(name) {
                        out.push_str(&value);
                        i += 1 + consumed;
                        continue;
                    }
                }
            }
            _ => {}
        }

        out.push(c);
        i += c.len_utf8();
    }

    out
}

/// Parse a variable name right after `$`, returning it and the bytes consumed
fn placeholder(after_dollar: &str) -> Option<(&str, usize)> {
    if let Some(braced) = after_dollar.strip_prefix('{') {
        let end = braced.find('}')?;
        let name = &braced[..end];
        return is_name(name).then_some((name, end + 2));
    }

    let end = after_dollar
        .char_indices()
        .find(|(idx, c)| !(c.is_ascii_alphanumeric() || *c == '_') || (*idx == 0 && c.is_ascii_digit()))
        .map(|(idx, _)| idx)
        .unwrap_or(after_dollar.len());
    let name = &after_dollar[..end];
    is_name(name).then_some((name, end))
}

fn is_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

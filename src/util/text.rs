use std::borrow::Cow;

/// Turn a markup fragment into a single line of readable text.
///
/// Tags are removed (each becomes a word break), character entities are
/// decoded, control characters dropped and runs of whitespace collapsed.
///
/// ```
/// use feedloom::util::strip_markup;
///
/// assert_eq!(strip_markup("<p>Fish &amp; <b>chips</b></p>"), "Fish & chips");
/// ```
pub fn strip_markup(s: &str) -> String {
    let mut text = String::with_capacity(s.len());
    let mut in_tag = false;

    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if in_tag => {}
            _ => text.push(c),
        }
    }

    let decoded = decode_entities(&text);
    let cleaned = strip_control_chars(&decoded);
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode named and numeric character references.
///
/// Unknown or malformed references are left as they are.
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp..];

        // Entity names are short; a distant ';' belongs to something else.
        let decoded = candidate[1..]
            .char_indices()
            .take(10)
            .find(|&(_, c)| c == ';')
            .and_then(|(end, _)| {
                let name = &candidate[1..=end];
                entity(name).map(|c| (c, end + 2))
            });

        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &candidate[consumed..];
            }
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        "hellip" => Some('…'),
        "mdash" => Some('—'),
        "ndash" => Some('–'),
        "rsquo" => Some('’'),
        "lsquo" => Some('‘'),
        "rdquo" => Some('”'),
        "ldquo" => Some('“'),
        _ => {
            let numeric = name.strip_prefix('#')?;
            let hex = numeric.strip_prefix('x').or_else(|| numeric.strip_prefix('X'));
            let code = match hex {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Remove control characters other than tab, newline and carriage return.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let keep = |c: char| !c.is_control() || matches!(c, '\t' | '\n' | '\r');
    if s.chars().all(keep) {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(s.chars().filter(|&c| keep(c)).collect())
    }
}

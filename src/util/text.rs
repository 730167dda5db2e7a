use std::borrow::Cow;

/// Returns true for bytes that must never reach a channel file.
///
/// Tab, newline and carriage return are kept here; [`collapse_whitespace`]
/// folds them afterwards.
fn is_unsafe_byte(b: u8) -> bool {
    b == 0x1b || b == 0x7f || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r')
}

/// SEC-001: Strip terminal control characters and ANSI escape sequences.
///
/// Channel files are meant to be tailed in a terminal, so feed-controlled text
/// must not be able to move the cursor, retitle the window or ring the bell.
///
/// Removes C0 controls (except tab, newline, CR), DEL, CSI sequences
/// (`ESC [` ... final byte `0x40..=0x7E`), OSC sequences (`ESC ]` ... BEL or
/// `ESC \`) and any bare ESC.
///
/// Returns `Cow::Borrowed` when nothing needs removing.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.bytes().any(is_unsafe_byte) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.peek() {
                Some('[') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&c) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\x07' {
                            break;
                        }
                        if c == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            },
            c if c.is_ascii() && is_unsafe_byte(c as u8) => {}
            c => out.push(c),
        }
    }

    Cow::Owned(out)
}

/// Trims `s` and folds every internal run of whitespace into a single space.
///
/// Newlines inside feed text would otherwise split one record across several
/// channel lines.
pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for word in s.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Normalizes feed text into a single safe channel line.
pub fn clean_line(s: &str) -> String {
    collapse_whitespace(&strip_control_chars(s))
}

//! Comment stripping for JSONC text.
//!
//! Single left-to-right pass with one character of lookahead. Modes are
//! mutually exclusive: code, string, line comment, block comment. The escape
//! flag only matters inside strings, so `"a \" // b"` stays intact.
//!
//! Comment characters are dropped. Newlines are always kept, including the
//! ones inside block comments, so line numbers reported by the JSON parser
//! still point at the original file.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    InString,
    LineComment,
    BlockComment,
}

pub fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut mode = Mode::Code;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        match mode {
            Mode::Code => match c {
                '"' => {
                    mode = Mode::InString;
                    out.push(c);
                }
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    mode = Mode::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    mode = Mode::BlockComment;
                }
                _ => out.push(c),
            },
            Mode::InString => {
                out.push(c);
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    mode = Mode::Code;
                }
            }
            Mode::LineComment => {
                if c == '\n' {
                    out.push(c);
                    mode = Mode::Code;
                }
            }
            Mode::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    mode = Mode::Code;
                } else if c == '\n' {
                    out.push(c);
                }
            }
        }
    }

    out
}

//! Bundle minification.
//!
//! Two passes over the emitted JavaScript:
//!
//! 1. strip `/* */` and `//` comments, leaving string, template and regex
//!    literals untouched and keeping every newline;
//! 2. trim indentation and drop blank lines, except for lines that start
//!    inside a template literal.
//!
//! Newlines are never joined, so automatic semicolon insertion behaves the
//! same before and after, and line-level source maps can follow each kept
//! line back to where it came from.
//!
//! The output is deterministic.

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    AfterSlash,
    InString(char),
    InStringEscape(char),
    InRegex { in_class: bool },
    InRegexEscape { in_class: bool },
    InBlockComment,
    InBlockCommentEnd,
    InLineComment,
}

const REGEX_PRECEDERS: &[char] = &[
    '(', ',', '=', ':', '[', '!', '&', '|', '?', '{', '}', ';', '+', '-', '*', '%', '<', '>',
    '~', '^',
];

const REGEX_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "void", "throw", "new", "delete",
    "yield", "await",
];

/// Output of the comment-stripping pass.
struct Stripped {
    code: String,
    /// For every line of `code`, whether it begins inside a template literal.
    starts_in_template: Vec<bool>,
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'
}

/// Whether a `/` following `before` starts a regular expression literal.
fn slash_starts_regex(before: &str) -> bool {
    let trimmed = before.trim_end();
    let Some(last) = trimmed.chars().last() else {
        return true;
    };
    if REGEX_PRECEDERS.contains(&last) {
        return true;
    }
    if is_word_char(last) {
        let word_start = trimmed
            .char_indices()
            .rev()
            .take_while(|&(_, c)| is_word_char(c))
            .last()
            .map_or(0, |(i, _)| i);
        return REGEX_KEYWORDS.contains(&&trimmed[word_start..]);
    }
    false
}

fn strip(input: &str) -> Stripped {
    let mut code = String::with_capacity(input.len());
    let mut starts_in_template = vec![false];
    let mut state = State::Normal;

    for ch in input.chars() {
        match state {
            State::Normal => {
                match ch {
                    '"' | '\'' | '`' => state = State::InString(ch),
                    '/' => state = State::AfterSlash,
                    _ => {}
                }
                code.push(ch);
            }
            State::AfterSlash => match ch {
                '*' => {
                    code.pop();
                    state = State::InBlockComment;
                }
                '/' => {
                    code.pop();
                    state = State::InLineComment;
                }
                _ => {
                    let before = &code[..code.len() - 1];
                    if slash_starts_regex(before) {
                        state = match ch {
                            '\\' => State::InRegexEscape { in_class: false },
                            '[' => State::InRegex { in_class: true },
                            _ => State::InRegex { in_class: false },
                        };
                    } else {
                        state = match ch {
                            '"' | '\'' | '`' => State::InString(ch),
                            _ => State::Normal,
                        };
                    }
                    code.push(ch);
                }
            },
            State::InString(quote) => {
                code.push(ch);
                if ch == '\\' {
                    state = State::InStringEscape(quote);
                } else if ch == quote {
                    state = State::Normal;
                } else if ch == '\n' && quote != '`' {
                    // Unterminated literal; resync at the line break.
                    state = State::Normal;
                }
            }
            State::InStringEscape(quote) => {
                code.push(ch);
                state = State::InString(quote);
            }
            State::InRegex { in_class } => {
                code.push(ch);
                state = match ch {
                    '\\' => State::InRegexEscape { in_class },
                    '[' => State::InRegex { in_class: true },
                    ']' => State::InRegex { in_class: false },
                    '/' if !in_class => State::Normal,
                    '\n' => State::Normal,
                    _ => State::InRegex { in_class },
                };
            }
            State::InRegexEscape { in_class } => {
                code.push(ch);
                state = State::InRegex { in_class };
            }
            State::InBlockComment => match ch {
                '*' => state = State::InBlockCommentEnd,
                '\n' => code.push('\n'),
                _ => {}
            },
            State::InBlockCommentEnd => match ch {
                '/' => {
                    // Keep tokens on either side of the comment apart.
                    if !code.ends_with(char::is_whitespace) && !code.is_empty() {
                        code.push(' ');
                    }
                    state = State::Normal;
                }
                '*' => {}
                '\n' => {
                    code.push('\n');
                    state = State::InBlockComment;
                }
                _ => state = State::InBlockComment,
            },
            State::InLineComment => {
                if ch == '\n' {
                    code.push('\n');
                    state = State::Normal;
                }
            }
        }

        if ch == '\n' {
            starts_in_template.push(matches!(
                state,
                State::InString('`') | State::InStringEscape('`')
            ));
        }
    }

    Stripped {
        code,
        starts_in_template,
    }
}

/// Remove comments, keeping newlines and literal contents.
#[must_use]
pub fn strip_comments(input: &str) -> String {
    strip(input).code
}

/// Minify `input`, returning each kept line with its zero-based line number
/// in `input`.
#[must_use]
pub fn compact_lines(input: &str) -> Vec<(usize, String)> {
    let stripped = strip(input);
    let mut out = Vec::new();

    for (idx, line) in stripped.code.split('\n').enumerate() {
        let in_template = stripped.starts_in_template.get(idx).copied().unwrap_or(false);
        if in_template {
            out.push((idx, line.trim_end_matches('\r').to_string()));
            continue;
        }
        let ends_in_template = stripped
            .starts_in_template
            .get(idx + 1)
            .copied()
            .unwrap_or(false);
        let trimmed = if ends_in_template {
            line.trim_start()
        } else {
            line.trim()
        };
        if !trimmed.is_empty() {
            out.push((idx, trimmed.to_string()));
        }
    }

    out
}

/// Minify `input`.
#[must_use]
pub fn minify(input: &str) -> String {
    let lines = compact_lines(input);
    let mut out = String::with_capacity(input.len() / 2);
    for (i, (_, line)) in lines.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}

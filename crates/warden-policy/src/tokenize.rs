//! POSIX-like command line tokenizer.

use thiserror::Error;

/// A command line that could not be split into words.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenizeError {
    /// A quote was opened but never closed.
    #[error("unterminated {0} quote")]
    UnterminatedQuote(&'static str),
    /// The line ended with a lone backslash.
    #[error("trailing backslash")]
    TrailingBackslash,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Plain,
    Single,
    Double,
}

/// Split `line` into words.
///
/// Single quotes are literal. Inside double quotes a backslash escapes
/// `"`, `\`, `$` and `` ` ``; anywhere else it is kept. Outside quotes a
/// backslash escapes the next character. Adjacent quoted and unquoted
/// segments join into one word.
///
/// # Errors
///
/// Returns [`TokenizeError`] on an unterminated quote or trailing backslash.
pub fn tokenize(line: &str) -> Result<Vec<String>, TokenizeError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut state = State::Plain;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match state {
            State::Plain => match c {
                '\'' => {
                    state = State::Single;
                    in_word = true;
                },
                '"' => {
                    state = State::Double;
                    in_word = true;
                },
                '\\' => {
                    let next = chars.next().ok_or(TokenizeError::TrailingBackslash)?;
                    current.push(next);
                    in_word = true;
                },
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                },
                c => {
                    current.push(c);
                    in_word = true;
                },
            },
            State::Single => {
                if c == '\'' {
                    state = State::Plain;
                } else {
                    current.push(c);
                }
            },
            State::Double => match c {
                '"' => state = State::Plain,
                '\\' => {
                    let next = chars
                        .next()
                        .ok_or(TokenizeError::UnterminatedQuote("double"))?;
                    if !matches!(next, '"' | '\\' | '$' | '`') {
                        current.push('\\');
                    }
                    current.push(next);
                },
                c => current.push(c),
            },
        }
    }

    match state {
        State::Single => Err(TokenizeError::UnterminatedQuote("single")),
        State::Double => Err(TokenizeError::UnterminatedQuote("double")),
        State::Plain => {
            if in_word {
                words.push(current);
            }
            Ok(words)
        },
    }
}

//! Parser for compiler-emitted dependency files.
//!
//! Handles the Makefile subset compilers write with `-MD`/`-MMD`:
//!
//! ```text
//! obj/a.o: src/a.cpp \
//!   src/a.h   include/common.h
//! ```
//!
//! Only the first rule is read; the empty phony rules that `-MP` appends for
//! each header are ignored.

use std::path::{Path, PathBuf};

use crate::error::LedgerError;

/// The parsed first rule of a dependency file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepFile {
    /// The left-hand side of the rule, usually the object file.
    pub target: PathBuf,
    /// Every prerequisite in order of appearance.
    pub dependencies: Vec<PathBuf>,
}

/// Reads and parses a dependency file.
pub fn parse_dependency_file(path: &Path) -> Result<DepFile, LedgerError> {
    let text = std::fs::read_to_string(path).map_err(|e| LedgerError::DepFileParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_tokens(tokenize(&text)).map_err(|reason| LedgerError::DepFileParse {
        path: path.to_path_buf(),
        reason,
    })
}

/// Parses dependency-file text already in memory.
pub fn parse_dependency_str(text: &str) -> Result<DepFile, LedgerError> {
    parse_tokens(tokenize(text)).map_err(|reason| LedgerError::DepFileParse {
        path: PathBuf::new(),
        reason,
    })
}

fn parse_tokens(tokens: Vec<String>) -> Result<DepFile, String> {
    let mut tokens = tokens.into_iter().peekable();
    let first = tokens.next().ok_or("no target found")?;

    let target = if let Some(stripped) = first.strip_suffix(':').filter(|t| !t.is_empty()) {
        stripped.to_string()
    } else if tokens.peek().map(String::as_str) == Some(":") {
        tokens.next();
        first
    } else {
        return Err(format!("missing ':' after target '{first}'"));
    };

    let dependencies = tokens
        .take_while(|t| !t.ends_with(':'))
        .map(PathBuf::from)
        .collect();

    Ok(DepFile {
        target: PathBuf::from(target),
        dependencies,
    })
}

/// Splits on unescaped whitespace, folding line continuations and
/// unescaping `\ `, `\#` and `$$`.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some('\n') => {
                    chars.next();
                    flush(&mut current, &mut tokens);
                }
                Some('\r') => {
                    chars.next();
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    flush(&mut current, &mut tokens);
                }
                Some(' ' | '#') => {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                }
                None => flush(&mut current, &mut tokens),
                Some(_) => current.push('\\'),
            },
            '$' if chars.peek() == Some(&'$') => {
                chars.next();
                current.push('$');
            }
            c if c.is_whitespace() => flush(&mut current, &mut tokens),
            c => current.push(c),
        }
    }
    flush(&mut current, &mut tokens);
    tokens
}

fn flush(current: &mut String, tokens: &mut Vec<String>) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("Unexpected character '{character}' at line {line}")]
    UnexpectedCharacter { character: char, line: usize },
    #[error("Unterminated string literal at line {line}")]
    UnterminatedString { line: usize },
    #[error("Invalid number literal '{literal}' at line {line}")]
    InvalidNumberLiteral { literal: String, line: usize },
}

impl LexError {
    pub fn line(&self) -> usize {
        match self {
            LexError::UnexpectedCharacter { line, .. }
            | LexError::UnterminatedString { line }
            | LexError::InvalidNumberLiteral { line, .. } => *line,
        }
    }
}

pub type LexResult<T> = Result<T, LexError>;

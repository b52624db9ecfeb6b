use std::{iter::Peekable, str::CharIndices};

use crate::token::{Span, Token, TokenKind};

pub mod error;

pub use error::{LexError, LexResult};

/// Tokenizer for the expression grammar. Statement-level template syntax is
/// parsed by an external frontend; only expressions reach this lexer.
pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    line: usize,
    line_start: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            line: 1,
            line_start: 0,
        }
    }

    pub fn next_token(&mut self) -> LexResult<Token<'a>> {
        self.skip_whitespace();

        let Some(&(start, character)) = self.chars.peek() else {
            return Ok(Token::new(TokenKind::EOF, self.span_at(self.input.len())));
        };

        if character.is_ascii_digit() {
            return self.lex_number(start);
        }
        if character.is_alphabetic() || character == '_' {
            return self.lex_identifier(start);
        }
        if character == '\'' || character == '"' {
            return self.lex_string(start, character);
        }
        self.lex_operator(start, character)
    }

    fn skip_whitespace(&mut self) {
        while let Some(&(index, character)) = self.chars.peek() {
            if character == '\n' {
                self.chars.next();
                self.line += 1;
                self.line_start = index + 1;
            } else if character.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }
    }

    fn lex_number(&mut self, start: usize) -> LexResult<Token<'a>> {
        let mut end = start;
        let mut is_float = false;
        while let Some(&(index, character)) = self.chars.peek() {
            if character.is_ascii_digit() {
                end = index + character.len_utf8();
                self.chars.next();
            } else if character == '.' && !is_float && self.second_is_digit() {
                is_float = true;
                end = index + 1;
                self.chars.next();
            } else {
                break;
            }
        }

        let literal = &self.input[start..end];
        let span = self.span(start, end);
        if is_float {
            let value = literal
                .parse::<f64>()
                .map_err(|_| LexError::InvalidNumberLiteral {
                    literal: literal.to_string(),
                    line: self.line,
                })?;
            Ok(Token::new(TokenKind::Float(value), span))
        } else {
            let value = literal
                .parse::<i64>()
                .map_err(|_| LexError::InvalidNumberLiteral {
                    literal: literal.to_string(),
                    line: self.line,
                })?;
            Ok(Token::new(TokenKind::Integer(value), span))
        }
    }

    /// True when the character after the current one is a digit, so `1.5`
    /// lexes as a float while `xs.0` never reaches this path.
    fn second_is_digit(&self) -> bool {
        let mut ahead = self.chars.clone();
        ahead.next();
        matches!(ahead.peek(), Some(&(_, character)) if character.is_ascii_digit())
    }

    fn lex_identifier(&mut self, start: usize) -> LexResult<Token<'a>> {
        let mut end = start;
        while let Some(&(index, character)) = self.chars.peek() {
            if character.is_alphanumeric() || character == '_' {
                end = index + character.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }

        let word = &self.input[start..end];
        let kind = match word {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "in" => TokenKind::In,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "true" | "True" => TokenKind::True,
            "false" | "False" => TokenKind::False,
            "none" | "None" => TokenKind::None,
            _ => TokenKind::Identifier(word),
        };
        Ok(Token::new(kind, self.span(start, end)))
    }

    fn lex_string(&mut self, start: usize, quote: char) -> LexResult<Token<'a>> {
        self.chars.next();
        while let Some((index, character)) = self.chars.next() {
            if character == '\\' {
                self.chars.next();
            } else if character == '\n' {
                self.line += 1;
                self.line_start = index + 1;
            } else if character == quote {
                let contents = &self.input[start + 1..index];
                return Ok(Token::new(
                    TokenKind::String(contents),
                    self.span(start, index + 1),
                ));
            }
        }
        Err(LexError::UnterminatedString { line: self.line })
    }

    fn lex_operator(&mut self, start: usize, character: char) -> LexResult<Token<'a>> {
        self.chars.next();
        let kind = match character {
            '=' => {
                if self.eat('=') {
                    TokenKind::Eq
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.eat('=') {
                    TokenKind::Ne
                } else {
                    return Err(LexError::UnexpectedCharacter {
                        character,
                        line: self.line,
                    });
                }
            }
            '<' => {
                if self.eat('=') {
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            '*' => {
                if self.eat('*') {
                    TokenKind::Pow
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                if self.eat('/') {
                    TokenKind::FloorDiv
                } else {
                    TokenKind::Slash
                }
            }
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '%' => TokenKind::Percent,
            '~' => TokenKind::Tilde,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            ':' => TokenKind::Colon,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            _ => {
                return Err(LexError::UnexpectedCharacter {
                    character,
                    line: self.line,
                });
            }
        };

        let end = match self.chars.peek() {
            Some(&(index, _)) => index,
            Option::None => self.input.len(),
        };
        Ok(Token::new(kind, self.span(start, end)))
    }

    fn eat(&mut self, expected: char) -> bool {
        if matches!(self.chars.peek(), Some(&(_, character)) if character == expected) {
            self.chars.next();
            return true;
        }
        false
    }

    fn span(&self, start: usize, end: usize) -> Span {
        Span {
            start,
            end,
            line: self.line,
            column: start - self.line_start,
        }
    }

    fn span_at(&self, index: usize) -> Span {
        self.span(index, index)
    }
}

/// Tokenizes a full input string, excluding the trailing EOF marker.
pub fn tokenize(input: &str) -> LexResult<Vec<Token<'_>>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        if matches!(token.kind, TokenKind::EOF) {
            return Ok(tokens);
        }
        tokens.push(token);
    }
}

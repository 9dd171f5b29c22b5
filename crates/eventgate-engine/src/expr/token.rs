//! Tokenizer for the trigger expression language.

use crate::errors::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String), // dotted identifier path
    Str(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    Eq,       // ==
    Ne,       // !=
    Gt,       // >
    Lt,       // <
    Ge,       // >=
    Le,       // <=
    And,      // &&
    Or,       // ||
    Not,      // !
    In,       // in
    Plus,     // +
    Minus,    // -
    Star,     // *
    Slash,    // /
    Percent,  // %
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    Comma,    // ,
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '=' if peek(&chars, i + 1) == Some('=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if peek(&chars, i + 1) == Some('=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' if peek(&chars, i + 1) == Some('=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '<' if peek(&chars, i + 1) == Some('=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '&' if peek(&chars, i + 1) == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if peek(&chars, i + 1) == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '"' | '\'' => {
                let quote = chars[i];
                i += 1;
                let mut s = String::new();
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(ExprError::Parse {
                                message: "unterminated string literal".into(),
                            })
                        }
                        Some(&c) if c == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = peek(&chars, i + 1).ok_or_else(|| ExprError::Parse {
                                message: "unterminated escape sequence".into(),
                            })?;
                            s.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                            i += 2;
                        }
                        Some(&c) => {
                            s.push(c);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut is_double = false;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if peek(&chars, i) == Some('.')
                    && peek(&chars, i + 1).is_some_and(|c| c.is_ascii_digit())
                {
                    is_double = true;
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                if matches!(peek(&chars, i), Some('e') | Some('E')) {
                    is_double = true;
                    i += 1;
                    if matches!(peek(&chars, i), Some('+') | Some('-')) {
                        i += 1;
                    }
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                if is_double {
                    let value: f64 = text.parse().map_err(|_| ExprError::Parse {
                        message: format!("invalid number: {text}"),
                    })?;
                    tokens.push(Token::Double(value));
                } else {
                    let value: i64 = text.parse().map_err(|_| ExprError::Parse {
                        message: format!("invalid integer: {text}"),
                    })?;
                    tokens.push(Token::Int(value));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                match ident.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    "in" => tokens.push(Token::In),
                    _ => tokens.push(Token::Ident(ident)),
                }
            }
            other => {
                return Err(ExprError::Parse {
                    message: format!("unexpected character: {other}"),
                })
            }
        }
    }
    Ok(tokens)
}

fn peek(chars: &[char], idx: usize) -> Option<char> {
    chars.get(idx).copied()
}

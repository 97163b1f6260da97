//! Tokenizer for the guard expression language.

use super::ExpressionError;

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    AndAnd,
    OrOr,
    Bang,
}

/// A token with its byte offset in the source, used for error messages.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

/// Split an expression into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens: Vec<Spanned> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            // Directly after a dot we only read an integer so `items.0.1` stays a path
            let after_dot = matches!(tokens.last(), Some(Spanned { token: Token::Dot, .. }));
            let start = i;
            while i < chars.len() && chars[i].1.is_ascii_digit() {
                i += 1;
            }
            let mut is_float = false;
            if !after_dot
                && i + 1 < chars.len()
                && chars[i].1 == '.'
                && chars[i + 1].1.is_ascii_digit()
            {
                is_float = true;
                i += 1;
                while i < chars.len() && chars[i].1.is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
            let token = if is_float {
                Token::Float(text.parse().map_err(|_| ExpressionError::Lex {
                    offset,
                    message: format!("invalid number '{text}'"),
                })?)
            } else {
                Token::Int(text.parse().map_err(|_| ExpressionError::Lex {
                    offset,
                    message: format!("integer '{text}' out of range"),
                })?)
            };
            tokens.push(Spanned { token, offset });
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            let text: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
            tokens.push(Spanned { token: Token::Ident(text), offset });
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            let mut value = String::new();
            i += 1;
            let mut closed = false;
            while i < chars.len() {
                let ch = chars[i].1;
                if ch == quote {
                    closed = true;
                    i += 1;
                    break;
                }
                if ch == '\\' && i + 1 < chars.len() {
                    let escaped = chars[i + 1].1;
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                    i += 2;
                    continue;
                }
                value.push(ch);
                i += 1;
            }
            if !closed {
                return Err(ExpressionError::Lex {
                    offset,
                    message: "unterminated string literal".to_string(),
                });
            }
            tokens.push(Spanned { token: Token::Str(value), offset });
            continue;
        }

        let next = chars.get(i + 1).map(|(_, ch)| *ch);
        let (token, width) = match (c, next) {
            ('=', Some('=')) => (Token::Eq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::LtEq, 2),
            ('>', Some('=')) => (Token::GtEq, 2),
            ('&', Some('&')) => (Token::AndAnd, 2),
            ('|', Some('|')) => (Token::OrOr, 2),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('!', _) => (Token::Bang, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            (',', _) => (Token::Comma, 1),
            ('.', _) => (Token::Dot, 1),
            _ => {
                return Err(ExpressionError::Lex {
                    offset,
                    message: format!("unexpected character '{c}'"),
                })
            }
        };
        tokens.push(Spanned { token, offset });
        i += width;
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_tokenize_comparison() {
        assert_eq!(
            kinds("state.data.score >= 0.8"),
            vec![
                Token::Ident("state".into()),
                Token::Dot,
                Token::Ident("data".into()),
                Token::Dot,
                Token::Ident("score".into()),
                Token::GtEq,
                Token::Float(0.8),
            ]
        );
    }

    #[test]
    fn test_tokenize_index_path_stays_integer() {
        assert_eq!(
            kinds("items.0.1"),
            vec![
                Token::Ident("items".into()),
                Token::Dot,
                Token::Int(0),
                Token::Dot,
                Token::Int(1),
            ]
        );
    }

    #[test]
    fn test_tokenize_strings_with_escapes() {
        assert_eq!(kinds(r#"'it\'s' "two""#), vec![Token::Str("it's".into()), Token::Str("two".into())]);
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        assert!(matches!(tokenize("'open"), Err(ExpressionError::Lex { .. })));
    }

    #[test]
    fn test_unknown_character_is_an_error() {
        assert!(tokenize("a ^ b").is_err());
    }
}

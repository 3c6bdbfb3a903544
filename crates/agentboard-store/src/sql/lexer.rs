use agentboard_core::{AgentboardError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifiers and keywords; keywords are matched case-insensitively by the parser.
    Ident(String),
    Number(f64),
    Str(String),
    /// `@name`, stored with the leading `@`.
    Param(String),
    Comma,
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Star,
    Minus,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A token with its byte span in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(name) if name.eq_ignore_ascii_case(keyword))
    }

    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(name) => Some(name),
            _ => None,
        }
    }
}

pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        // `--` line comments
        if c == b'-' && bytes.get(pos + 1) == Some(&b'-') {
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
            continue;
        }

        let start = pos;
        let kind = match c {
            b',' => {
                pos += 1;
                TokenKind::Comma
            }
            b'.' if !bytes.get(pos + 1).is_some_and(u8::is_ascii_digit) => {
                pos += 1;
                TokenKind::Dot
            }
            b'(' => {
                pos += 1;
                TokenKind::LParen
            }
            b')' => {
                pos += 1;
                TokenKind::RParen
            }
            b'[' => {
                pos += 1;
                TokenKind::LBracket
            }
            b']' => {
                pos += 1;
                TokenKind::RBracket
            }
            b'*' => {
                pos += 1;
                TokenKind::Star
            }
            b'-' => {
                pos += 1;
                TokenKind::Minus
            }
            b'=' => {
                pos += 1;
                TokenKind::Eq
            }
            b'!' if bytes.get(pos + 1) == Some(&b'=') => {
                pos += 2;
                TokenKind::Neq
            }
            b'<' => match bytes.get(pos + 1) {
                Some(b'=') => {
                    pos += 2;
                    TokenKind::Le
                }
                Some(b'>') => {
                    pos += 2;
                    TokenKind::Neq
                }
                _ => {
                    pos += 1;
                    TokenKind::Lt
                }
            },
            b'>' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    pos += 2;
                    TokenKind::Ge
                } else {
                    pos += 1;
                    TokenKind::Gt
                }
            }
            b'\'' | b'"' => {
                let (value, next) = read_string(input, pos)?;
                pos = next;
                TokenKind::Str(value)
            }
            b'@' => {
                pos += 1;
                let name_start = pos;
                while pos < bytes.len() && is_ident_byte(bytes[pos]) {
                    pos += 1;
                }
                if pos == name_start {
                    return Err(AgentboardError::query(format!(
                        "empty parameter name at offset {start}"
                    )));
                }
                TokenKind::Param(input[start..pos].to_string())
            }
            b'0'..=b'9' | b'.' => {
                let (value, next) = read_number(input, pos)?;
                pos = next;
                TokenKind::Number(value)
            }
            c if c.is_ascii_alphabetic() || c == b'_' || c == b'$' => {
                while pos < bytes.len() && is_ident_byte(bytes[pos]) {
                    pos += 1;
                }
                TokenKind::Ident(input[start..pos].to_string())
            }
            _ => {
                let ch = input[pos..].chars().next().unwrap_or('?');
                return Err(AgentboardError::query(format!(
                    "unexpected character '{ch}' at offset {pos}"
                )));
            }
        };
        tokens.push(Token {
            kind,
            start,
            end: pos,
        });
    }

    Ok(tokens)
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn read_string(input: &str, start: usize) -> Result<(String, usize)> {
    let quote = input.as_bytes()[start] as char;
    let mut out = String::new();
    let mut chars = input[start + 1..].char_indices();
    while let Some((offset, ch)) = chars.next() {
        match ch {
            '\\' => {
                let (_, escaped) = chars.next().ok_or_else(|| {
                    AgentboardError::query(format!("unterminated string at offset {start}"))
                })?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            }
            c if c == quote => return Ok((out, start + 1 + offset + 1)),
            c => out.push(c),
        }
    }
    Err(AgentboardError::query(format!(
        "unterminated string at offset {start}"
    )))
}

fn read_number(input: &str, start: usize) -> Result<(f64, usize)> {
    let bytes = input.as_bytes();
    let mut pos = start;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos < bytes.len() && bytes[pos] == b'.' {
        pos += 1;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
        let mut exp = pos + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            pos = exp;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
        }
    }
    let text = &input[start..pos];
    text.parse::<f64>()
        .map(|value| (value, pos))
        .map_err(|_| AgentboardError::query(format!("invalid number '{text}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenizes_select() {
        let tokens = kinds("SELECT * FROM c WHERE c.age >= 21.5 AND c[\"from\"] <> @who");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Ident("SELECT".into()),
                TokenKind::Star,
                TokenKind::Ident("FROM".into()),
                TokenKind::Ident("c".into()),
                TokenKind::Ident("WHERE".into()),
                TokenKind::Ident("c".into()),
                TokenKind::Dot,
                TokenKind::Ident("age".into()),
                TokenKind::Ge,
                TokenKind::Number(21.5),
                TokenKind::Ident("AND".into()),
                TokenKind::Ident("c".into()),
                TokenKind::LBracket,
                TokenKind::Str("from".into()),
                TokenKind::RBracket,
                TokenKind::Neq,
                TokenKind::Param("@who".into()),
            ]
        );
    }

    #[test]
    fn strings_keep_keywords_inert_and_spans_are_bytes() {
        let tokens = tokenize("c.note = 'where it\\'s at'").unwrap();
        assert_eq!(tokens[4].kind, TokenKind::Str("where it's at".into()));
        assert_eq!(tokens[4].start, 9);
        assert_eq!(tokens[4].end, 25);
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(tokenize("SELECT * FROM c WHERE c.a = 'oops").is_err());
    }

    #[test]
    fn rejects_stray_characters() {
        assert!(tokenize("SELECT # FROM c").is_err());
    }
}

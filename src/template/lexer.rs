//! Template Lexer
//!
//! Splits template source into text runs and actions, applying `{{-` / `-}}`
//! whitespace trimming and dropping `{{/* … */}}` comments. Action bodies are
//! tokenized separately.

use serde_json::Number;

use super::TemplateError;

// ------------------------------------------------------------- Public Types

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    /// `.Name.Other`; empty for the bare `.`.
    Field(Vec<String>),
    /// `$name.Field`; the name excludes the sigil and is empty for `$`.
    Variable(String, Vec<String>),
    /// `.Field` chain directly after a closing parenthesis.
    Chain(Vec<String>),
    Ident(String),
    Str(String),
    Num(Number),
    Pipe,
    LParen,
    RParen,
    Declare,
    Assign,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Text(String),
    Action { tokens: Vec<Tok>, line: usize },
}

// ------------------------------------------------------------- Splitting

/// Byte index of the `}}` closing an action whose body starts at `from`,
/// skipping quoted strings.
fn find_action_end(source: &str, from: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut i = from;
    let mut quote: Option<u8> = None;

    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) => {
                if c == b'\\' && q != b'`' {
                    i += 1;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                b'"' | b'`' | b'\'' => quote = Some(c),
                b'}' if bytes.get(i + 1) == Some(&b'}') => return Some(i),
                _ => {}
            },
        }
        i += 1;
    }

    None
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}

pub fn split(source: &str) -> Result<Vec<Item>, TemplateError> {
    let mut items = Vec::new();
    let mut rest = 0;
    let mut trim_next = false;

    while let Some(found) = source[rest..].find("{{") {
        let open = rest + found;
        let mut text = &source[rest..open];
        if trim_next {
            text = text.trim_start();
        }

        let mut body_start = open + 2;
        if source[body_start..].starts_with("- ")
            || source[body_start..].starts_with("-\n")
            || source[body_start..].starts_with("-\t")
        {
            text = text.trim_end();
            body_start += 1;
        }

        if !text.is_empty() {
            items.push(Item::Text(text.to_string()));
        }

        let line = line_of(source, open);
        let close = find_action_end(source, body_start).ok_or_else(|| TemplateError::Parse {
            line,
            message: "unclosed action".to_string(),
        })?;

        let mut body = &source[body_start..close];
        trim_next = false;
        if body.ends_with(" -") || body.ends_with("\n-") || body.ends_with("\t-") {
            body = &body[..body.len() - 1];
            trim_next = true;
        }

        let trimmed = body.trim();
        if trimmed.starts_with("/*") {
            if !trimmed.ends_with("*/") {
                return Err(TemplateError::Parse {
                    line,
                    message: "unclosed comment".to_string(),
                });
            }
        } else {
            items.push(Item::Action {
                tokens: tokenize(trimmed, line)?,
                line,
            });
        }

        rest = close + 2;
    }

    let mut text = &source[rest..];
    if trim_next {
        text = text.trim_start();
    }
    if !text.is_empty() {
        items.push(Item::Text(text.to_string()));
    }

    Ok(items)
}

// ------------------------------------------------------------- Tokenizing

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

struct Cursor<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    source: &'a str,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::Parse {
            line: self.line,
            message: format!("{} in '{}'", message.into(), self.source),
        }
    }

    fn word(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek().filter(|c| is_ident_char(*c)) {
            out.push(c);
            self.pos += 1;
        }
        out
    }

    /// `.A.B.C` starting at a `.`.
    fn fields(&mut self) -> Vec<String> {
        let mut fields = Vec::new();
        while self.peek() == Some('.') && self.peek_at(1).is_some_and(is_ident_char) {
            self.pos += 1;
            fields.push(self.word());
        }
        fields
    }

    fn quoted(&mut self, quote: char) -> Result<String, TemplateError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated quoted string")),
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some('\\') if quote != '`' => {
                    self.pos += 1;
                    let escaped = match self.peek() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some(c) => c,
                        None => return Err(self.error("unterminated quoted string")),
                    };
                    out.push(escaped);
                    self.pos += 1;
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn number(&mut self) -> Result<Number, TemplateError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-' | '+')) {
            self.pos += 1;
        }
        while let Some(c) = self.peek() {
            let exponent_sign = matches!(c, '-' | '+')
                && matches!(self.chars.get(self.pos - 1), Some('e' | 'E'));
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || exponent_sign {
                self.pos += 1;
            } else {
                break;
            }
        }

        let text: String = self.chars[start..self.pos].iter().filter(|c| **c != '_').collect();
        parse_number(&text).ok_or_else(|| self.error(format!("bad number syntax '{}'", text)))
    }
}

fn parse_number(text: &str) -> Option<Number> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let integer = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        digits.parse::<i64>().ok()
    };

    if let Some(value) = integer {
        return Some(Number::from(if negative { -value } else { value }));
    }

    let float = digits.parse::<f64>().ok()?;
    Number::from_f64(if negative { -float } else { float })
}

pub fn tokenize(body: &str, line: usize) -> Result<Vec<Tok>, TemplateError> {
    let mut cursor = Cursor {
        chars: body.chars().collect(),
        pos: 0,
        line,
        source: body,
    };
    let mut tokens = Vec::new();

    while let Some(c) = cursor.peek() {
        match c {
            c if c.is_whitespace() => cursor.pos += 1,
            '|' => {
                tokens.push(Tok::Pipe);
                cursor.pos += 1;
            }
            '(' => {
                tokens.push(Tok::LParen);
                cursor.pos += 1;
            }
            ')' => {
                tokens.push(Tok::RParen);
                cursor.pos += 1;
                if cursor.peek() == Some('.') {
                    tokens.push(Tok::Chain(cursor.fields()));
                }
            }
            ',' => {
                tokens.push(Tok::Comma);
                cursor.pos += 1;
            }
            ':' if cursor.peek_at(1) == Some('=') => {
                tokens.push(Tok::Declare);
                cursor.pos += 2;
            }
            '=' => {
                tokens.push(Tok::Assign);
                cursor.pos += 1;
            }
            '"' | '`' => tokens.push(Tok::Str(cursor.quoted(c)?)),
            '\'' => {
                let text = cursor.quoted('\'')?;
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) => tokens.push(Tok::Num(Number::from(ch as u32))),
                    _ => return Err(cursor.error("malformed character constant")),
                }
            }
            '.' if cursor.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => {
                tokens.push(Tok::Num(cursor.number()?));
            }
            '.' => {
                let fields = cursor.fields();
                if fields.is_empty() {
                    cursor.pos += 1;
                }
                tokens.push(Tok::Field(fields));
            }
            '$' => {
                cursor.pos += 1;
                let name = cursor.word();
                let fields = cursor.fields();
                tokens.push(Tok::Variable(name, fields));
            }
            c if c.is_ascii_digit() => tokens.push(Tok::Num(cursor.number()?)),
            '-' | '+' if cursor.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => {
                tokens.push(Tok::Num(cursor.number()?));
            }
            c if is_ident_char(c) => tokens.push(Tok::Ident(cursor.word())),
            other => return Err(cursor.error(format!("unexpected '{}'", other))),
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(tokens: Vec<Tok>) -> Item {
        Item::Action { tokens, line: 1 }
    }

    #[test]
    fn test_split_text_and_actions() {
        let items = split("a {{ .B }} c").unwrap();
        assert_eq!(
            items,
            vec![
                Item::Text("a ".to_string()),
                action(vec![Tok::Field(vec!["B".to_string()])]),
                Item::Text(" c".to_string()),
            ]
        );
    }

    #[test]
    fn test_trim_markers_and_comments() {
        let items = split("a  \n{{- /* note */ -}}\n  b").unwrap();
        assert_eq!(
            items,
            vec![Item::Text("a".to_string()), Item::Text("b".to_string())]
        );
    }

    #[test]
    fn test_braces_inside_strings() {
        let items = split(r#"{{ print "}}" }}"#).unwrap();
        assert_eq!(
            items,
            vec![action(vec![Tok::Ident("print".to_string()), Tok::Str("}}".to_string())])]
        );
    }

    #[test]
    fn test_tokenize_declarations_and_chains() {
        let tokens = tokenize("$i, $e := (index .Items 0).Name | len", 1).unwrap();
        assert_eq!(
            tokens,
            vec![
                Tok::Variable("i".to_string(), vec![]),
                Tok::Comma,
                Tok::Variable("e".to_string(), vec![]),
                Tok::Declare,
                Tok::LParen,
                Tok::Ident("index".to_string()),
                Tok::Field(vec!["Items".to_string()]),
                Tok::Num(Number::from(0)),
                Tok::RParen,
                Tok::Chain(vec!["Name".to_string()]),
                Tok::Pipe,
                Tok::Ident("len".to_string()),
            ]
        );
    }

    #[test]
    fn test_numbers_and_root_variables() {
        let tokens = tokenize("-3 1.5 0x10 'a' $ $.Site .", 1).unwrap();
        assert_eq!(
            tokens,
            vec![
                Tok::Num(Number::from(-3)),
                Tok::Num(Number::from_f64(1.5).unwrap()),
                Tok::Num(Number::from(16)),
                Tok::Num(Number::from(97)),
                Tok::Variable(String::new(), vec![]),
                Tok::Variable(String::new(), vec!["Site".to_string()]),
                Tok::Field(vec![]),
            ]
        );
    }

    #[test]
    fn test_unclosed_action_reports_line() {
        let err = split("a\nb {{ .C").unwrap_err();
        assert!(matches!(err, TemplateError::Parse { line: 2, .. }));
    }
}

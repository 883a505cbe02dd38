//! `${...}` span scanning and expression parsing
//!
//! Grammar accepted inside a span (surrounding whitespace is ignored):
//! ```text
//! expr   := string | number | bool | null | var | call
//! string := '"' ... '"'          (double quotes only, `\` escapes)
//! var    := 'var.' [A-Za-z0-9_.-]+
//! call   := ident '(' [expr (',' expr)*] ')'   (no space between ident and '(')
//! ```
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Variable(String),
    Call { name: String, args: Vec<Expr> },
}

/// Byte range of a `${...}` occurrence, `end` is exclusive (one past the closing `}`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: usize,
    pub end: usize,
    /// `false` if the span was only closed by falling back to the first `}` (e.g. an unterminated string)
    pub well_formed: bool,
}

impl Span {
    pub fn text<'t>(&self, text: &'t str) -> &'t str {
        &text[self.start..self.end]
    }

    pub fn content<'t>(&self, text: &'t str) -> &'t str {
        &text[self.start + 2..self.end - 1]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scan {
    Span(Span),
    /// `$${` at the given position, a literal `${`
    Escape(usize),
    /// `${` with no closing brace anywhere after it
    Unclosed(usize),
    End,
}

/// Find the next span starting at or after `from`
pub(crate) fn next_span(text: &str, from: usize) -> Scan {
    let bytes = text.as_bytes();
    let mut index = from;
    while index + 1 < bytes.len() {
        if bytes[index] == b'$' {
            if bytes[index + 1] == b'$' && bytes.get(index + 2) == Some(&b'{') {
                return Scan::Escape(index);
            }
            if bytes[index + 1] == b'{' {
                let content_start = index + 2;
                if let Some(close) = closing_brace(bytes, content_start) {
                    return Scan::Span(Span {
                        start: index,
                        end: close + 1,
                        well_formed: true,
                    });
                }

                return match bytes[content_start..].iter().position(|b| *b == b'}') {
                    Some(offset) => Scan::Span(Span {
                        start: index,
                        end: content_start + offset + 1,
                        well_formed: false,
                    }),
                    None => Scan::Unclosed(index),
                };
            }
        }
        index += 1;
    }
    Scan::End
}

/// Position of the first `}` outside of a quoted string
fn closing_brace(bytes: &[u8], from: usize) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    for (offset, byte) in bytes[from..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'}' => return Some(from + offset),
            _ => {}
        }
    }
    None
}

/// Parse the content of a span, `None` if it does not match the grammar
pub(crate) fn parse_expression(content: &str) -> Option<Expr> {
    let mut parser = Parser {
        src: content,
        pos: 0,
    };
    parser.skip_whitespace();
    let expr = parser.expr()?;
    parser.skip_whitespace();
    (parser.pos == parser.src.len()).then_some(expr)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn take_while(&mut self, predicate: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&predicate) {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn expr(&mut self) -> Option<Expr> {
        match self.peek()? {
            '"' => self.string().map(|s| Expr::Literal(Value::String(s))),
            c if c.is_ascii_digit() || c == '-' => self.number(),
            c if c.is_ascii_alphabetic() || c == '_' => self.identifier_expr(),
            _ => None,
        }
    }

    fn identifier_expr(&mut self) -> Option<Expr> {
        let ident = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');

        if ident == "var" && self.peek() == Some('.') {
            self.bump();
            let path = self.take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
            if path.is_empty() || path.starts_with('.') {
                return None;
            }
            return Some(Expr::Variable(path.to_string()));
        }

        if self.peek() != Some('(') {
            return match ident {
                "true" => Some(Expr::Literal(Value::Boolean(true))),
                "false" => Some(Expr::Literal(Value::Boolean(false))),
                "null" => Some(Expr::Literal(Value::Null)),
                _ => None,
            };
        }
        self.bump();

        let name = ident.to_string();
        let args = self.arguments()?;
        Some(Expr::Call { name, args })
    }

    fn arguments(&mut self) -> Option<Vec<Expr>> {
        let mut args = vec![];
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.bump();
            return Some(args);
        }

        loop {
            self.skip_whitespace();
            args.push(self.expr()?);
            self.skip_whitespace();
            match self.bump()? {
                ',' => continue,
                ')' => return Some(args),
                _ => return None,
            }
        }
    }

    fn string(&mut self) -> Option<String> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump()? {
                '"' => return Some(out),
                '\\' => match self.bump()? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    other => out.push(other),
                },
                other => out.push(other),
            }
        }
    }

    fn number(&mut self) -> Option<Expr> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        self.take_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') {
            self.bump();
            self.take_while(|c| c.is_ascii_digit());
        }
        let literal = &self.src[start..self.pos];

        if let Ok(int) = literal.parse::<i64>() {
            return Some(Expr::Literal(Value::Integer(int)));
        }
        literal
            .parse::<f64>()
            .ok()
            .map(|decimal| Expr::Literal(Value::Decimal(decimal)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            name: name.to_string(),
            args,
        }
    }

    fn string(value: &str) -> Expr {
        Expr::Literal(value.into())
    }

    #[test]
    fn scan_spans() {
        let text = r#"a = "${fn()}" b = "x-${var.y}""#;
        let Scan::Span(first) = next_span(text, 0) else {
            panic!("span expected");
        };
        assert_eq!(first.text(text), "${fn()}");
        assert_eq!(first.content(text), "fn()");

        let Scan::Span(second) = next_span(text, first.end) else {
            panic!("span expected");
        };
        assert_eq!(second.text(text), "${var.y}");
        assert_eq!(next_span(text, second.end), Scan::End);
    }

    #[test]
    fn braces_inside_strings_do_not_close() {
        let text = r#"${get_env("SOME_VAR", "SOME{VALUE}")}"#;
        let Scan::Span(span) = next_span(text, 0) else {
            panic!("span expected");
        };
        assert!(span.well_formed);
        assert_eq!(span.end, text.len());
    }

    #[test]
    fn unterminated_string_falls_back_to_first_brace() {
        let text = r#"foo/${get_env("HIT}/bar"#;
        let Scan::Span(span) = next_span(text, 0) else {
            panic!("span expected");
        };
        assert!(!span.well_formed);
        assert_eq!(span.text(text), r#"${get_env("HIT}"#);
    }

    #[test]
    fn unclosed_and_escaped() {
        assert_eq!(next_span(r#"foo/${get_env("X/bar"#, 0), Scan::Unclosed(4));
        assert_eq!(next_span("$${literal}", 0), Scan::Escape(0));
        assert_eq!(next_span("$foo {bar}", 0), Scan::End);
    }

    #[test]
    fn parse_calls() {
        assert_eq!(
            parse_expression("   find_in_parent_folders()   "),
            Some(call("find_in_parent_folders", vec![]))
        );
        assert_eq!(
            parse_expression(r#"get_env("X", "default")"#),
            Some(call("get_env", vec![string("X"), string("default")]))
        );
        assert_eq!(
            parse_expression(r#"default(var.a-1, "no a")"#),
            Some(call(
                "default",
                vec![Expr::Variable("a-1".to_string()), string("no a")]
            ))
        );
        assert_eq!(
            parse_expression("var.my_map.my_var"),
            Some(Expr::Variable("my_map.my_var".to_string()))
        );
    }

    #[test]
    fn reject_malformed() {
        assert_eq!(parse_expression("find_in_parent_folders"), None);
        assert_eq!(parse_expression("unknown"), None);
        assert_eq!(parse_expression("fn ()"), None);
        assert_eq!(parse_expression("get_env('X', 'Y')"), None);
        assert_eq!(parse_expression(r#"get_env("X", "Y""#), None);
        assert_eq!(parse_expression("fn() extra"), None);
    }
}

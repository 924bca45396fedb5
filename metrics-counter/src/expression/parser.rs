use serde_json::Value;

use super::{path::JsonPath, ParseError};

/// Where a dynamic expression starts reading from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Root {
    Payload,
    Headers,
}

/// A navigation step below the root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Segment {
    Field(String),
    Index(usize),
}

/// Parsed form of an expression.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Ast {
    Literal(Value),
    Access { root: Root, segments: Vec<Segment> },
    JsonPath { root: Root, path: JsonPath },
    Length(Box<Ast>),
}

pub(crate) fn parse(expression: &str) -> Result<Ast, ParseError> {
    let mut parser = Parser { input: expression, pos: 0 };
    parser.skip_whitespace();
    let ast = parser.expression()?;
    parser.skip_whitespace();
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(ast)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected `{token}`")))
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn error(&self, reason: &str) -> ParseError {
        ParseError::new(self.input, self.pos, reason)
    }

    fn expression(&mut self) -> Result<Ast, ParseError> {
        match self.peek() {
            None => Err(self.error("expression is empty")),
            Some('\'' | '"') => self.string().map(|s| Ast::Literal(Value::String(s))),
            Some('#') => self.function(),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(c) if is_ident_start(c) => {
                let start = self.pos;
                let ident = self.ident();
                match ident {
                    "true" => Ok(Ast::Literal(Value::Bool(true))),
                    "false" => Ok(Ast::Literal(Value::Bool(false))),
                    "null" => Ok(Ast::Literal(Value::Null)),
                    _ => {
                        self.pos = start;
                        let root = self.root()?;
                        let segments = self.segments()?;
                        Ok(Ast::Access { root, segments })
                    }
                }
            }
            Some(_) => Err(self.error("unexpected character")),
        }
    }

    fn root(&mut self) -> Result<Root, ParseError> {
        let start = self.pos;
        match self.ident() {
            "payload" => Ok(Root::Payload),
            "headers" => Ok(Root::Headers),
            _ => {
                self.pos = start;
                Err(self.error("expected `payload` or `headers`"))
            }
        }
    }

    fn segments(&mut self) -> Result<Vec<Segment>, ParseError> {
        let mut segments = Vec::new();
        loop {
            self.skip_whitespace();
            if self.eat(".") {
                self.skip_whitespace();
                if !self.peek().is_some_and(is_ident_start) {
                    return Err(self.error("expected a field name after `.`"));
                }
                segments.push(Segment::Field(self.ident().to_owned()));
            } else if self.eat("[") {
                self.skip_whitespace();
                let segment = match self.peek() {
                    Some('\'' | '"') => Segment::Field(self.string()?),
                    Some(c) if c.is_ascii_digit() => {
                        let start = self.pos;
                        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                            self.bump();
                        }
                        let index = self.input[start..self.pos]
                            .parse()
                            .map_err(|_| self.error("index out of range"))?;
                        Segment::Index(index)
                    }
                    _ => return Err(self.error("expected a quoted name or an index")),
                };
                self.skip_whitespace();
                self.expect("]")?;
                segments.push(segment);
            } else {
                return Ok(segments);
            }
        }
    }

    fn function(&mut self) -> Result<Ast, ParseError> {
        self.expect("#")?;
        let start = self.pos;
        match self.ident() {
            "jsonPath" => self.json_path(),
            "length" => self.length(),
            _ => {
                self.pos = start;
                Err(self.error("unknown function, expected `#jsonPath` or `#length`"))
            }
        }
    }

    fn length(&mut self) -> Result<Ast, ParseError> {
        self.skip_whitespace();
        self.expect("(")?;
        self.skip_whitespace();
        let inner = self.expression()?;
        self.skip_whitespace();
        self.expect(")")?;
        Ok(Ast::Length(Box::new(inner)))
    }

    fn json_path(&mut self) -> Result<Ast, ParseError> {
        self.skip_whitespace();
        self.expect("(")?;
        self.skip_whitespace();
        let root = self.root()?;
        self.skip_whitespace();
        self.expect(",")?;
        self.skip_whitespace();
        if !matches!(self.peek(), Some('\'' | '"')) {
            return Err(self.error("expected a quoted JSONPath"));
        }
        let path = JsonPath::parse(&self.string()?)?;
        self.skip_whitespace();
        self.expect(")")?;
        Ok(Ast::JsonPath { root, path })
    }

    // Quoted strings; a doubled quote character stands for itself.
    fn string(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        let quote = self.bump().ok_or_else(|| self.error("expected a quoted string"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => {
                    self.pos = start;
                    return Err(self.error("unterminated string literal"));
                }
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        self.bump();
                        out.push(quote);
                    } else {
                        return Ok(out);
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Result<Ast, ParseError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')) {
            self.bump();
        }
        match serde_json::from_str::<Value>(&self.input[start..self.pos]) {
            Ok(value @ Value::Number(_)) => Ok(Ast::Literal(value)),
            _ => {
                self.pos = start;
                Err(self.error("invalid number literal"))
            }
        }
    }

    fn ident(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        &self.input[start..self.pos]
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

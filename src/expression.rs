//! Literal and arithmetic expression evaluation for placeholder bodies.
//!
//! This is deliberately not a scripting language: the grammar covers
//! literals (numbers, strings, booleans, null, lists, maps), the four
//! arithmetic operators plus `%`, and parentheses. Generator calls are
//! split off by [`split_call`] and dispatched by the resolver; anything
//! else fails and the resolver restores the original placeholder.
//!
//! The same parser doubles as the promotion step that turns a textual
//! result such as `"[1, 2, 3]"` or `"104"` back into its structural type.

use anyhow::{anyhow, bail, Result};
use serde_json::{Map, Number, Value};

/// Evaluate a complete expression string to a JSON value.
///
/// The whole input must be consumed; trailing garbage is an error so
/// that ordinary prose is never half-parsed into a value.
pub fn evaluate(input: &str) -> Result<Value> {
    let mut parser = Parser::new(input);
    let value = parser.expression()?;
    parser.skip_ws();
    if !parser.at_end() {
        bail!(
            "unexpected trailing input at offset {}: {input:?}",
            parser.pos
        );
    }
    Ok(value)
}

/// Split `name(args...)` into head and raw argument text.
///
/// Returns `None` unless the input is exactly one call: a leading
/// identifier, an opening parenthesis, and a matching close as the final
/// character (quote-aware, so `f("a)b")` still matches).
pub fn split_call(input: &str) -> Option<(String, String)> {
    let trimmed = input.trim();
    let chars: Vec<char> = trimmed.chars().collect();

    let mut idx = 0;
    while idx < chars.len() && (chars[idx].is_ascii_alphanumeric() || chars[idx] == '_' || chars[idx] == '.') {
        idx += 1;
    }
    if idx == 0 || idx >= chars.len() || chars[idx] != '(' {
        return None;
    }
    if !chars[0].is_ascii_alphabetic() && chars[0] != '_' {
        return None;
    }

    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (pos, &ch) in chars.iter().enumerate().skip(idx) {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                } else if ch == '\\' {
                    // Escapes inside quotes never close them.
                }
            }
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        if pos != chars.len() - 1 {
                            return None;
                        }
                        let head: String = chars[..idx].iter().collect();
                        let args: String = chars[idx + 1..pos].iter().collect();
                        return Some((head, args));
                    }
                }
                _ => {}
            },
        }
    }
    None
}

/// Parse a call's raw argument text into evaluated values.
///
/// Arguments are comma-separated expressions. A leading `name=` label is
/// accepted and dropped, the value keeping its position.
pub fn parse_args(input: &str) -> Result<Vec<Value>> {
    let mut args = Vec::new();
    for piece in split_top_level(input) {
        let piece = strip_label(piece.trim());
        if piece.is_empty() {
            continue;
        }
        args.push(evaluate(piece)?);
    }
    Ok(args)
}

/// Split on commas that are not nested inside brackets or quotes.
fn split_top_level(input: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for ch in input.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                '(' | '[' | '{' => {
                    depth += 1;
                    current.push(ch);
                }
                ')' | ']' | '}' => {
                    depth = depth.saturating_sub(1);
                    current.push(ch);
                }
                ',' if depth == 0 => {
                    pieces.push(std::mem::take(&mut current));
                }
                _ => current.push(ch),
            },
        }
    }
    if !current.trim().is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Drop a `name=` argument label, leaving comparison-free `=` alone.
fn strip_label(piece: &str) -> &str {
    let Some(eq) = piece.find('=') else {
        return piece;
    };
    if piece[eq..].starts_with("==") {
        return piece;
    }
    let label = piece[..eq].trim();
    let is_ident = !label.is_empty()
        && label
            .chars()
            .enumerate()
            .all(|(i, c)| c == '_' || c.is_ascii_alphanumeric() && (i > 0 || !c.is_ascii_digit()) || c.is_ascii_alphabetic());
    if is_ident {
        piece[eq + 1..].trim()
    } else {
        piece
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            other => bail!("expected {expected:?}, found {other:?}"),
        }
    }

    // expression := term (('+' | '-') term)*
    fn expression(&mut self) -> Result<Value> {
        let mut left = self.term()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('+') => {
                    self.bump();
                    let right = self.term()?;
                    left = add(&left, &right)?;
                }
                Some('-') => {
                    self.bump();
                    let right = self.term()?;
                    left = numeric_op(&left, &right, "-", |a, b| a - b, |a, b| a.checked_sub(b))?;
                }
                _ => return Ok(left),
            }
        }
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<Value> {
        let mut left = self.unary()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('*') => {
                    self.bump();
                    let right = self.unary()?;
                    left = numeric_op(&left, &right, "*", |a, b| a * b, |a, b| a.checked_mul(b))?;
                }
                Some('/') => {
                    self.bump();
                    let right = self.unary()?;
                    left = divide(&left, &right)?;
                }
                Some('%') => {
                    self.bump();
                    let right = self.unary()?;
                    left = modulo(&left, &right)?;
                }
                _ => return Ok(left),
            }
        }
    }

    fn unary(&mut self) -> Result<Value> {
        self.skip_ws();
        if self.peek() == Some('-') {
            self.bump();
            let value = self.unary()?;
            return match value {
                Value::Number(n) if n.is_i64() => Ok(Value::from(-n.as_i64().unwrap())),
                Value::Number(n) => Ok(json_f64(-n.as_f64().unwrap_or(0.0))?),
                other => Err(anyhow!("cannot negate {other}")),
            };
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Value> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.bump();
                let value = self.expression()?;
                self.expect(')')?;
                Ok(value)
            }
            Some('[') => self.list(),
            Some('{') => self.map(),
            Some('\'') | Some('"') => self.string(),
            Some(c) if c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.keyword(),
            other => Err(anyhow!("unexpected token {other:?}")),
        }
    }

    fn list(&mut self) -> Result<Value> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(']') {
                self.bump();
                return Ok(Value::Array(items));
            }
            items.push(self.expression()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(']') => {}
                other => bail!("expected ',' or ']' in list, found {other:?}"),
            }
        }
    }

    fn map(&mut self) -> Result<Value> {
        self.expect('{')?;
        let mut entries = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.bump();
                return Ok(Value::Object(entries));
            }
            let key = match self.peek() {
                Some('\'') | Some('"') => match self.string()? {
                    Value::String(s) => s,
                    _ => unreachable!(),
                },
                Some(c) if c.is_ascii_alphabetic() || c == '_' => self.ident(),
                other => bail!("expected map key, found {other:?}"),
            };
            self.expect(':')?;
            let value = self.expression()?;
            entries.insert(key, value);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some('}') => {}
                other => bail!("expected ',' or '}}' in map, found {other:?}"),
            }
        }
    }

    fn string(&mut self) -> Result<Value> {
        let quote = self.bump().expect("caller checked quote");
        let mut out = String::new();
        loop {
            match self.bump() {
                None => bail!("unterminated string literal"),
                Some(c) if c == quote => return Ok(Value::String(out)),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c) => out.push(c),
                    None => bail!("unterminated escape in string literal"),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Result<Value> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == Some('.')
            && matches!(self.chars.get(self.pos + 1), Some(c) if c.is_ascii_digit())
        {
            is_float = true;
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut ahead = self.pos + 1;
            if matches!(self.chars.get(ahead), Some('+') | Some('-')) {
                ahead += 1;
            }
            if matches!(self.chars.get(ahead), Some(c) if c.is_ascii_digit()) {
                is_float = true;
                self.pos = ahead;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        // A leading zero marks formatted text (dates, zero-padded ids),
        // not a number.
        let int_part = text.split('.').next().unwrap_or(&text);
        if int_part.len() > 1 && int_part.starts_with('0') {
            bail!("leading zero in number literal: {text}");
        }

        if is_float {
            let parsed: f64 = text.parse()?;
            json_f64(parsed)
        } else {
            let parsed: i64 = text.parse()?;
            Ok(Value::from(parsed))
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn keyword(&mut self) -> Result<Value> {
        let word = self.ident();
        match word.as_str() {
            "true" | "True" => Ok(Value::Bool(true)),
            "false" | "False" => Ok(Value::Bool(false)),
            "null" | "None" => Ok(Value::Null),
            _ => {
                self.skip_ws();
                if self.peek() == Some('(') {
                    Err(anyhow!("unknown function: {word}"))
                } else {
                    Err(anyhow!("unresolved name: {word}"))
                }
            }
        }
    }
}

fn json_f64(value: f64) -> Result<Value> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| anyhow!("non-finite arithmetic result"))
}

fn as_i64(value: &Value) -> Option<i64> {
    value.as_i64()
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn add(left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (Value::Array(a), Value::Array(b)) => {
            let mut joined = a.clone();
            joined.extend(b.iter().cloned());
            Ok(Value::Array(joined))
        }
        _ => numeric_op(left, right, "+", |a, b| a + b, |a, b| a.checked_add(b)),
    }
}

fn numeric_op(
    left: &Value,
    right: &Value,
    op: &str,
    float_op: fn(f64, f64) -> f64,
    int_op: fn(i64, i64) -> Option<i64>,
) -> Result<Value> {
    if let (Some(a), Some(b)) = (as_i64(left), as_i64(right)) {
        return int_op(a, b)
            .map(Value::from)
            .ok_or_else(|| anyhow!("integer overflow in {a} {op} {b}"));
    }
    match (as_f64(left), as_f64(right)) {
        (Some(a), Some(b)) => json_f64(float_op(a, b)),
        _ => Err(anyhow!("cannot apply {op} to {left} and {right}")),
    }
}

fn divide(left: &Value, right: &Value) -> Result<Value> {
    match (as_f64(left), as_f64(right)) {
        (Some(_), Some(b)) if b == 0.0 => Err(anyhow!("division by zero")),
        (Some(a), Some(b)) => json_f64(a / b),
        _ => Err(anyhow!("cannot divide {left} by {right}")),
    }
}

fn modulo(left: &Value, right: &Value) -> Result<Value> {
    if let (Some(a), Some(b)) = (as_i64(left), as_i64(right)) {
        if b == 0 {
            return Err(anyhow!("modulo by zero"));
        }
        return Ok(Value::from(a % b));
    }
    match (as_f64(left), as_f64(right)) {
        (Some(_), Some(b)) if b == 0.0 => Err(anyhow!("modulo by zero")),
        (Some(a), Some(b)) => json_f64(a % b),
        _ => Err(anyhow!("cannot apply % to {left} and {right}")),
    }
}

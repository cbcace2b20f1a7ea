//! Parsing of planner answers.
//!
//! A model answer looks like
//! `<think>..</think><answer>do(action="Tap", element=[500,120])</answer>`.
//! The answer block holds one or more `do(...)` expressions, optionally
//! followed by `finish(message="...")`.

use phone_agent_core::{Action, ActionKind, Point};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("Failed to parse action: {0}")]
pub struct ParseError(pub String);

/// A keyword argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
    List(Vec<Value>),
    None,
}

impl Value {
    fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_point(&self) -> Option<Point> {
        match self {
            Value::List(items) if items.len() == 2 => {
                let coord = |v: &Value| match v {
                    Value::Num(n) if n.is_finite() => Some(n.max(0.0).round() as u32),
                    _ => None,
                };
                Some(Point(coord(&items[0])?, coord(&items[1])?))
            }
            _ => None,
        }
    }
}

/// `name(key=value, ...)`
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<(String, Value)>,
}

impl Call {
    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn str_arg(&self, key: &str) -> Option<String> {
        self.arg(key).and_then(Value::as_str).map(str::to_string)
    }

    fn point_arg(&self, key: &str) -> Result<Point, ParseError> {
        self.arg(key)
            .and_then(Value::as_point)
            .ok_or_else(|| ParseError(format!("missing or invalid '{}' coordinates", key)))
    }
}

/// Actions and trailing finish message parsed from one answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedAnswer {
    pub actions: Vec<Action>,
    pub finish: Option<String>,
}

/// Split a raw completion into `(thinking, answer)`.
pub fn split_response(content: &str) -> (String, String) {
    if let Some(open) = content.find("<answer>") {
        let answer = between(content, "<answer>", "</answer>").unwrap_or_default();
        let thinking = between(content, "<think>", "</think>")
            .unwrap_or_else(|| content[..open].to_string());
        return (thinking.trim().to_string(), answer.trim().to_string());
    }

    for marker in ["finish(message=", "do(action="] {
        if let Some(idx) = content.find(marker) {
            let thinking = content[..idx]
                .replace("<think>", "")
                .replace("</think>", "");
            return (thinking.trim().to_string(), content[idx..].trim().to_string());
        }
    }

    (String::new(), content.trim().to_string())
}

fn between(text: &str, open: &str, close: &str) -> Option<String> {
    let start = text.find(open)? + open.len();
    let rest = &text[start..];
    let end = rest.find(close).unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

/// Every balanced `do(...)` / `finish(...)` expression, in order.
pub fn extract_expressions(answer: &str) -> Vec<&str> {
    let text = answer.trim();
    let mut expressions = Vec::new();
    let mut idx = 0;

    while idx < text.len() {
        let rest = &text[idx..];
        let start = match (rest.find("do("), rest.find("finish(")) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => break,
        } + idx;

        let Some(len) = balanced_len(&text[start..]) else {
            break;
        };
        expressions.push(text[start..start + len].trim());
        idx = start + len;
    }

    expressions
}

/// Byte length of the call expression at the start of `text`, honouring
/// quotes and backslash escapes.
fn balanced_len(text: &str) -> Option<usize> {
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    let mut depth = 0i32;

    for (i, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            _ if in_single || in_double => {}
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse one call expression.
pub fn parse_call(expression: &str) -> Result<Call, ParseError> {
    let mut p = Parser {
        chars: expression.chars().collect(),
        pos: 0,
    };
    p.skip_ws();
    let name = p.ident()?;
    p.skip_ws();
    p.expect('(')?;

    let mut args = Vec::new();
    loop {
        p.skip_ws();
        if p.eat(')') {
            break;
        }
        let key = p.ident()?;
        p.skip_ws();
        p.expect('=')?;
        p.skip_ws();
        let value = p.value()?;
        args.push((key, value));
        p.skip_ws();
        if p.eat(',') {
            continue;
        }
        p.expect(')')?;
        break;
    }

    Ok(Call { name, args })
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), ParseError> {
        if self.eat(ch) {
            Ok(())
        } else {
            Err(ParseError(format!(
                "expected '{}' at position {}",
                ch, self.pos
            )))
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(ParseError(format!("expected identifier at position {}", start)));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn value(&mut self) -> Result<Value, ParseError> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                self.string(q).map(Value::Str)
            }
            Some('[') => {
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    self.skip_ws();
                    if self.eat(']') {
                        break;
                    }
                    items.push(self.value()?);
                    self.skip_ws();
                    if !self.eat(',') {
                        self.expect(']')?;
                        break;
                    }
                }
                Ok(Value::List(items))
            }
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(_) => match self.ident()?.as_str() {
                "True" | "true" => Ok(Value::Bool(true)),
                "False" | "false" => Ok(Value::Bool(false)),
                "None" | "null" => Ok(Value::None),
                other => Err(ParseError(format!("unexpected literal '{}'", other))),
            },
            None => Err(ParseError("unexpected end of expression".into())),
        }
    }

    fn string(&mut self, quote: char) -> Result<String, ParseError> {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '\\' => {
                    let escaped = self
                        .peek()
                        .ok_or_else(|| ParseError("unterminated escape".into()))?;
                    self.pos += 1;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                c if c == quote => return Ok(out),
                c => out.push(c),
            }
        }
        Err(ParseError("unterminated string".into()))
    }

    fn number(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        {
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        raw.parse::<f64>()
            .map(Value::Num)
            .map_err(|_| ParseError(format!("invalid number '{}'", raw)))
    }
}

/// Models sometimes emit unescaped quotes inside `Type` text. Take the text
/// verbatim between `text="` and the closing `")`.
fn type_fallback(expression: &str) -> Option<Call> {
    if !(expression.starts_with("do(action=\"Type\"")
        || expression.starts_with("do(action=\"Type_Name\""))
    {
        return None;
    }
    let (_, tail) = expression.split_once("text=")?;
    let text = tail.get(1..tail.len().checked_sub(2)?)?;
    Some(Call {
        name: "do".into(),
        args: vec![
            ("action".into(), Value::Str("Type".into())),
            ("text".into(), Value::Str(text.to_string())),
        ],
    })
}

fn wait_seconds(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Num(n)) => *n,
        Some(Value::Str(s)) => s.replace("seconds", "").trim().parse().unwrap_or(1.0),
        _ => 1.0,
    }
}

/// Convert a parsed `do(...)` call into an action.
pub fn to_action(call: &Call) -> Result<Action, ParseError> {
    let name = call
        .str_arg("action")
        .ok_or_else(|| ParseError("do() without action".into()))?;

    let kind = match name.as_str() {
        "Launch" => ActionKind::Launch {
            app: call
                .str_arg("app")
                .ok_or_else(|| ParseError("Launch without app".into()))?,
        },
        "Tap" => ActionKind::Tap {
            element: call.point_arg("element")?,
        },
        "Type" | "Type_Name" => ActionKind::Type {
            text: call.str_arg("text").unwrap_or_default(),
        },
        "Swipe" => ActionKind::Swipe {
            start: call.point_arg("start")?,
            end: call.point_arg("end")?,
        },
        "Back" => ActionKind::Back,
        "Home" => ActionKind::Home,
        "Double Tap" => ActionKind::DoubleTap {
            element: call.point_arg("element")?,
        },
        "Long Press" => ActionKind::LongPress {
            element: call.point_arg("element")?,
        },
        "Wait" => ActionKind::Wait {
            seconds: wait_seconds(call.arg("duration")),
        },
        "Take_over" => ActionKind::TakeOver {
            message: call
                .str_arg("message")
                .unwrap_or_else(|| "User intervention required".into()),
        },
        "Note" => ActionKind::Note {
            message: call.str_arg("message"),
        },
        "Call_API" => ActionKind::CallApi {
            instruction: call.str_arg("instruction"),
        },
        "Interact" => ActionKind::Interact {
            message: call.str_arg("message"),
        },
        other => return Err(ParseError(format!("unknown action '{}'", other))),
    };

    // A message on a tap marks it as sensitive.
    let sensitive = match kind {
        ActionKind::Tap { .. } => call.str_arg("message"),
        _ => None,
    };
    Ok(Action { kind, sensitive })
}

/// Parse the answer block. Expressions after `finish(...)` are ignored.
pub fn parse_answer(answer: &str) -> Result<ParsedAnswer, ParseError> {
    let expressions = extract_expressions(answer);
    if expressions.is_empty() {
        return Err(ParseError("empty response".into()));
    }

    let mut parsed = ParsedAnswer::default();
    for expression in expressions {
        let call = match parse_call(expression) {
            Ok(call) => call,
            Err(e) => type_fallback(expression).ok_or(e)?,
        };
        match call.name.as_str() {
            "do" => parsed.actions.push(to_action(&call)?),
            "finish" => {
                parsed.finish = Some(call.str_arg("message").unwrap_or_default());
                break;
            }
            other => return Err(ParseError(format!("unknown call '{}'", other))),
        }
    }
    Ok(parsed)
}

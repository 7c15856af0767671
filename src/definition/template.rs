//! Payload templates (`Parameters`, `ResultSelector`, `ItemSelector`).
//!
//! Fields whose key ends in `.$` are dynamic: their string value is a
//! reference path, a context path, or an intrinsic function call. All
//! other values are copied verbatim.

use crate::core::JsonPath;
use serde_json::Value;

/// A compiled payload template.
#[derive(Clone, Debug, PartialEq)]
pub enum PayloadTemplate {
    Literal(Value),
    Path(JsonPath),
    Intrinsic(IntrinsicCall),
    Object(Vec<(String, PayloadTemplate)>),
    Array(Vec<PayloadTemplate>),
}

/// Supported intrinsic functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntrinsicFunction {
    Format,
    StringToJson,
    JsonToString,
    Array,
    ArrayLength,
    ArrayGetItem,
    ArrayContains,
    MathAdd,
    Uuid,
}

impl IntrinsicFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "States.Format" => Self::Format,
            "States.StringToJson" => Self::StringToJson,
            "States.JsonToString" => Self::JsonToString,
            "States.Array" => Self::Array,
            "States.ArrayLength" => Self::ArrayLength,
            "States.ArrayGetItem" => Self::ArrayGetItem,
            "States.ArrayContains" => Self::ArrayContains,
            "States.MathAdd" => Self::MathAdd,
            "States.UUID" => Self::Uuid,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Format => "States.Format",
            Self::StringToJson => "States.StringToJson",
            Self::JsonToString => "States.JsonToString",
            Self::Array => "States.Array",
            Self::ArrayLength => "States.ArrayLength",
            Self::ArrayGetItem => "States.ArrayGetItem",
            Self::ArrayContains => "States.ArrayContains",
            Self::MathAdd => "States.MathAdd",
            Self::Uuid => "States.UUID",
        }
    }

    pub(crate) fn check_arity(&self, count: usize) -> Result<(), String> {
        let ok = match self {
            Self::Format => count >= 1,
            Self::Array => true,
            Self::StringToJson | Self::JsonToString | Self::ArrayLength => count == 1,
            Self::ArrayGetItem | Self::ArrayContains | Self::MathAdd => count == 2,
            Self::Uuid => count == 0,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("{} does not take {count} argument(s)", self.name()))
        }
    }
}

/// A parsed intrinsic call such as `States.Format('Hi {}', $.name)`.
#[derive(Clone, Debug, PartialEq)]
pub struct IntrinsicCall {
    pub function: IntrinsicFunction,
    pub args: Vec<IntrinsicArg>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum IntrinsicArg {
    Literal(Value),
    Path(JsonPath),
    Call(IntrinsicCall),
}

/// Errors are reported as plain messages; the parser attaches the
/// state and field they belong to.
pub(crate) fn compile_template(value: &Value) -> Result<PayloadTemplate, String> {
    match value {
        Value::Object(object) => {
            let mut fields = Vec::with_capacity(object.len());
            for (key, field) in object {
                if let Some(name) = key.strip_suffix(".$") {
                    let expression = field
                        .as_str()
                        .ok_or_else(|| format!("field '{key}' must hold a path or intrinsic string"))?;
                    fields.push((name.to_string(), compile_expression(expression)?));
                } else {
                    fields.push((key.clone(), compile_template(field)?));
                }
            }
            Ok(PayloadTemplate::Object(fields))
        }
        Value::Array(items) => Ok(PayloadTemplate::Array(
            items
                .iter()
                .map(compile_template)
                .collect::<Result<Vec<_>, _>>()?,
        )),
        other => Ok(PayloadTemplate::Literal(other.clone())),
    }
}

fn compile_expression(expression: &str) -> Result<PayloadTemplate, String> {
    if expression.starts_with('$') {
        JsonPath::parse(expression)
            .map(PayloadTemplate::Path)
            .map_err(|e| e.to_string())
    } else {
        parse_intrinsic(expression).map(PayloadTemplate::Intrinsic)
    }
}

/// Parse an intrinsic call expression.
pub fn parse_intrinsic(expression: &str) -> Result<IntrinsicCall, String> {
    let mut parser = IntrinsicParser {
        chars: expression.chars().collect(),
        pos: 0,
    };
    let call = parser.call()?;
    parser.skip_whitespace();
    if parser.pos != parser.chars.len() {
        return Err(format!(
            "unexpected trailing input in '{expression}' at offset {}",
            parser.pos
        ));
    }
    Ok(call)
}

struct IntrinsicParser {
    chars: Vec<char>,
    pos: usize,
}

impl IntrinsicParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(format!("expected '{expected}' at offset {}", self.pos))
        }
    }

    fn call(&mut self) -> Result<IntrinsicCall, String> {
        self.skip_whitespace();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '.')
        {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        let function = IntrinsicFunction::from_name(&name)
            .ok_or_else(|| format!("unknown intrinsic function '{name}'"))?;

        self.expect('(')?;
        let mut args = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.pos += 1;
        } else {
            loop {
                args.push(self.arg()?);
                self.skip_whitespace();
                match self.peek() {
                    Some(',') => self.pos += 1,
                    Some(')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(format!("expected ',' or ')' at offset {}", self.pos)),
                }
            }
        }
        function.check_arity(args.len())?;
        Ok(IntrinsicCall { function, args })
    }

    fn arg(&mut self) -> Result<IntrinsicArg, String> {
        self.skip_whitespace();
        match self.peek() {
            Some('\'') => self.string().map(|s| IntrinsicArg::Literal(Value::String(s))),
            Some('$') => self.path().map(IntrinsicArg::Path),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number().map(IntrinsicArg::Literal),
            Some(c) if c.is_ascii_alphabetic() => {
                let rest: String = self.chars[self.pos..].iter().collect();
                for (word, value) in [
                    ("true", Value::Bool(true)),
                    ("false", Value::Bool(false)),
                    ("null", Value::Null),
                ] {
                    if rest.starts_with(word)
                        && !rest[word.len()..].starts_with(|c: char| c.is_ascii_alphanumeric() || c == '.')
                    {
                        self.pos += word.len();
                        return Ok(IntrinsicArg::Literal(value));
                    }
                }
                self.call().map(IntrinsicArg::Call)
            }
            _ => Err(format!("expected an argument at offset {}", self.pos)),
        }
    }

    fn string(&mut self) -> Result<String, String> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err("unterminated string literal".to_string()),
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self
                        .peek()
                        .ok_or_else(|| "dangling escape in string literal".to_string())?;
                    // Keep `\{` and `\}` escaped; States.Format resolves them.
                    if escaped == '{' || escaped == '}' {
                        out.push('\\');
                    }
                    out.push(escaped);
                    self.pos += 1;
                }
                Some('\'') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn path(&mut self) -> Result<JsonPath, String> {
        let start = self.pos;
        let mut quote: Option<char> = None;
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None => match c {
                    '\'' | '"' => quote = Some(c),
                    '[' => depth += 1,
                    ']' => depth = depth.saturating_sub(1),
                    ',' | ')' if depth == 0 => break,
                    c if c.is_whitespace() && depth == 0 => break,
                    _ => {}
                },
            }
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        JsonPath::parse(&raw).map_err(|e| e.to_string())
    }

    fn number(&mut self) -> Result<Value, String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c == '-' || c == '.' || c == 'e' || c == 'E' || c == '+' || c.is_ascii_digit())
        {
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        serde_json::from_str::<serde_json::Number>(&raw)
            .map(Value::Number)
            .map_err(|_| format!("invalid number literal '{raw}'"))
    }
}

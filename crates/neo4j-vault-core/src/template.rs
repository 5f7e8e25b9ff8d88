//! Username templates.
//!
//! Credential names are generated from request metadata with a small
//! pipeline language:
//!
//! ```text
//! v-{{ .DisplayName | truncate 15 }}-{{ random 20 }}
//! ```
//!
//! An action holds commands joined by `|`; the value produced by one command
//! is passed as the last argument of the next. Operands are the fields
//! `.DisplayName` and `.RoleName`, quoted strings, integers, bare function
//! names (called without arguments), and parenthesised pipelines.
//!
//! Templates are parsed once, so unknown functions, unknown fields, bad
//! literals, and wrong argument counts are reported before any credential
//! is generated.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Template used when the config does not supply `username_template`.
pub const DEFAULT_USERNAME_TEMPLATE: &str = r#"{{ printf "v-%s-%s-%s-%s" (.DisplayName | truncate 15) (.RoleName | truncate 15) (random 20) (unix_time) | replace "." "-" | truncate 100 }}"#;

/// Longest string `random` will produce.
const MAX_RANDOM_LENGTH: i64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unclosed action starting at byte {0}")]
    UnclosedAction(usize),

    #[error("unterminated string literal at byte {0}")]
    UnterminatedString(usize),

    #[error("unexpected {0:?} in action")]
    UnexpectedToken(String),

    #[error("missing value for command")]
    EmptyCommand,

    #[error("unknown field: .{0}")]
    UnknownField(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("{function}: expected {expected} argument(s), got {got}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        got: usize,
    },

    #[error("{function}: {reason}")]
    InvalidArgument {
        function: &'static str,
        reason: String,
    },
}

/// Request metadata available to templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameMetadata {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub role_name: String,
}

/// Produces a database username for a new credential.
pub trait UsernameGenerator: Send + Sync {
    fn generate(&self, metadata: &UsernameMetadata) -> Result<String, TemplateError>;
}

/// A parsed username template.
#[derive(Debug, Clone)]
pub struct UsernameTemplate {
    source: String,
    nodes: Vec<Node>,
}

impl UsernameTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut nodes = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                nodes.push(Node::Text(rest[..open].to_string()));
            }
            let start = offset + open;
            let body = &rest[open + 2..];
            let (tokens, consumed) = lex_action(body, start)?;
            nodes.push(Node::Action(Parser::new(tokens).parse_action()?));

            let advance = open + 2 + consumed;
            rest = &rest[advance..];
            offset += advance;
        }
        if !rest.is_empty() {
            nodes.push(Node::Text(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            nodes,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Default for UsernameTemplate {
    fn default() -> Self {
        Self::parse(DEFAULT_USERNAME_TEMPLATE).expect("default username template parses")
    }
}

impl FromStr for UsernameTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl UsernameGenerator for UsernameTemplate {
    fn generate(&self, metadata: &UsernameMetadata) -> Result<String, TemplateError> {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(pipeline) => out.push_str(&pipeline.eval(metadata)?.into_string()),
            }
        }
        Ok(out)
    }
}

// ── Syntax tree ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Action(Pipeline),
}

#[derive(Debug, Clone)]
struct Pipeline(Vec<Cmd>);

#[derive(Debug, Clone)]
enum Cmd {
    Call { func: Func, args: Vec<Operand> },
    Value(Operand),
}

#[derive(Debug, Clone)]
enum Operand {
    Field(Field),
    Str(String),
    Int(i64),
    Call(Func),
    Sub(Pipeline),
}

#[derive(Debug, Clone, Copy)]
enum Field {
    DisplayName,
    RoleName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Printf,
    Truncate,
    Random,
    Uppercase,
    Lowercase,
    Replace,
    UnixTime,
    UnixTimeMillis,
    Uuid,
}

impl Func {
    fn lookup(name: &str) -> Result<Self, TemplateError> {
        Ok(match name {
            "printf" => Self::Printf,
            "truncate" => Self::Truncate,
            "random" => Self::Random,
            "uppercase" => Self::Uppercase,
            "lowercase" => Self::Lowercase,
            "replace" => Self::Replace,
            "unix_time" => Self::UnixTime,
            "unix_time_millis" => Self::UnixTimeMillis,
            "uuid" => Self::Uuid,
            other => return Err(TemplateError::UnknownFunction(other.to_string())),
        })
    }

    fn name(self) -> &'static str {
        match self {
            Self::Printf => "printf",
            Self::Truncate => "truncate",
            Self::Random => "random",
            Self::Uppercase => "uppercase",
            Self::Lowercase => "lowercase",
            Self::Replace => "replace",
            Self::UnixTime => "unix_time",
            Self::UnixTimeMillis => "unix_time_millis",
            Self::Uuid => "uuid",
        }
    }

    fn check_arity(self, got: usize) -> Result<(), TemplateError> {
        let (ok, expected) = match self {
            Self::Printf => (got >= 1, "at least 1"),
            Self::Truncate => (got == 2, "2"),
            Self::Random => (got == 1, "1"),
            Self::Uppercase | Self::Lowercase => (got == 1, "1"),
            Self::Replace => (got == 3, "3"),
            Self::UnixTime | Self::UnixTimeMillis | Self::Uuid => (got == 0, "0"),
        };
        if ok {
            Ok(())
        } else {
            Err(TemplateError::Arity {
                function: self.name(),
                expected,
                got,
            })
        }
    }
}

// ── Lexer ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(String),
    Str(String),
    Int(i64),
    Ident(String),
    Pipe,
    LParen,
    RParen,
}

/// Lex an action body up to and including its closing `}}`. Returns the
/// tokens and the number of bytes consumed.
fn lex_action(body: &str, start: usize) -> Result<(Vec<Token>, usize), TemplateError> {
    let bytes = body.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'}' if bytes.get(i + 1) == Some(&b'}') => return Ok((tokens, i + 2)),
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            b'|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            b'(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            b'"' => {
                let (s, len) = lex_quoted(&body[i..], start + 2 + i)?;
                tokens.push(Token::Str(s));
                i += len;
            }
            b'`' => {
                let close = body[i + 1..]
                    .find('`')
                    .ok_or(TemplateError::UnterminatedString(start + 2 + i))?;
                tokens.push(Token::Str(body[i + 1..i + 1 + close].to_string()));
                i += close + 2;
            }
            b'.' => {
                let len = ident_len(&body[i + 1..]);
                if len == 0 {
                    return Err(TemplateError::UnexpectedToken(".".to_string()));
                }
                tokens.push(Token::Field(body[i + 1..i + 1 + len].to_string()));
                i += len + 1;
            }
            b'-' | b'0'..=b'9' => {
                let digits = body[i + 1..]
                    .bytes()
                    .take_while(u8::is_ascii_digit)
                    .count();
                let literal = &body[i..i + 1 + digits];
                let n = literal
                    .parse()
                    .map_err(|_| TemplateError::UnexpectedToken(literal.to_string()))?;
                tokens.push(Token::Int(n));
                i += 1 + digits;
            }
            c if c == b'_' || c.is_ascii_alphabetic() => {
                let len = ident_len(&body[i..]);
                tokens.push(Token::Ident(body[i..i + len].to_string()));
                i += len;
            }
            _ => {
                let ch = body[i..].chars().next().unwrap_or_default();
                return Err(TemplateError::UnexpectedToken(ch.to_string()));
            }
        }
    }

    Err(TemplateError::UnclosedAction(start))
}

fn ident_len(s: &str) -> usize {
    s.bytes()
        .take_while(|b| *b == b'_' || b.is_ascii_alphanumeric())
        .count()
}

/// Lex a double-quoted string starting at `s[0] == '"'`.
fn lex_quoted(s: &str, at: usize) -> Result<(String, usize), TemplateError> {
    let mut out = String::new();
    let mut chars = s.char_indices().skip(1);

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((out, i + 1)),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, c @ ('"' | '\\'))) => out.push(c),
                Some((_, other)) => {
                    return Err(TemplateError::UnexpectedToken(format!("\\{other}")));
                }
                None => break,
            },
            c => out.push(c),
        }
    }

    Err(TemplateError::UnterminatedString(at))
}

// ── Parser ───────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

enum Item {
    Func(Func),
    Operand(Operand),
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse_action(mut self) -> Result<Pipeline, TemplateError> {
        let pipeline = self.parse_pipeline()?;
        match self.tokens.get(self.pos) {
            None => Ok(pipeline),
            Some(tok) => Err(TemplateError::UnexpectedToken(describe(tok))),
        }
    }

    fn parse_pipeline(&mut self) -> Result<Pipeline, TemplateError> {
        let mut cmds = Vec::new();
        loop {
            let piped = !cmds.is_empty();
            cmds.push(self.parse_command(piped)?);
            if self.tokens.get(self.pos) == Some(&Token::Pipe) {
                self.pos += 1;
            } else {
                return Ok(Pipeline(cmds));
            }
        }
    }

    fn parse_command(&mut self, piped: bool) -> Result<Cmd, TemplateError> {
        let mut items = Vec::new();
        while let Some(tok) = self.tokens.get(self.pos) {
            if matches!(tok, Token::Pipe | Token::RParen) {
                break;
            }
            items.push(self.parse_item()?);
        }

        let mut items = items.into_iter();
        match items.next() {
            None => Err(TemplateError::EmptyCommand),
            Some(Item::Func(func)) => {
                let args = items
                    .map(|item| match item {
                        Item::Func(f) => f.check_arity(0).map(|()| Operand::Call(f)),
                        Item::Operand(op) => Ok(op),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                func.check_arity(args.len() + usize::from(piped))?;
                Ok(Cmd::Call { func, args })
            }
            Some(Item::Operand(op)) => {
                if let Some(extra) = items.next() {
                    let text = match extra {
                        Item::Func(f) => f.name().to_string(),
                        Item::Operand(_) => "operand".to_string(),
                    };
                    return Err(TemplateError::UnexpectedToken(text));
                }
                if piped {
                    return Err(TemplateError::UnexpectedToken(
                        "value after pipe".to_string(),
                    ));
                }
                Ok(Cmd::Value(op))
            }
        }
    }

    fn parse_item(&mut self) -> Result<Item, TemplateError> {
        let tok = self.tokens[self.pos].clone();
        self.pos += 1;
        Ok(match tok {
            Token::Ident(name) => Item::Func(Func::lookup(&name)?),
            Token::Field(name) => Item::Operand(Operand::Field(match name.as_str() {
                "DisplayName" => Field::DisplayName,
                "RoleName" => Field::RoleName,
                _ => return Err(TemplateError::UnknownField(name)),
            })),
            Token::Str(s) => Item::Operand(Operand::Str(s)),
            Token::Int(n) => Item::Operand(Operand::Int(n)),
            Token::LParen => {
                let inner = self.parse_pipeline()?;
                match self.tokens.get(self.pos) {
                    Some(Token::RParen) => self.pos += 1,
                    Some(tok) => return Err(TemplateError::UnexpectedToken(describe(tok))),
                    None => return Err(TemplateError::UnexpectedToken("end of action".into())),
                }
                Item::Operand(Operand::Sub(inner))
            }
            other => return Err(TemplateError::UnexpectedToken(describe(&other))),
        })
    }
}

fn describe(tok: &Token) -> String {
    match tok {
        Token::Field(name) => format!(".{name}"),
        Token::Str(s) => format!("{s:?}"),
        Token::Int(n) => n.to_string(),
        Token::Ident(name) => name.clone(),
        Token::Pipe => "|".to_string(),
        Token::LParen => "(".to_string(),
        Token::RParen => ")".to_string(),
    }
}

// ── Evaluation ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Int(i64),
}

impl Value {
    fn into_string(self) -> String {
        match self {
            Self::Str(s) => s,
            Self::Int(n) => n.to_string(),
        }
    }

    fn as_int(&self, function: &'static str) -> Result<i64, TemplateError> {
        match self {
            Self::Int(n) => Ok(*n),
            Self::Str(s) => s.trim().parse().map_err(|_| TemplateError::InvalidArgument {
                function,
                reason: format!("expected an integer, got {s:?}"),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
        }
    }
}

impl Pipeline {
    fn eval(&self, md: &UsernameMetadata) -> Result<Value, TemplateError> {
        let mut piped: Option<Value> = None;
        for cmd in &self.0 {
            piped = Some(cmd.eval(md, piped.take())?);
        }
        Ok(piped.unwrap_or(Value::Str(String::new())))
    }
}

impl Cmd {
    fn eval(&self, md: &UsernameMetadata, piped: Option<Value>) -> Result<Value, TemplateError> {
        match self {
            Self::Value(op) => op.eval(md),
            Self::Call { func, args } => {
                let mut values = args
                    .iter()
                    .map(|op| op.eval(md))
                    .collect::<Result<Vec<_>, _>>()?;
                values.extend(piped);
                call(*func, values)
            }
        }
    }
}

impl Operand {
    fn eval(&self, md: &UsernameMetadata) -> Result<Value, TemplateError> {
        match self {
            Self::Field(Field::DisplayName) => Ok(Value::Str(md.display_name.clone())),
            Self::Field(Field::RoleName) => Ok(Value::Str(md.role_name.clone())),
            Self::Str(s) => Ok(Value::Str(s.clone())),
            Self::Int(n) => Ok(Value::Int(*n)),
            Self::Call(func) => call(*func, Vec::new()),
            Self::Sub(pipeline) => pipeline.eval(md),
        }
    }
}

/// Apply a function. Arity was checked at parse time.
fn call(func: Func, mut args: Vec<Value>) -> Result<Value, TemplateError> {
    let name = func.name();
    match func {
        Func::Printf => {
            let format = args.remove(0).into_string();
            printf(&format, args).map(Value::Str)
        }
        Func::Truncate => {
            let s = args.pop().unwrap_or(Value::Str(String::new())).into_string();
            let max = args[0].as_int(name)?;
            if max < 0 {
                return Err(TemplateError::InvalidArgument {
                    function: name,
                    reason: format!("length must be >= 0, got {max}"),
                });
            }
            Ok(Value::Str(s.chars().take(max as usize).collect()))
        }
        Func::Random => {
            let len = args[0].as_int(name)?;
            if !(1..=MAX_RANDOM_LENGTH).contains(&len) {
                return Err(TemplateError::InvalidArgument {
                    function: name,
                    reason: format!("length must be between 1 and {MAX_RANDOM_LENGTH}, got {len}"),
                });
            }
            let s = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(len as usize)
                .map(char::from)
                .collect();
            Ok(Value::Str(s))
        }
        Func::Uppercase => Ok(Value::Str(args.remove(0).into_string().to_uppercase())),
        Func::Lowercase => Ok(Value::Str(args.remove(0).into_string().to_lowercase())),
        Func::Replace => {
            let s = args.pop().unwrap_or(Value::Str(String::new())).into_string();
            let to = args.pop().unwrap_or(Value::Str(String::new())).into_string();
            let from = args.pop().unwrap_or(Value::Str(String::new())).into_string();
            if from.is_empty() {
                return Ok(Value::Str(s));
            }
            Ok(Value::Str(s.replace(&from, &to)))
        }
        Func::UnixTime => Ok(Value::Int(Utc::now().timestamp())),
        Func::UnixTimeMillis => Ok(Value::Int(Utc::now().timestamp_millis())),
        Func::Uuid => Ok(Value::Str(Uuid::new_v4().to_string())),
    }
}

fn printf(format: &str, args: Vec<Value>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(format.len());
    let mut args = args.into_iter();
    let mut chars = format.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(verb @ ('s' | 'd' | 'v')) => {
                let arg = args.next().ok_or_else(|| TemplateError::InvalidArgument {
                    function: "printf",
                    reason: format!("missing argument for %{verb}"),
                })?;
                if verb == 'd' {
                    out.push_str(&arg.as_int("printf")?.to_string());
                } else {
                    out.push_str(&arg.to_string());
                }
            }
            Some(other) => {
                return Err(TemplateError::InvalidArgument {
                    function: "printf",
                    reason: format!("unsupported verb %{other}"),
                });
            }
            None => {
                return Err(TemplateError::InvalidArgument {
                    function: "printf",
                    reason: "format ends with a lone %".to_string(),
                });
            }
        }
    }

    let extra = args.count();
    if extra > 0 {
        return Err(TemplateError::InvalidArgument {
            function: "printf",
            reason: format!("{extra} unused argument(s)"),
        });
    }
    Ok(out)
}

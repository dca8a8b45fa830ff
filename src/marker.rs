//! Marker Evaluator
//!
//! Parses and evaluates PEP 508 environment markers such as
//! `python_version >= "3.8" and (sys_platform == "linux" or extra == "gpu")`.
//!
//! # Grammar
//!
//! ```text
//! or_expr  := and_expr ("or" and_expr)*
//! and_expr := atom ("and" atom)*
//! atom     := "(" or_expr ")" | value op value
//! value    := variable | quoted string
//! op       := == | != | <= | >= | < | > | ~= | === | in | not in
//! ```
//!
//! `and` binds tighter than `or`, and parentheses nest.
//!
//! Unknown variables are rejected at parse time, so a parsed [`Marker`]
//! always evaluates without error.

use std::fmt;
use std::str::FromStr;

use strum::{Display, EnumIter, EnumString};

use crate::constraint;
use crate::environment::TargetEnvironment;
use crate::error::{PlanError, Result};
use crate::lockfile::normalize_name;
use crate::version::Version;

/// Environment variables a marker may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumString, EnumIter)]
pub enum MarkerVariable {
    #[strum(to_string = "os_name", serialize = "os.name")]
    OsName,
    #[strum(to_string = "sys_platform", serialize = "sys.platform")]
    SysPlatform,
    #[strum(to_string = "platform_machine", serialize = "platform.machine")]
    PlatformMachine,
    #[strum(
        to_string = "platform_python_implementation",
        serialize = "platform.python_implementation",
        serialize = "python_implementation"
    )]
    PlatformPythonImplementation,
    #[strum(to_string = "platform_release")]
    PlatformRelease,
    #[strum(to_string = "platform_system")]
    PlatformSystem,
    #[strum(to_string = "platform_version", serialize = "platform.version")]
    PlatformVersion,
    #[strum(to_string = "python_version")]
    PythonVersion,
    #[strum(to_string = "python_full_version")]
    PythonFullVersion,
    #[strum(to_string = "implementation_name")]
    ImplementationName,
    #[strum(to_string = "implementation_version")]
    ImplementationVersion,
    #[strum(to_string = "extra")]
    Extra,
}

impl MarkerVariable {
    /// Look the variable up in `env`
    ///
    /// `extra` has no single value; it is matched by membership instead.
    pub fn value_in(&self, env: &TargetEnvironment) -> String {
        match self {
            Self::OsName => env.os.os_name().to_string(),
            Self::SysPlatform => env.os.sys_platform().to_string(),
            Self::PlatformMachine => env.machine.clone(),
            Self::PlatformPythonImplementation => {
                env.implementation.platform_python_implementation().to_string()
            }
            Self::PlatformRelease => env.platform_release.clone(),
            Self::PlatformSystem => env.os.platform_system().to_string(),
            Self::PlatformVersion => env.platform_version.clone(),
            Self::PythonVersion => env.python_short_version(),
            Self::PythonFullVersion => env.python_full_version().to_string(),
            Self::ImplementationName => env.implementation.implementation_name().to_string(),
            Self::ImplementationVersion => env.implementation_version().to_string(),
            Self::Extra => String::new(),
        }
    }

    /// Whether comparisons against this variable use version ordering
    pub fn is_version(&self) -> bool {
        matches!(
            self,
            Self::PythonVersion
                | Self::PythonFullVersion
                | Self::ImplementationVersion
                | Self::PlatformRelease
        )
    }
}

/// Comparison operator inside a marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Compatible,
    Identical,
    In,
    NotIn,
}

impl MarkerOp {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::Compatible => "~=",
            Self::Identical => "===",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }

    /// Operator with operands swapped, for `"3.8" <= python_version`
    fn flipped(&self) -> Option<Self> {
        match self {
            Self::Less => Some(Self::Greater),
            Self::LessEqual => Some(Self::GreaterEqual),
            Self::Greater => Some(Self::Less),
            Self::GreaterEqual => Some(Self::LessEqual),
            Self::Equal | Self::NotEqual | Self::Identical => Some(*self),
            Self::Compatible | Self::In | Self::NotIn => None,
        }
    }
}

/// One side of a comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerValue {
    Variable(MarkerVariable),
    Literal(String),
}

/// Parsed marker expression tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerExpr {
    Compare {
        left: MarkerValue,
        op: MarkerOp,
        right: MarkerValue,
    },
    And(Box<MarkerExpr>, Box<MarkerExpr>),
    Or(Box<MarkerExpr>, Box<MarkerExpr>),
}

/// A parsed marker, ready to be evaluated against any environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    text: String,
    expr: MarkerExpr,
}

/// Parse and evaluate `marker` in one step
///
/// A blank marker is always true.
pub fn evaluate(marker: &str, env: &TargetEnvironment) -> Result<bool> {
    if marker.trim().is_empty() {
        return Ok(true);
    }
    Ok(Marker::parse(marker)?.evaluate(env))
}

/// Evaluate an optional marker; `None` is always true
pub fn evaluate_optional(marker: Option<&str>, env: &TargetEnvironment) -> Result<bool> {
    match marker {
        Some(text) => evaluate(text, env),
        None => Ok(true),
    }
}

impl Marker {
    /// Parse a marker expression
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = lex(text)?;
        let mut parser = Parser {
            text,
            tokens,
            pos: 0,
        };
        let expr = parser.or_expr()?;
        if let Some(token) = parser.peek() {
            return Err(PlanError::marker(text, format!("unexpected {}", token)));
        }
        Ok(Self {
            text: text.trim().to_string(),
            expr,
        })
    }

    /// The parsed expression tree
    pub fn expr(&self) -> &MarkerExpr {
        &self.expr
    }

    /// Evaluate against `env`
    pub fn evaluate(&self, env: &TargetEnvironment) -> bool {
        eval_expr(&self.expr, env)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Marker {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ============================================================================
// Evaluation
// ============================================================================

fn eval_expr(expr: &MarkerExpr, env: &TargetEnvironment) -> bool {
    match expr {
        MarkerExpr::And(a, b) => eval_expr(a, env) && eval_expr(b, env),
        MarkerExpr::Or(a, b) => eval_expr(a, env) || eval_expr(b, env),
        MarkerExpr::Compare { left, op, right } => eval_compare(left, *op, right, env),
    }
}

fn eval_compare(left: &MarkerValue, op: MarkerOp, right: &MarkerValue, env: &TargetEnvironment) -> bool {
    use MarkerValue::{Literal, Variable};

    match (left, right) {
        (Variable(MarkerVariable::Extra), Literal(extra))
        | (Literal(extra), Variable(MarkerVariable::Extra)) => match op {
            MarkerOp::Equal | MarkerOp::Identical => env.has_extra(extra),
            MarkerOp::NotEqual => !env.has_extra(extra),
            _ => false,
        },
        (Variable(var), Literal(_)) if var.is_version() => {
            let lhs = var.value_in(env);
            let rhs = resolve(right, env);
            compare(op, &lhs, &rhs, true)
        }
        (Literal(_), Variable(var)) if var.is_version() => {
            let lhs = resolve(left, env);
            let rhs = var.value_in(env);
            match op.flipped() {
                Some(flipped) => compare(flipped, &rhs, &lhs, true),
                None => compare(op, &lhs, &rhs, false),
            }
        }
        _ => compare(op, &resolve(left, env), &resolve(right, env), false),
    }
}

fn resolve(value: &MarkerValue, env: &TargetEnvironment) -> String {
    match value {
        MarkerValue::Variable(var) => var.value_in(env),
        MarkerValue::Literal(text) => text.clone(),
    }
}

fn compare(op: MarkerOp, lhs: &str, rhs: &str, versioned: bool) -> bool {
    if versioned && !matches!(op, MarkerOp::In | MarkerOp::NotIn) {
        if let Ok(version) = Version::parse(lhs) {
            let expr = format!("{}{}", op.as_str(), rhs);
            if let Ok(result) = constraint::satisfies_version(&version, &expr) {
                return result;
            }
        }
    }

    match op {
        MarkerOp::Equal | MarkerOp::Identical => lhs == rhs,
        MarkerOp::NotEqual => lhs != rhs,
        MarkerOp::Less => lhs < rhs,
        MarkerOp::LessEqual => lhs <= rhs,
        MarkerOp::Greater => lhs > rhs,
        MarkerOp::GreaterEqual => lhs >= rhs,
        MarkerOp::Compatible => false,
        MarkerOp::In => rhs.contains(lhs),
        MarkerOp::NotIn => !rhs.contains(lhs),
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Op(MarkerOp),
    Str(String),
    Var(MarkerVariable),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LParen => write!(f, "'('"),
            Self::RParen => write!(f, "')'"),
            Self::And => write!(f, "'and'"),
            Self::Or => write!(f, "'or'"),
            Self::Op(op) => write!(f, "'{}'", op.as_str()),
            Self::Str(s) => write!(f, "string {:?}", s),
            Self::Var(v) => write!(f, "variable '{}'", v),
        }
    }
}

fn lex(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&q| q == c)
                    .ok_or_else(|| PlanError::marker(text, "unterminated string"))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '=' | '!' | '<' | '>' | '~' => {
                let run: String = chars[i..]
                    .iter()
                    .take_while(|c| matches!(**c, '=' | '!' | '<' | '>' | '~'))
                    .collect();
                let op = match run.as_str() {
                    "==" => MarkerOp::Equal,
                    "!=" => MarkerOp::NotEqual,
                    "<" => MarkerOp::Less,
                    "<=" => MarkerOp::LessEqual,
                    ">" => MarkerOp::Greater,
                    ">=" => MarkerOp::GreaterEqual,
                    "~=" => MarkerOp::Compatible,
                    "===" => MarkerOp::Identical,
                    other => {
                        return Err(PlanError::marker(text, format!("unknown operator '{}'", other)));
                    }
                };
                tokens.push(Token::Op(op));
                i += run.chars().count();
            }
            c if c.is_ascii_alphanumeric() || c == '_' || c == '.' => {
                let word: String = chars[i..]
                    .iter()
                    .take_while(|c| c.is_ascii_alphanumeric() || **c == '_' || **c == '.')
                    .collect();
                i += word.len();
                let token = match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "in" => Token::Op(MarkerOp::In),
                    "not" => {
                        let rest: String = chars[i..].iter().collect();
                        let rest_trimmed = rest.trim_start();
                        let after = rest_trimmed.strip_prefix("in").filter(|tail| {
                            !tail.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
                        });
                        if after.is_none() {
                            return Err(PlanError::marker(text, "expected 'in' after 'not'"));
                        }
                        i += rest.chars().count() - rest_trimmed.chars().count() + 2;
                        Token::Op(MarkerOp::NotIn)
                    }
                    name => Token::Var(MarkerVariable::from_str(name).map_err(|_| {
                        PlanError::UnknownMarkerVariable {
                            variable: name.to_string(),
                        }
                    })?),
                };
                tokens.push(token);
            }
            other => {
                return Err(PlanError::marker(text, format!("unexpected character '{}'", other)));
            }
        }
    }

    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error(&self, reason: impl Into<String>) -> PlanError {
        PlanError::marker(self.text, reason)
    }

    fn or_expr(&mut self) -> Result<MarkerExpr> {
        let mut expr = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.and_expr()?;
            expr = MarkerExpr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn and_expr(&mut self) -> Result<MarkerExpr> {
        let mut expr = self.atom()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.atom()?;
            expr = MarkerExpr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn atom(&mut self) -> Result<MarkerExpr> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let expr = self.or_expr()?;
            return match self.next() {
                Some(Token::RParen) => Ok(expr),
                Some(other) => Err(self.error(format!("expected ')', found {}", other))),
                None => Err(self.error("expected ')'")),
            };
        }

        let left = self.value()?;
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            Some(other) => return Err(self.error(format!("expected operator, found {}", other))),
            None => return Err(self.error("expected operator")),
        };
        let right = self.value()?;
        Ok(MarkerExpr::Compare { left, op, right })
    }

    fn value(&mut self) -> Result<MarkerValue> {
        match self.next() {
            Some(Token::Var(var)) => Ok(MarkerValue::Variable(var)),
            Some(Token::Str(s)) => Ok(MarkerValue::Literal(s)),
            Some(other) => Err(self.error(format!("expected value, found {}", other))),
            None => Err(self.error("unexpected end of marker")),
        }
    }
}

/// Normalized extra names referenced by `extra == "..."` comparisons
pub fn referenced_extras(marker: &Marker) -> Vec<String> {
    fn walk(expr: &MarkerExpr, out: &mut Vec<String>) {
        match expr {
            MarkerExpr::And(a, b) | MarkerExpr::Or(a, b) => {
                walk(a, out);
                walk(b, out);
            }
            MarkerExpr::Compare { left, right, .. } => match (left, right) {
                (MarkerValue::Variable(MarkerVariable::Extra), MarkerValue::Literal(extra))
                | (MarkerValue::Literal(extra), MarkerValue::Variable(MarkerVariable::Extra)) => {
                    out.push(normalize_name(extra));
                }
                _ => {}
            },
        }
    }

    let mut extras = Vec::new();
    walk(&marker.expr, &mut extras);
    extras.sort();
    extras.dedup();
    extras
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Implementation, OsFamily};

    fn linux() -> TargetEnvironment {
        TargetEnvironment::new("3.11.4", OsFamily::Linux, "x86_64")
    }

    fn eval(marker: &str, env: &TargetEnvironment) -> bool {
        evaluate(marker, env).unwrap_or_else(|e| panic!("{}", e))
    }

    #[test]
    fn test_simple_string_comparisons() {
        let env = linux();
        assert!(eval(r#"os_name == "posix""#, &env));
        assert!(!eval(r#"os_name == "nt""#, &env));
        assert!(eval(r#"sys_platform != "win32""#, &env));
        assert!(eval(r#"platform_machine == 'x86_64'"#, &env));
        assert!(eval(r#"platform_system == "Linux""#, &env));
    }

    #[test]
    fn test_version_comparisons() {
        let env = linux();
        assert!(eval(r#"python_version >= "3.8""#, &env));
        assert!(eval(r#"python_version < "3.12""#, &env));
        assert!(!eval(r#"python_version < "3.8""#, &env));
        // 3.11 > 3.9 as versions even though "3.11" < "3.9" as strings
        assert!(eval(r#"python_version > "3.9""#, &env));
        assert!(eval(r#"python_full_version >= "3.11.2""#, &env));
        assert!(eval(r#"python_version == "3.11""#, &env));
        assert!(eval(r#"python_version == "3.*""#, &env));
        assert!(eval(r#"python_full_version ~= "3.11.0""#, &env));
    }

    #[test]
    fn test_reversed_operands() {
        let env = linux();
        assert!(eval(r#""3.8" <= python_version"#, &env));
        assert!(!eval(r#""3.12" <= python_version"#, &env));
    }

    #[test]
    fn test_precedence_and_parentheses() {
        let env = linux();
        // and binds tighter: true or (false and false)
        assert!(eval(
            r#"os_name == "posix" or os_name == "nt" and python_version < "3""#,
            &env
        ));
        // parenthesized: (true or false) and false
        assert!(!eval(
            r#"(os_name == "posix" or os_name == "nt") and python_version < "3""#,
            &env
        ));
    }

    #[test]
    fn test_in_operators() {
        let env = linux();
        assert!(eval(r#"python_version in "3.10 3.11 3.12""#, &env));
        assert!(eval(r#"python_version not in "2.6 2.7""#, &env));
        assert!(eval(r#"'linux' in sys_platform"#, &env));
    }

    #[test]
    fn test_extras() {
        let env = linux();
        assert!(!eval(r#"extra == "gpu""#, &env));

        let env = linux().with_extra("gpu");
        assert!(eval(r#"extra == "gpu""#, &env));
        assert!(eval(r#"extra == "GPU""#, &env));
        assert!(!eval(r#"extra != "gpu""#, &env));
    }

    #[test]
    fn test_implementation_variables() {
        let env = linux().with_implementation(Implementation::PyPy);
        assert!(eval(r#"implementation_name == "pypy""#, &env));
        assert!(eval(r#"platform_python_implementation == "PyPy""#, &env));
        assert!(eval(r#"platform_python_implementation != "CPython""#, &env));
    }

    #[test]
    fn test_legacy_dotted_names() {
        let env = linux();
        assert!(eval(r#"os.name == "posix""#, &env));
        assert!(eval(r#"sys.platform == "linux""#, &env));
    }

    #[test]
    fn test_blank_marker_is_true() {
        assert!(eval("", &linux()));
        assert!(evaluate_optional(None, &linux()).unwrap());
    }

    #[test]
    fn test_unknown_variable() {
        let err = evaluate(r#"favourite_color == "blue""#, &linux()).unwrap_err();
        assert_eq!(
            err,
            PlanError::UnknownMarkerVariable {
                variable: "favourite_color".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_markers() {
        for bad in [
            r#"os_name =="#,
            r#"os_name "posix""#,
            r#"(os_name == "posix""#,
            r#"os_name == "posix" and"#,
            r#"os_name == "posix"#,
            r#"os_name <> "posix""#,
            r#"os_name not "posix""#,
            r#"os_name == "posix" )"#,
            r#"os_name == "posix" # comment"#,
        ] {
            let err = evaluate(bad, &linux()).unwrap_err();
            assert!(
                matches!(err, PlanError::InvalidMarker { .. }),
                "{} should be invalid, got {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_parse_once_evaluate_many() {
        let marker = Marker::parse(r#"sys_platform == "darwin""#).unwrap();
        assert!(!marker.evaluate(&linux()));
        let mac = TargetEnvironment::new("3.11", OsFamily::Darwin, "arm64");
        assert!(marker.evaluate(&mac));
        assert_eq!(marker.to_string(), r#"sys_platform == "darwin""#);
    }

    #[test]
    fn test_referenced_extras() {
        let marker =
            Marker::parse(r#"extra == "Docs" or (extra == "test" and os_name == "nt")"#).unwrap();
        assert_eq!(referenced_extras(&marker), vec!["docs", "test"]);
    }
}

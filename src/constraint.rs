//! Constraint Evaluator
//!
//! Evaluates compound version-range expressions such as
//! `">=3.8,<4.0"` or `"^2.7 || >=3.5"` against a concrete version.
//!
//! # Evaluation Order
//!
//! The expression is split on `,` (and) and `||` (or) and folded strictly
//! left to right, with no precedence between the two delimiters:
//!
//! ```text
//! "a || b, c"  ==  ((a OR b) AND c)
//! ```
//!
//! This is not the usual `and`-binds-tighter reading; callers rely on the
//! sequential result.
//!
//! # Comparators
//!
//! | Form          | Meaning                                         |
//! |---------------|-------------------------------------------------|
//! | `*`           | any version                                     |
//! | `==X`, `!=X`  | equal / not equal (zero padded)                 |
//! | `==X.*`       | release prefix match (also `!=X.*`)             |
//! | `===X`        | string identity                                 |
//! | `>=X` etc.    | ordering                                        |
//! | `~=X.Y`       | compatible release: `>=X.Y, ==X.*`              |
//! | `~X.Y`        | tilde: `>=X.Y, <X.(Y+1)`                        |
//! | `^X.Y.Z`      | caret: `>=X.Y.Z`, below the next breaking bump  |
//! | `X`, `X.*`    | release prefix match (exact if X has a suffix)  |

use crate::error::{PlanError, Result};
use crate::version::Version;

/// Boolean connective applied to the next comparator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connective {
    And,
    Or,
}

/// One lexical piece of a constraint expression
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Delimiter(Connective),
    Comparator(&'a str),
}

/// Check whether `version` satisfies `constraint`
///
/// An empty constraint is vacuously satisfied.
pub fn satisfies(version: &str, constraint: &str) -> Result<bool> {
    let version = Version::parse(version)?;
    satisfies_version(&version, constraint)
}

/// Same as [`satisfies`] for an already parsed version
pub fn satisfies_version(version: &Version, constraint: &str) -> Result<bool> {
    let mut connective = Connective::And;
    let mut accumulated = true;

    for token in tokenize(constraint) {
        match token {
            Token::Delimiter(next) => connective = next,
            Token::Comparator(text) => {
                let matched = Comparator::parse(text)
                    .map_err(|reason| PlanError::constraint(constraint, reason))?
                    .matches(version);
                accumulated = match connective {
                    Connective::And => accumulated && matched,
                    Connective::Or => accumulated || matched,
                };
            }
        }
    }

    Ok(accumulated)
}

fn tokenize(constraint: &str) -> Vec<Token<'_>> {
    let bytes = constraint.as_bytes();
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let delimiter = match bytes[i] {
            b',' => Some((Connective::And, 1)),
            b'|' if bytes.get(i + 1) == Some(&b'|') => Some((Connective::Or, 2)),
            _ => None,
        };
        match delimiter {
            Some((connective, width)) => {
                push_text(&mut tokens, &constraint[start..i]);
                tokens.push(Token::Delimiter(connective));
                i += width;
                start = i;
            }
            None => i += 1,
        }
    }
    push_text(&mut tokens, &constraint[start..]);

    tokens
}

fn push_text<'a>(tokens: &mut Vec<Token<'a>>, text: &'a str) {
    let text = text.trim();
    if !text.is_empty() {
        tokens.push(Token::Comparator(text));
    }
}

/// A single atomic version comparison
#[derive(Debug, Clone)]
enum Comparator {
    Any,
    Equal(Version),
    NotEqual(Version),
    Prefix(Version),
    NotPrefix(Version),
    Identical(String),
    Greater(Version),
    GreaterEqual(Version),
    Less(Version),
    LessEqual(Version),
    /// Inclusive lower bound, exclusive upper bound
    Range(Version, Version),
}

fn upper_bound(version: &Version, len: usize) -> std::result::Result<Version, String> {
    version
        .bump(len)
        .ok_or_else(|| format!("no upper bound above '{}'", version))
}

impl Comparator {
    fn parse(text: &str) -> std::result::Result<Self, String> {
        if text == "*" {
            return Ok(Self::Any);
        }

        const OPERATORS: &[&str] = &["===", "==", "!=", "~=", ">=", "<=", ">", "<", "~", "^", "="];
        let (op, operand) = OPERATORS
            .iter()
            .find_map(|op| text.strip_prefix(op).map(|rest| (*op, rest.trim())))
            .unwrap_or(("", text));

        if operand.is_empty() {
            return Err(format!("missing version after '{}'", op));
        }

        if op == "===" {
            return Ok(Self::Identical(operand.to_string()));
        }

        let (operand, wildcard) = match operand.strip_suffix(".*") {
            Some(base) => (base, true),
            None => (operand, false),
        };
        if operand == "*" {
            return match op {
                "" | "==" | "=" | ">=" => Ok(Self::Any),
                _ => Err(format!("wildcard not allowed after '{}'", op)),
            };
        }
        let version = Version::parse(operand).map_err(|e| e.to_string())?;

        if wildcard && !matches!(op, "" | "==" | "=" | "!=") {
            return Err(format!("wildcard not allowed after '{}'", op));
        }

        let comparator = match op {
            "" | "==" | "=" if wildcard => Self::Prefix(version),
            "" if version.has_suffix() => Self::Equal(version),
            "" => Self::Prefix(version),
            "==" | "=" => Self::Equal(version),
            "!=" if wildcard => Self::NotPrefix(version),
            "!=" => Self::NotEqual(version),
            ">" => Self::Greater(version),
            ">=" => Self::GreaterEqual(version),
            "<" => Self::Less(version),
            "<=" => Self::LessEqual(version),
            "~=" => {
                let len = version.release().len();
                if len < 2 {
                    return Err("'~=' needs at least two release segments".to_string());
                }
                let upper = upper_bound(&version, len - 1)?;
                Self::Range(version, upper)
            }
            "~" => {
                let len = version.release().len();
                let upper = upper_bound(&version, if len >= 2 { 2 } else { 1 })?;
                Self::Range(version, upper)
            }
            "^" => {
                let release = version.release();
                let significant = release
                    .iter()
                    .position(|segment| *segment != 0)
                    .unwrap_or(release.len().saturating_sub(1));
                let upper = upper_bound(&version, significant + 1)?;
                Self::Range(version, upper)
            }
            other => return Err(format!("unknown operator '{}'", other)),
        };

        Ok(comparator)
    }

    fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::Equal(v) => version == v,
            Self::NotEqual(v) => version != v,
            Self::Prefix(v) => version.starts_with(v),
            Self::NotPrefix(v) => !version.starts_with(v),
            Self::Identical(text) => version.to_string() == *text,
            Self::Greater(v) => version > v,
            Self::GreaterEqual(v) => version >= v,
            Self::Less(v) => version < v,
            Self::LessEqual(v) => version <= v,
            Self::Range(low, high) => version >= low && version < high,
        }
    }
}

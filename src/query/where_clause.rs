//! Restricted WHERE-clause predicate
//!
//! Used by `delete_where`/`update_where`. The predicate structure is
//! parsed *before* parameters are bound, so a parameter value can
//! never introduce operators, field references, or new conditions.
//!
//! Grammar (keywords case-insensitive, `OR` intentionally
//! unsupported):
//!
//! ```text
//! predicate := condition ( AND condition )*
//! condition := field op literal_or_placeholder
//!            | field IS NULL
//!            | field IS NOT NULL
//! op        := = | != | < | <= | > | >= | LIKE | NOT LIKE
//! ```

use regex::{escape, Regex, RegexBuilder};

use crate::dimension::DimensionSet;
use crate::error::{Error, Result};
use crate::query::resolve_field;
use crate::types::{Document, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq)]
enum Rhs {
    Placeholder(usize),
    Literal(Value),
    None,
}

#[derive(Debug, Clone)]
struct Condition {
    field: String,
    op: CompareOp,
    rhs: Rhs,
}

/// A parsed, unbound predicate.
#[derive(Debug, Clone)]
pub struct WherePredicate {
    conditions: Vec<Condition>,
    placeholders: usize,
}

impl WherePredicate {
    pub fn parse(text: &str) -> Result<Self> {
        Parser::new(text)?.parse()
    }

    pub fn placeholder_count(&self) -> usize {
        self.placeholders
    }

    /// Bind parameter values to the placeholders. Trailing nulls are
    /// stripped to accommodate call-site safety defaults; after
    /// stripping, the count must match exactly.
    pub fn bind(&self, mut params: Vec<Value>) -> Result<BoundPredicate> {
        while params.len() > self.placeholders && params.last() == Some(&Value::Null) {
            params.pop();
        }
        if params.len() != self.placeholders {
            return Err(Error::parse(format!(
                "predicate has {} placeholders but {} parameters were bound",
                self.placeholders,
                params.len()
            )));
        }

        let mut bound = Vec::with_capacity(self.conditions.len());
        for condition in &self.conditions {
            let value = match &condition.rhs {
                Rhs::Placeholder(index) => Some(params[*index].clone()),
                Rhs::Literal(value) => Some(value.clone()),
                Rhs::None => None,
            };
            let pattern = match condition.op {
                CompareOp::Like | CompareOp::NotLike => {
                    let raw = value
                        .as_ref()
                        .map(Value::canonical_string)
                        .unwrap_or_default();
                    Some(like_regex(&raw)?)
                }
                _ => None,
            };
            bound.push(BoundCondition {
                field: condition.field.clone(),
                op: condition.op,
                value,
                pattern,
            });
        }
        Ok(BoundPredicate { conditions: bound })
    }
}

/// A predicate with parameters bound, ready to evaluate.
#[derive(Debug)]
pub struct BoundPredicate {
    conditions: Vec<BoundCondition>,
}

#[derive(Debug)]
struct BoundCondition {
    field: String,
    op: CompareOp,
    value: Option<Value>,
    pattern: Option<Regex>,
}

impl BoundPredicate {
    pub fn matches(&self, doc: &Document, dims: &DimensionSet) -> bool {
        self.conditions
            .iter()
            .all(|condition| condition.matches(doc, dims))
    }
}

impl BoundCondition {
    fn matches(&self, doc: &Document, dims: &DimensionSet) -> bool {
        // A missing field is NULL; an explicit null value too.
        let resolved = match resolve_field(doc, &self.field, dims) {
            Some(Value::Null) | None => None,
            other => other,
        };

        match self.op {
            CompareOp::IsNull => resolved.is_none(),
            CompareOp::IsNotNull => resolved.is_some(),
            CompareOp::Eq | CompareOp::Ne => {
                let rhs = self.value.as_ref().unwrap_or(&Value::Null);
                if matches!(rhs, Value::Null) {
                    return match self.op {
                        CompareOp::Eq => resolved.is_none(),
                        _ => resolved.is_some(),
                    };
                }
                let Some(lhs) = resolved else {
                    return false;
                };
                let equal = values_equal(&lhs, rhs);
                match self.op {
                    CompareOp::Eq => equal,
                    _ => !equal,
                }
            }
            CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
                let (Some(lhs), Some(rhs)) = (resolved, self.value.as_ref()) else {
                    return false;
                };
                if matches!(rhs, Value::Null) {
                    return false;
                }
                let ordering = compare(&lhs, rhs);
                match self.op {
                    CompareOp::Lt => ordering.is_lt(),
                    CompareOp::Le => ordering.is_le(),
                    CompareOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }
            }
            CompareOp::Like | CompareOp::NotLike => {
                let Some(lhs) = resolved else {
                    return false;
                };
                let Some(pattern) = &self.pattern else {
                    return false;
                };
                let matched = pattern.is_match(&lhs.canonical_string());
                match self.op {
                    CompareOp::Like => matched,
                    _ => !matched,
                }
            }
        }
    }
}

/// Canonical string equality; booleans compare case-insensitively.
fn values_equal(left: &Value, right: &Value) -> bool {
    let l = left.canonical_string();
    let r = right.canonical_string();
    if matches!(left, Value::Bool(_)) || matches!(right, Value::Bool(_)) {
        return l.eq_ignore_ascii_case(&r);
    }
    l == r
}

/// Numeric comparison when both sides parse; lexicographic fallback.
fn compare(left: &Value, right: &Value) -> std::cmp::Ordering {
    let l = left.canonical_string();
    let r = right.canonical_string();
    if let (Ok(lf), Ok(rf)) = (l.parse::<f64>(), r.parse::<f64>()) {
        return lf.partial_cmp(&rf).unwrap_or(std::cmp::Ordering::Equal);
    }
    l.cmp(&r)
}

/// Translate SQL wildcards to an anchored regex with every other
/// metacharacter escaped.
fn like_regex(pattern: &str) -> Result<Regex> {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&escape(&other.to_string())),
        }
    }
    out.push('$');
    RegexBuilder::new(&out)
        .case_insensitive(true)
        .build()
        .map_err(|e| Error::parse(format!("invalid LIKE pattern '{pattern}': {e}")))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(String),
    Placeholder,
    Op(CompareOp),
}

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
    placeholders: usize,
}

impl Parser {
    fn new(text: &str) -> Result<Self> {
        Ok(Self {
            tokens: lex(text)?,
            cursor: 0,
            placeholders: 0,
        })
    }

    fn parse(mut self) -> Result<WherePredicate> {
        let mut conditions = vec![self.condition()?];
        while let Some(token) = self.peek().cloned() {
            match token {
                Token::Ident(word) if word.eq_ignore_ascii_case("and") => {
                    self.advance();
                    conditions.push(self.condition()?);
                }
                Token::Ident(word) if word.eq_ignore_ascii_case("or") => {
                    return Err(Error::parse("OR is not supported in predicates"));
                }
                other => {
                    return Err(Error::parse(format!("unexpected token {other:?}")));
                }
            }
        }
        Ok(WherePredicate {
            conditions,
            placeholders: self.placeholders,
        })
    }

    fn condition(&mut self) -> Result<Condition> {
        let field = match self.next() {
            Some(Token::Ident(name)) if !is_keyword(&name) => name,
            other => return Err(Error::parse(format!("expected field name, got {other:?}"))),
        };

        match self.next() {
            Some(Token::Op(op)) => {
                let rhs = self.rhs()?;
                Ok(Condition { field, op, rhs })
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("like") => {
                let rhs = self.rhs()?;
                Ok(Condition {
                    field,
                    op: CompareOp::Like,
                    rhs,
                })
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("not") => {
                match self.next() {
                    Some(Token::Ident(word)) if word.eq_ignore_ascii_case("like") => {}
                    other => {
                        return Err(Error::parse(format!("expected LIKE after NOT, got {other:?}")))
                    }
                }
                let rhs = self.rhs()?;
                Ok(Condition {
                    field,
                    op: CompareOp::NotLike,
                    rhs,
                })
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("is") => {
                let negated = match self.peek().cloned() {
                    Some(Token::Ident(word)) if word.eq_ignore_ascii_case("not") => {
                        self.advance();
                        true
                    }
                    _ => false,
                };
                match self.next() {
                    Some(Token::Ident(word)) if word.eq_ignore_ascii_case("null") => {}
                    other => {
                        return Err(Error::parse(format!("expected NULL after IS, got {other:?}")))
                    }
                }
                Ok(Condition {
                    field,
                    op: if negated {
                        CompareOp::IsNotNull
                    } else {
                        CompareOp::IsNull
                    },
                    rhs: Rhs::None,
                })
            }
            other => Err(Error::parse(format!("expected operator, got {other:?}"))),
        }
    }

    fn rhs(&mut self) -> Result<Rhs> {
        match self.next() {
            Some(Token::Placeholder) => {
                let index = self.placeholders;
                self.placeholders += 1;
                Ok(Rhs::Placeholder(index))
            }
            Some(Token::Str(text)) => Ok(Rhs::Literal(Value::String(text))),
            Some(Token::Num(raw)) => {
                if let Ok(int) = raw.parse::<i64>() {
                    Ok(Rhs::Literal(Value::Int(int)))
                } else {
                    raw.parse::<f64>()
                        .map(|f| Rhs::Literal(Value::Float(f)))
                        .map_err(|_| Error::parse(format!("invalid number '{raw}'")))
                }
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("null") => {
                Ok(Rhs::Literal(Value::Null))
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("true") => {
                Ok(Rhs::Literal(Value::Bool(true)))
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("false") => {
                Ok(Rhs::Literal(Value::Bool(false)))
            }
            other => Err(Error::parse(format!("expected value, got {other:?}"))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).cloned();
        self.cursor += 1;
        token
    }

    fn advance(&mut self) {
        self.cursor += 1;
    }
}

fn is_keyword(word: &str) -> bool {
    ["and", "or", "is", "not", "null", "like"]
        .iter()
        .any(|k| word.eq_ignore_ascii_case(k))
}

fn lex(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '?' => {
                tokens.push(Token::Placeholder);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Ne));
                    i += 2;
                } else {
                    return Err(Error::parse("unknown operator '!'"));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CompareOp::Lt));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CompareOp::Gt));
                    i += 1;
                }
            }
            '\'' => {
                let mut out = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            out.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(c) => {
                            out.push(*c);
                            i += 1;
                        }
                        None => return Err(Error::parse("unterminated string literal")),
                    }
                }
                tokens.push(Token::Str(out));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Num(chars[start..i].iter().collect()));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(Error::parse(format!("unexpected character '{other}'"))),
        }
    }
    if tokens.is_empty() {
        return Err(Error::parse("empty predicate"));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::Dimension;
    use chrono::Utc;
    use uuid::Uuid;

    fn dims() -> DimensionSet {
        DimensionSet::new(vec![
            Dimension::enumerated("status", &["pending", "active", "done"]).with_default("pending"),
            Dimension::enumerated("priority", &["low", "medium", "high"]),
        ])
        .unwrap()
    }

    fn doc(entries: &[(&str, Value)]) -> Document {
        let mut doc = Document::new(Uuid::new_v4(), "t", Utc::now());
        for (key, value) in entries {
            doc.dimensions.insert(key.to_string(), value.clone());
        }
        doc
    }

    fn eval(pred: &str, params: Vec<Value>, doc: &Document) -> bool {
        WherePredicate::parse(pred)
            .unwrap()
            .bind(params)
            .unwrap()
            .matches(doc, &dims())
    }

    #[test]
    fn test_equality_with_placeholders() {
        let doc = doc(&[
            ("status", "active".into()),
            ("priority", "high".into()),
        ]);
        assert!(eval(
            "status = ? AND priority = ?",
            vec!["active".into(), "high".into()],
            &doc
        ));
        assert!(!eval("status = ?", vec!["done".into()], &doc));
    }

    #[test]
    fn test_injection_literal_does_not_match() {
        let doc = doc(&[("status", "active".into())]);
        // The whole parameter is a value, not predicate structure.
        assert!(!eval("status = ?", vec!["active' OR 1=1".into()], &doc));
    }

    #[test]
    fn test_placeholder_count_mismatch() {
        let predicate = WherePredicate::parse("status = ?").unwrap();
        assert!(predicate.bind(vec![]).is_err());
        assert!(predicate
            .bind(vec!["a".into(), "b".into()])
            .is_err());
        // Trailing nulls are stripped.
        assert!(predicate
            .bind(vec!["a".into(), Value::Null, Value::Null])
            .is_ok());
    }

    #[test]
    fn test_or_rejected() {
        assert!(matches!(
            WherePredicate::parse("status = ? OR priority = ?"),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        assert!(WherePredicate::parse("status ~ ?").is_err());
        assert!(WherePredicate::parse("status ! ?").is_err());
    }

    #[test]
    fn test_like_wildcards() {
        let doc = doc(&[("_data.note", "release 1.2 shipped".into())]);
        assert!(eval("_data.note LIKE ?", vec!["release%".into()], &doc));
        assert!(eval("_data.note LIKE ?", vec!["%1._%".into()], &doc));
        // Regex metacharacters in the pattern are literal.
        assert!(!eval("_data.note LIKE ?", vec!["release.*".into()], &doc));
        assert!(eval("_data.note NOT LIKE ?", vec!["draft%".into()], &doc));
    }

    #[test]
    fn test_numeric_and_lexicographic_comparison() {
        let doc1 = doc(&[("_data.count", Value::Int(12))]);
        assert!(eval("_data.count > ?", vec![Value::Int(9)], &doc1));
        assert!(eval("_data.count <= ?", vec![Value::Int(12)], &doc1));
        // "12" numerically beats "9" even though "12" < "9" as text.
        assert!(!eval("_data.count < ?", vec!["9".into()], &doc1));

        let doc2 = doc(&[("_data.tag", "beta".into())]);
        assert!(eval("_data.tag < ?", vec!["gamma".into()], &doc2));
    }

    #[test]
    fn test_null_handling() {
        let doc = doc(&[("priority", "high".into())]);
        assert!(eval("_data.owner IS NULL", vec![], &doc));
        assert!(eval("priority IS NOT NULL", vec![], &doc));
        assert!(eval("_data.owner = ?", vec![Value::Null], &doc));
        assert!(eval("priority != ?", vec![Value::Null], &doc));
        assert!(eval("_data.owner = null", vec![], &doc));
        // Ordered comparison against a missing field is false.
        assert!(!eval("_data.owner < ?", vec!["z".into()], &doc));
        // A dimension default counts as a value.
        assert!(eval("status IS NOT NULL", vec![], &doc));
    }

    #[test]
    fn test_boolean_case_insensitive_equality() {
        let doc = doc(&[("_data.flag", Value::Bool(true))]);
        assert!(eval("_data.flag = ?", vec!["TRUE".into()], &doc));
        assert!(eval("_data.flag = true", vec![], &doc));
    }

    #[test]
    fn test_literals_in_predicate() {
        let doc1 = doc(&[("_data.count", Value::Int(3))]);
        assert!(eval("_data.count = 3", vec![], &doc1));
        assert!(eval("_data.count < 3.5", vec![], &doc1));
        let doc2 = doc(&[("status", "done".into())]);
        assert!(eval("status = 'done'", vec![], &doc2));
        assert!(!eval("status = 'it''s'", vec![], &doc2));
    }
}

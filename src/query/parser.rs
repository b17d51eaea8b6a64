//! Expression grammar.
//!
//! ```text
//! expression  := [index ':'] item (',' item)*
//! item        := '*' | field ['+' | '-'] | condition | '@[' agg (',' agg)* ']'
//! condition   := conjunct ('|' conjunct)*
//! conjunct    := leaf ('&' leaf)*
//! leaf        := field op value | field ('=' | '!=') '[' value (',' value)* ']'
//! op          := '=' | '!=' | '>' | '>=' | '<' | '<=' | '^' | '!^' | '$' | '!$' | '~' | '!~'
//!              | '%' | '!%'
//! agg         := ('count' | 'sum' | 'avg' | 'min' | 'max') [':' (field | '*')]
//! ```

use crate::query::ast::{
    AggOp, AggregateDescriptor, CondOp, CondValue, Condition, Expression, SortDirection, SortSpec,
};
use crate::query::errors::ParseError;
use crate::types::HKEY_SEPARATOR;

/// Turns one raw expression into an [`Expression`].
pub trait ExpressionParser {
    /// Parses `raw`. Without a `context` the expression must start with an
    /// `index:` prefix; with one, the whole text is bound to that index.
    fn parse(&self, raw: &str, context: Option<&str>) -> Result<Expression, ParseError>;
}

/// Default parser for the compact query language.
#[derive(Clone, Copy, Debug, Default)]
pub struct DslParser;

const OPERATORS: [(&str, CondOp); 14] = [
    (">=", CondOp::Ge),
    ("<=", CondOp::Le),
    ("!=", CondOp::Ne),
    ("!^", CondOp::NotStartsWith),
    ("!$", CondOp::NotEndsWith),
    ("!~", CondOp::NotContains),
    ("!%", CondOp::NotIn),
    ("=", CondOp::Eq),
    (">", CondOp::Gt),
    ("<", CondOp::Lt),
    ("^", CondOp::StartsWith),
    ("$", CondOp::EndsWith),
    ("~", CondOp::Contains),
    ("%", CondOp::In),
];

const OPERATOR_CHARS: &[char] = &['=', '!', '>', '<', '^', '$', '~', '%'];

impl ExpressionParser for DslParser {
    fn parse(&self, raw: &str, context: Option<&str>) -> Result<Expression, ParseError> {
        let (index, body, offset) = match context {
            Some(index) => (index, raw, 0),
            None => match raw.split_once(HKEY_SEPARATOR) {
                Some((index, body)) if !index.is_empty() => (index, body, index.len() + 1),
                _ => return Err(ParseError::new(raw, 0, "missing index prefix")),
            },
        };

        let mut expr = Expression::new(index);
        let mut cursor = Cursor { raw, expr: &mut expr };
        for (start, item) in split_top_level(body, ',') {
            let trimmed = item.trim();
            let pos = offset + start + (item.len() - item.trim_start().len());
            if trimmed.is_empty() {
                return Err(ParseError::new(raw, pos, "empty item"));
            }
            cursor.item(trimmed, pos)?;
        }
        Ok(expr)
    }
}

struct Cursor<'a> {
    raw: &'a str,
    expr: &'a mut Expression,
}

impl Cursor<'_> {
    fn err(&self, pos: usize, reason: impl Into<String>) -> ParseError {
        ParseError::new(self.raw, pos, reason)
    }

    fn push_field(&mut self, field: &str) {
        if !self.expr.fields.iter().any(|f| f == field) {
            self.expr.fields.push(field.to_owned());
        }
    }

    fn item(&mut self, item: &str, pos: usize) -> Result<(), ParseError> {
        if item == "*" {
            self.push_field("*");
            return Ok(());
        }
        if let Some(inner) = item.strip_prefix("@[") {
            let inner = inner
                .strip_suffix(']')
                .ok_or_else(|| self.err(pos, "unterminated aggregation block"))?;
            return self.aggregations(inner, pos + 2);
        }
        if item.contains(OPERATOR_CHARS) {
            let cond = self.condition(item, pos)?;
            self.expr.conditions.push(cond);
            return Ok(());
        }

        let (field, direction) = match item.as_bytes().last() {
            Some(b'+') => (&item[..item.len() - 1], Some(SortDirection::Asc)),
            Some(b'-') => (&item[..item.len() - 1], Some(SortDirection::Desc)),
            _ => (item, None),
        };
        self.check_field(field, pos)?;
        if let Some(direction) = direction {
            if self.expr.sort.is_some() {
                return Err(self.err(pos, "only one sort field is allowed"));
            }
            self.expr.sort = Some(SortSpec {
                field: field.to_owned(),
                direction,
            });
        }
        self.push_field(field);
        Ok(())
    }

    fn check_field(&self, field: &str, pos: usize) -> Result<(), ParseError> {
        if field.is_empty() {
            return Err(self.err(pos, "missing field name"));
        }
        if let Some(bad) = field
            .chars()
            .find(|c| c.is_whitespace() || matches!(c, ':' | '[' | ']' | ',' | '&' | '|' | '*'))
        {
            return Err(self.err(pos, format!("invalid character `{bad}` in field `{field}`")));
        }
        Ok(())
    }

    fn aggregations(&mut self, inner: &str, pos: usize) -> Result<(), ParseError> {
        for (start, part) in split_top_level(inner, ',') {
            let part = part.trim();
            let at = pos + start;
            let (name, field) = match part.split_once(':') {
                Some((name, field)) => (name.trim(), field.trim()),
                None => (part, ""),
            };
            let op = AggOp::from_name(name)
                .ok_or_else(|| self.err(at, format!("unknown aggregation `{name}`")))?;
            let field = match (op, field) {
                (AggOp::Count, "") | (AggOp::Count, "*") => "*",
                (_, "") => {
                    return Err(self.err(at, format!("`{name}` requires a field")));
                }
                (_, "*") => {
                    return Err(self.err(at, format!("`*` is only valid for count, not `{name}`")));
                }
                (_, field) => {
                    self.check_field(field, at)?;
                    field
                }
            };
            let descriptor = AggregateDescriptor::new(op, field);
            if !self.expr.aggregations.contains(&descriptor) {
                self.expr.aggregations.push(descriptor);
            }
        }
        Ok(())
    }

    fn condition(&mut self, item: &str, pos: usize) -> Result<Condition, ParseError> {
        let mut any = Vec::new();
        for (start, disjunct) in split_top_level(item, '|') {
            let mut all = Vec::new();
            for (inner, conjunct) in split_top_level(disjunct, '&') {
                all.push(self.leaf(conjunct.trim(), pos + start + inner)?);
            }
            any.push(if all.len() == 1 {
                all.remove(0)
            } else {
                Condition::All { conditions: all }
            });
        }
        Ok(if any.len() == 1 {
            any.remove(0)
        } else {
            Condition::Any { conditions: any }
        })
    }

    fn leaf(&mut self, text: &str, pos: usize) -> Result<Condition, ParseError> {
        let op_at = text
            .find(OPERATOR_CHARS)
            .ok_or_else(|| self.err(pos, format!("missing operator in `{text}`")))?;
        let field = text[..op_at].trim();
        self.check_field(field, pos)?;
        let rest = &text[op_at..];
        let (symbol, op) = OPERATORS
            .iter()
            .find(|(symbol, _)| rest.starts_with(symbol))
            .copied()
            .ok_or_else(|| self.err(pos + op_at, format!("unknown operator in `{text}`")))?;
        let value = rest[symbol.len()..].trim();
        if value.is_empty() {
            return Err(self.err(pos, format!("missing value for `{field}`")));
        }

        let (op, value) = match value.strip_prefix('[') {
            Some(list) => {
                let list = list
                    .strip_suffix(']')
                    .ok_or_else(|| self.err(pos, "unterminated value list"))?;
                let op = match op {
                    CondOp::Eq => CondOp::In,
                    CondOp::Ne => CondOp::NotIn,
                    other => {
                        return Err(self.err(
                            pos,
                            format!("value lists require `=` or `!=`, got `{other}`"),
                        ));
                    }
                };
                let values: Vec<String> = list
                    .split(',')
                    .map(|v| v.trim().to_owned())
                    .filter(|v| !v.is_empty())
                    .collect();
                if values.is_empty() {
                    return Err(self.err(pos, "empty value list"));
                }
                (op, CondValue::List(values))
            }
            None => (op, CondValue::Scalar(value.to_owned())),
        };

        self.push_field(field);
        Ok(Condition::Leaf {
            field: field.to_owned(),
            op,
            value,
        })
    }
}

/// Splits on `sep` outside square brackets, yielding byte offsets with each part.
fn split_top_level(input: &str, sep: char) -> Vec<(usize, &str)> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push((start, &input[start..i]));
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push((start, &input[start..]));
    parts
}

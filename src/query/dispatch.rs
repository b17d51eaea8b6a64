//! Binds raw expression strings to indexes.

use tracing::trace;

use crate::query::ast::Expression;
use crate::query::errors::ParseError;
use crate::query::parser::ExpressionParser;
use crate::store::Store;
use crate::types::HKEY_SEPARATOR;

/// Parses `exprs` in order. A fragment whose head names a known index switches
/// the current context to it; other fragments bind to the current context,
/// which starts at `root_index`.
pub fn dispatch<S, P>(
    store: &S,
    parser: &P,
    root_index: &str,
    exprs: &[&str],
) -> Result<Vec<Expression>, ParseError>
where
    S: Store + ?Sized,
    P: ExpressionParser + ?Sized,
{
    let mut current = root_index.to_owned();
    let mut parsed = Vec::with_capacity(exprs.len());
    for raw in exprs {
        let head = raw.split(HKEY_SEPARATOR).next().unwrap_or_default();
        let expr = if store.is_index(head) {
            current = head.to_owned();
            parser.parse(raw, None)?
        } else {
            parser.parse(raw, Some(&current))?
        };
        trace!(index = %expr.index, raw = %raw, "query.dispatch");
        parsed.push(expr);
    }
    Ok(parsed)
}

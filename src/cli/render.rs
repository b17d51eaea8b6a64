use std::cmp::Ordering;
use std::fmt::Write as _;

use crate::query::ast::{SortDirection, SortSpec};
use crate::query::value::{coerce_for, Scalar, FIELD_HKEY, FIELD_ID};
use crate::query::{FieldSelections, QueryTree, ResultTree};
use crate::store::Store;
use crate::types::HKey;

const INDENT: &str = "  ";

/// One key per line.
pub fn render_keys(keys: &[HKey]) -> String {
    let mut out = String::new();
    for key in keys {
        out.push_str(key.as_str());
        out.push('\n');
    }
    out
}

/// Renders `result` as an indented tree.
///
/// Index names and keys alternate by level. Each key line carries the
/// selected field values of its record. Sibling keys follow the index's sort
/// field, falling back to key order.
pub fn render_text<S: Store + ?Sized>(store: &S, result: &QueryTree) -> String {
    let renderer = TextRenderer {
        store,
        fields: &result.fields,
    };
    let mut out = String::new();
    if let ResultTree::Branch(children) = &result.tree {
        for (index, node) in children {
            renderer.index_level(&mut out, index, node, 0);
        }
    }
    out
}

struct TextRenderer<'a, S: Store + ?Sized> {
    store: &'a S,
    fields: &'a FieldSelections,
}

impl<S: Store + ?Sized> TextRenderer<'_, S> {
    fn index_level(&self, out: &mut String, index: &str, node: &ResultTree, depth: usize) {
        line(out, depth, index);
        match node {
            ResultTree::Branch(children) => {
                let mut ordered: Vec<&(String, ResultTree)> = children.iter().collect();
                if let Some(sort) = self.fields.get(index).and_then(|s| s.sort.as_ref()) {
                    ordered.sort_by(|a, b| self.compare(sort, &a.0, &b.0));
                }
                for (key, sub) in ordered {
                    line(out, depth + 1, &self.key_line(index, key));
                    if let ResultTree::Branch(nested) = sub {
                        for (child_index, child) in nested {
                            self.index_level(out, child_index, child, depth + 2);
                        }
                    }
                }
            }
            other => self.reduced(out, other, depth + 1),
        }
    }

    fn reduced(&self, out: &mut String, node: &ResultTree, depth: usize) {
        match node {
            ResultTree::Marked(keys) => {
                for key in keys {
                    line(out, depth, key.as_str());
                }
            }
            ResultTree::Aggregate(values) => {
                for value in values {
                    let rendered = value.value.as_deref().unwrap_or("null");
                    line(out, depth, &format!("{} = {rendered}", value.label));
                }
            }
            ResultTree::Group { field, buckets } => {
                for (value, sub) in buckets {
                    let rendered = value.as_deref().unwrap_or("null");
                    line(out, depth, &format!("{field} = {rendered}"));
                    self.reduced(out, sub, depth + 1);
                }
            }
            ResultTree::Branch(_) => {}
        }
    }

    fn key_line(&self, index: &str, key: &str) -> String {
        let mut text = key.to_owned();
        let Some(selection) = self.fields.get(index) else {
            return text;
        };
        let Some(hkey) = HKey::parse(key) else {
            return text;
        };
        let record = self.store.read(&hkey);
        for field in &selection.fields {
            match field.as_str() {
                FIELD_HKEY => {}
                FIELD_ID => {
                    let _ = write!(text, "  {FIELD_ID}={}", hkey.id());
                }
                "*" => {
                    for (name, value) in record.into_iter().flatten() {
                        let _ = write!(text, "  {name}={value}");
                    }
                }
                name => {
                    let value = record.and_then(|r| r.get(name)).map_or("null", String::as_str);
                    let _ = write!(text, "  {name}={value}");
                }
            }
        }
        text
    }

    fn compare(&self, sort: &SortSpec, a: &str, b: &str) -> Ordering {
        let va = self.sort_value(sort, a);
        let vb = self.sort_value(sort, b);
        let by_value = match (&va, &vb) {
            (Some(x), Some(y)) => {
                let ord = x.total_cmp(y);
                match sort.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_value.then_with(|| a.cmp(b))
    }

    fn sort_value(&self, sort: &SortSpec, key: &str) -> Option<Scalar> {
        let hkey = HKey::parse(key)?;
        let raw = match sort.field.as_str() {
            FIELD_ID => hkey.id().to_owned(),
            FIELD_HKEY => hkey.to_string(),
            field => self.store.read(&hkey)?.get(field)?.clone(),
        };
        Some(coerce_for(&sort.field, &raw))
    }
}

fn line(out: &mut String, depth: usize, text: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(text);
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryEngine;
    use crate::store::MemStore;

    fn store() -> MemStore {
        let mut store = MemStore::new();
        for (id, name, age) in [("u1", "ada", "36"), ("u2", "alan", "41"), ("u3", "grace", "85")] {
            store.insert(HKey::new("users", id), [("name", name), ("age", age)]);
        }
        store
    }

    #[test]
    fn shows_selected_fields_in_sort_order() {
        let store = store();
        let mut engine = QueryEngine::new(&store);
        let out = engine.query("users", &["name,age-"], false).unwrap();
        let text = render_text(&store, out.tree().unwrap());
        assert_eq!(
            text,
            "users\n  users:u3  name=grace  age=85\n  users:u2  name=alan  age=41\n  users:u1  name=ada  age=36\n"
        );
    }

    #[test]
    fn aggregates_render_as_label_lines() {
        let store = store();
        let mut engine = QueryEngine::new(&store);
        let out = engine.query("users", &["@[max:age,count]"], false).unwrap();
        let text = render_text(&store, out.tree().unwrap());
        assert_eq!(text, "users\n  users:max:age = 85\n  users:count = 3\n");
    }

    #[test]
    fn keys_one_per_line() {
        let keys = [HKey::new("users", "u1"), HKey::new("users", "u2")];
        assert_eq!(render_keys(&keys), "users:u1\nusers:u2\n");
    }
}

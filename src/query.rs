//! Field queries: select which struct fields, at which paths, are encoded.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Name used for "every element" of a slice, array or map.
pub const ALL_ELEMENTS: &str = "#";

/// A tree of field names. A node without children selects its whole subtree.
///
/// ```
/// use jsonvm::FieldQuery;
///
/// let q = FieldQuery::builder().fields([
///     FieldQuery::from("id"),
///     FieldQuery::named("user").fields(["name"]),
/// ]);
/// assert_eq!(q.fields.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldQuery {
    pub name: String,
    pub fields: Vec<FieldQuery>,
}

impl FieldQuery {
    pub fn builder() -> FieldQuery {
        FieldQuery::default()
    }

    pub fn named(name: impl Into<String>) -> FieldQuery {
        FieldQuery { name: name.into(), fields: Vec::new() }
    }

    pub fn fields<I, Q>(mut self, fields: I) -> FieldQuery
    where
        I: IntoIterator<Item = Q>,
        Q: Into<FieldQuery>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub(crate) fn compile(&self) -> Arc<QueryNode> {
        let mut children = HashMap::with_capacity(self.fields.len());
        for f in &self.fields {
            let node = f.compile();
            match children.entry(f.name.clone()) {
                Entry::Occupied(mut o) => {
                    let merged = merge(o.get(), &node);
                    o.insert(merged);
                }
                Entry::Vacant(v) => {
                    v.insert(node);
                }
            }
        }
        Arc::new(QueryNode::new(children))
    }
}

impl From<&str> for FieldQuery {
    fn from(name: &str) -> FieldQuery {
        FieldQuery::named(name)
    }
}

impl From<String> for FieldQuery {
    fn from(name: String) -> FieldQuery {
        FieldQuery::named(name)
    }
}

/// Compiled form of a [`FieldQuery`], indexed by field name.
#[derive(Debug)]
pub(crate) struct QueryNode {
    children: HashMap<String, Arc<QueryNode>>,
    fingerprint: Arc<str>,
}

/// Outcome of looking up one field in a query node.
#[derive(Debug, Clone)]
pub(crate) enum Selection {
    Skip,
    All,
    Sub(Arc<QueryNode>),
}

impl QueryNode {
    fn new(children: HashMap<String, Arc<QueryNode>>) -> QueryNode {
        let mut names: Vec<&String> = children.keys().collect();
        names.sort();
        let mut fingerprint = String::new();
        for (i, name) in names.into_iter().enumerate() {
            if i > 0 {
                fingerprint.push(',');
            }
            fingerprint.push_str(&name.replace('\\', "\\\\").replace(',', "\\,").replace('{', "\\{"));
            let child = &children[name];
            if !child.is_leaf() {
                fingerprint.push('{');
                fingerprint.push_str(&child.fingerprint);
                fingerprint.push('}');
            }
        }
        QueryNode { children, fingerprint: fingerprint.into() }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The fingerprint as a shared key; cloning it never allocates.
    pub fn fingerprint_key(&self) -> &Arc<str> {
        &self.fingerprint
    }

    pub fn select(&self, key: &str) -> Selection {
        match self.children.get(key) {
            None => Selection::Skip,
            Some(child) if child.is_leaf() => Selection::All,
            Some(child) => Selection::Sub(child.clone()),
        }
    }

    /// Query applied to the elements of a container found at this node.
    pub fn elements(self: &Arc<Self>) -> Option<Arc<QueryNode>> {
        match self.children.get(ALL_ELEMENTS) {
            Some(child) if child.is_leaf() => None,
            Some(child) => Some(child.clone()),
            None => Some(self.clone()),
        }
    }
}

fn merge(a: &Arc<QueryNode>, b: &Arc<QueryNode>) -> Arc<QueryNode> {
    if a.is_leaf() || b.is_leaf() {
        return Arc::new(QueryNode::new(HashMap::new()));
    }
    let mut children = a.children.clone();
    for (name, node) in &b.children {
        children
            .entry(name.clone())
            .and_modify(|existing| *existing = merge(existing, node))
            .or_insert_with(|| node.clone());
    }
    Arc::new(QueryNode::new(children))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Arc<QueryNode> {
        FieldQuery::builder()
            .fields([
                FieldQuery::from("id"),
                FieldQuery::named("user").fields(["name", "email"]),
            ])
            .compile()
    }

    #[test]
    fn select_by_name() {
        let q = sample();
        assert!(matches!(q.select("id"), Selection::All));
        assert!(matches!(q.select("missing"), Selection::Skip));
        match q.select("user") {
            Selection::Sub(sub) => {
                assert!(matches!(sub.select("name"), Selection::All));
                assert!(matches!(sub.select("id"), Selection::Skip));
            }
            other => panic!("expected sub-query, got {other:?}"),
        }
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = FieldQuery::builder().fields(["b", "a"]).compile();
        let b = FieldQuery::builder().fields(["a", "b"]).compile();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(sample().fingerprint(), "id,user{email,name}");
    }

    #[test]
    fn elements_use_hash_child_or_pass_through() {
        let q = FieldQuery::builder()
            .fields([FieldQuery::named(ALL_ELEMENTS).fields(["x"])])
            .compile();
        let elems = q.elements().unwrap();
        assert!(matches!(elems.select("x"), Selection::All));

        let plain = FieldQuery::builder().fields(["x"]).compile();
        assert_eq!(plain.elements().unwrap().fingerprint(), "x");
    }

    #[test]
    fn duplicate_names_merge() {
        let q = FieldQuery::builder()
            .fields([
                FieldQuery::named("u").fields(["a"]),
                FieldQuery::named("u").fields(["b"]),
            ])
            .compile();
        assert_eq!(q.fingerprint(), "u{a,b}");
    }
}

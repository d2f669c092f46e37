//! Process-wide program cache.
//!
//! The primary index is a concurrent map keyed by `TypeId`. Callers that
//! know their type universe up front can also register it, which builds a
//! dense table indexed by descriptor address and checked against `TypeId`;
//! anything the table cannot hold falls through to the map.

use std::any::TypeId;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as Slot;
use log::debug;
use once_cell::sync::{Lazy, OnceCell};

use super::compiler::compile;
use super::opcode::{Link, Program};
use crate::error::EncodeError;
use crate::query::QueryNode;
use crate::types::{Kind, TypeDesc};

/// Widest descriptor address range the dense table will cover.
const MAX_SPAN: usize = 2 << 20;

#[derive(Clone, Copy)]
pub(crate) enum Entry {
    Ready(&'static Program),
    Unsupported(&'static str),
}

impl Entry {
    fn result(self) -> Result<&'static Program, EncodeError> {
        match self {
            Entry::Ready(p) => Ok(p),
            Entry::Unsupported(type_name) => Err(EncodeError::UnsupportedType { type_name }),
        }
    }
}

static PROGRAMS: Lazy<DashMap<TypeId, Entry>> = Lazy::new(DashMap::new);
static QUERY_PROGRAMS: Lazy<DashMap<(TypeId, Arc<str>), Entry>> = Lazy::new(DashMap::new);
static DENSE: OnceCell<Dense> = OnceCell::new();

/// Returns the program for `desc`, compiling and installing it on a miss.
pub(crate) fn program(desc: &'static TypeDesc, query: Option<&Arc<QueryNode>>) -> Result<&'static Program, EncodeError> {
    if let Some(q) = query {
        let key = (desc.type_id(), q.fingerprint_key().clone());
        if let Some(e) = QUERY_PROGRAMS.get(&key) {
            return e.result();
        }
        return install(&QUERY_PROGRAMS, key, desc, compile(desc, Some(q)))?.result();
    }

    let id = desc.type_id();
    if let Some(e) = DENSE.get().and_then(|d| d.get(desc, id)) {
        return e.result();
    }
    if let Some(e) = PROGRAMS.get(&id) {
        let e = *e;
        if let Some(d) = DENSE.get() {
            d.set(desc, id, e);
        }
        return e.result();
    }
    let entry = install(&PROGRAMS, id, desc, compile(desc, None))?;
    if let Some(d) = DENSE.get() {
        d.set(desc, id, entry);
    }
    entry.result()
}

/// Resolves a recursive back-edge, filling its link on first use.
pub(crate) fn link_target(link: &Link) -> Result<&'static Program, EncodeError> {
    if let Some(p) = link.target.get() {
        return Ok(p);
    }
    let p = program(link.ty, link.query.as_ref())?;
    Ok(*link.target.get_or_init(|| p))
}

/// First installer wins; later callers get the installed entry and drop
/// their own program.
fn install<K: Eq + Hash>(
    map: &DashMap<K, Entry>,
    key: K,
    desc: &'static TypeDesc,
    compiled: Result<Program, EncodeError>,
) -> Result<Entry, EncodeError> {
    let entry = match compiled {
        Ok(program) => match map.entry(key) {
            Slot::Occupied(o) => *o.get(),
            Slot::Vacant(v) => {
                let program: &'static Program = Box::leak(Box::new(program));
                debug!("installed program for {} ({} ops)", desc.type_name(), program.ops.len());
                *v.insert(Entry::Ready(program))
            }
        },
        Err(EncodeError::UnsupportedType { type_name }) => {
            debug!("caching unsupported type {type_name} (via {})", desc.type_name());
            *map.entry(key).or_insert(Entry::Unsupported(type_name))
        }
        Err(e) => return Err(e),
    };
    Ok(entry)
}

// ── Dense table ──────────────────────────────────────────────────────

struct Dense {
    base: usize,
    shift: u32,
    buckets: Box<[OnceCell<(TypeId, Entry)>]>,
}

impl Dense {
    fn index(&self, desc: &TypeDesc) -> Option<usize> {
        let addr = desc as *const TypeDesc as usize;
        let i = addr.checked_sub(self.base)? >> self.shift;
        (i < self.buckets.len()).then_some(i)
    }

    fn get(&self, desc: &TypeDesc, id: TypeId) -> Option<Entry> {
        let (owner, entry) = self.buckets[self.index(desc)?].get()?;
        (*owner == id).then_some(*entry)
    }

    fn set(&self, desc: &TypeDesc, id: TypeId, entry: Entry) {
        if let Some(i) = self.index(desc) {
            // A bucket claimed by another type leaves this one on the map.
            let _ = self.buckets[i].set((id, entry));
        }
    }
}

/// Builds the dense table from every descriptor reachable from `roots`.
///
/// Returns false when the descriptors span more than 2 MiB or a table was
/// already registered; lookups then keep using the map alone.
pub fn register_types(roots: &[&'static TypeDesc]) -> bool {
    if DENSE.get().is_some() {
        return false;
    }
    let addr = |d: &&'static TypeDesc| *d as *const TypeDesc as usize;
    let mut seen = HashSet::new();
    let mut stack: Vec<&'static TypeDesc> = roots.to_vec();
    let mut all = Vec::new();
    while let Some(d) = stack.pop() {
        if !seen.insert(addr(&d)) {
            continue;
        }
        all.push(d);
        match d.kind {
            Kind::Slice(seq) => stack.push((seq.elem)()),
            Kind::Array { elem, .. } => stack.push(elem()),
            Kind::Map(m) => {
                stack.push((m.key)());
                stack.push((m.value)());
            }
            Kind::Ptr(p) => stack.push((p.elem)()),
            Kind::Struct(fields) => stack.extend(fields.iter().map(|f| (f.desc)())),
            _ => {}
        }
    }

    let (Some(min), Some(max)) = (all.iter().map(addr).min(), all.iter().map(addr).max()) else {
        return false;
    };
    let span = max - min;
    if span > MAX_SPAN {
        debug!("descriptor span {span} bytes exceeds dense limit, using map only");
        return false;
    }
    let shift = align_of::<TypeDesc>().trailing_zeros();
    let len = (span >> shift) + 1;
    let dense = Dense {
        base: min,
        shift,
        buckets: (0..len).map(|_| OnceCell::new()).collect(),
    };
    let installed = DENSE.set(dense).is_ok();
    debug!("dense program cache: {} types, {span} byte span, {len} buckets", all.len());
    installed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::FieldQuery;
    use crate::types::Describe;

    struct Pair {
        left: u16,
        right: String,
    }
    crate::describe_struct!(Pair { left: u16, right: String });

    #[test]
    fn programs_are_shared() {
        let a = program(Pair::DESC, None).unwrap();
        let b = program(Pair::DESC, None).unwrap();
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn unsupported_types_are_remembered() {
        let desc = <std::sync::mpsc::Receiver<u8>>::DESC;
        for _ in 0..2 {
            let err = program(desc, None).unwrap_err();
            assert!(matches!(err, EncodeError::UnsupportedType { .. }));
        }
        assert!(matches!(PROGRAMS.get(&desc.type_id()).map(|e| *e), Some(Entry::Unsupported(_))));
    }

    #[test]
    fn query_programs_are_keyed_by_fingerprint() {
        let only_left = FieldQuery::builder().fields(["left"]).compile();
        let only_right = FieldQuery::builder().fields(["right"]).compile();
        let a = program(Pair::DESC, Some(&only_left)).unwrap();
        let b = program(Pair::DESC, Some(&only_right)).unwrap();
        let again = program(Pair::DESC, Some(&FieldQuery::builder().fields(["left"]).compile())).unwrap();
        assert!(!std::ptr::eq(a, b));
        assert!(std::ptr::eq(a, again));
        assert!(!std::ptr::eq(a, program(Pair::DESC, None).unwrap()));
    }

    struct Envelope {
        body: crate::Dyn,
    }
    crate::describe_struct!(Envelope { body: crate::Dyn });

    #[test]
    fn repeated_query_lookups_share_the_fingerprint() {
        let q = FieldQuery::builder()
            .fields([FieldQuery::named("body").fields(["right"])])
            .compile();
        let first = program(Envelope::DESC, Some(&q)).unwrap();
        let held = Arc::strong_count(q.fingerprint_key());
        for _ in 0..8 {
            assert!(std::ptr::eq(first, program(Envelope::DESC, Some(&q)).unwrap()));
        }
        assert_eq!(Arc::strong_count(q.fingerprint_key()), held);

        let opts = crate::EncodeOptions::new().field_query(FieldQuery::builder().fields([
            FieldQuery::named("body").fields(["right"]),
        ]));
        for _ in 0..3 {
            let v = Envelope { body: crate::Dyn::new(Pair { left: 1, right: "r".into() }) };
            assert_eq!(crate::marshal_with_options(&v, &opts).unwrap(), br#"{"body":{"right":"r"}}"#);
        }
        let sub = match q.select("body") {
            crate::query::Selection::Sub(sub) => sub,
            other => panic!("expected sub-query, got {other:?}"),
        };
        let inner = program(Pair::DESC, Some(&sub)).unwrap();
        assert!(std::ptr::eq(inner, program(Pair::DESC, Some(&sub)).unwrap()));
    }

    #[test]
    fn dense_table_agrees_with_map() {
        let roots = [Pair::DESC, <Vec<Pair>>::DESC];
        let registered = register_types(&roots);
        let a = program(<Vec<Pair>>::DESC, None).unwrap();
        let b = program(<Vec<Pair>>::DESC, None).unwrap();
        assert!(std::ptr::eq(a, b));
        if registered {
            assert!(!register_types(&roots));
        }
    }
}

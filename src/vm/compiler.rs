//! Type descriptor → opcode program.
//!
//! Every `value` call appends the ops for one value whose address lives in
//! a given slot; control leaves the fragment by falling through to the op
//! emitted right after it, so fragments compose by concatenation.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::debug;
use once_cell::sync::OnceCell;

use super::opcode::{EmptyCheck, FieldKey, FieldOp, Leaf, Link, MAP_KEY, OMIT_EMPTY, Op, Opcode, Program, QUOTED};
use crate::encode::string::escape_into;
use crate::error::EncodeError;
use crate::query::{QueryNode, Selection};
use crate::types::tag::FieldTag;
use crate::types::{Field, Kind, LoadFn, MapDesc, SeqDesc, TypeDesc, ViewFn};

type Query = Option<Arc<QueryNode>>;

pub(crate) fn compile(desc: &'static TypeDesc, query: Option<&Arc<QueryNode>>) -> Result<Program, EncodeError> {
    let mut c = Compiler {
        ops: Vec::new(),
        links: Vec::new(),
        slots: 1,
        stack: Vec::new(),
    };
    c.value(desc, 0, 0, query.cloned())?;
    c.push(Opcode::new(Op::End, desc, 0, 0));
    debug!(
        "compiled {} into {} ops ({} slots, {} recursion points)",
        desc.type_name(),
        c.ops.len(),
        c.slots,
        c.links.len()
    );
    Ok(Program {
        ops: c.ops,
        links: c.links,
        slot_count: c.slots,
        desc,
    })
}

struct Compiler {
    ops: Vec<Opcode>,
    links: Vec<Link>,
    slots: usize,
    /// Structs currently being compiled; a repeat is a back-edge.
    stack: Vec<TypeId>,
}

impl Compiler {
    fn alloc(&mut self) -> usize {
        let s = self.slots;
        self.slots += 1;
        s
    }

    fn push(&mut self, mut code: Opcode) -> usize {
        let i = self.ops.len();
        code.next = i + 1;
        code.next_field = i + 1;
        self.ops.push(code);
        i
    }

    fn value(&mut self, desc: &'static TypeDesc, slot: usize, depth: usize, q: Query) -> Result<(), EncodeError> {
        if let Some((leaf, view)) = leaf_of(desc) {
            let mut code = Opcode::new(Op::Leaf(leaf), desc, slot, depth);
            code.view = view;
            self.push(code);
            return Ok(());
        }
        match desc.kind {
            Kind::Slice(seq) => self.slice(desc, seq, slot, depth, q),
            Kind::Array { elem, len } => self.array(desc, elem(), len, slot, depth, q),
            Kind::Map(m) => self.map(desc, m, slot, depth, q),
            Kind::Struct(fields) => self.structure(desc, fields, slot, depth, q),
            Kind::Ptr(_) => self.pointer(desc, slot, depth, q),
            Kind::Interface => {
                let mut code = Opcode::new(Op::Interface, desc, slot, depth);
                code.query = q;
                self.push(code);
                Ok(())
            }
            Kind::MarshalJson(f) => {
                let mut code = Opcode::new(Op::MarshalJson, desc, slot, depth);
                code.marshal = Some(f);
                self.push(code);
                Ok(())
            }
            Kind::MarshalText(f) => {
                let mut code = Opcode::new(Op::MarshalText, desc, slot, depth);
                code.marshal = Some(f);
                self.push(code);
                Ok(())
            }
            _ => Err(EncodeError::UnsupportedType { type_name: desc.type_name() }),
        }
    }

    /// Compiles the pointee and folds the whole pointer chain into its head.
    fn pointer(&mut self, desc: &'static TypeDesc, slot: usize, depth: usize, q: Query) -> Result<(), EncodeError> {
        let (mut loads, target) = deref_chain(desc);
        let head = self.ops.len();
        self.value(target, slot, depth, q)?;
        let code = &mut self.ops[head];
        loads.extend(code.loads.iter().copied());
        code.loads = loads.into_boxed_slice();
        Ok(())
    }

    fn slice(
        &mut self,
        desc: &'static TypeDesc,
        seq: SeqDesc,
        slot: usize,
        depth: usize,
        q: Query,
    ) -> Result<(), EncodeError> {
        let elem = (seq.elem)();
        let mut head = Opcode::new(Op::SliceHead, desc, slot, depth);
        head.elem_idx = self.alloc();
        head.length = self.alloc();
        head.data = self.alloc();
        head.child = self.alloc();
        head.size = elem.size;
        head.view = Some(seq.view);
        let (elem_idx, length, data, child) = (head.elem_idx, head.length, head.data, head.child);
        let h = self.push(head);

        let body = self.ops.len();
        self.value(elem, child, depth + 1, elements(&q))?;

        let mut step = Opcode::new(Op::SliceElem, desc, slot, depth);
        step.elem_idx = elem_idx;
        step.length = length;
        step.data = data;
        step.child = child;
        step.size = elem.size;
        step.jmp = body;
        let e = self.push(step);
        self.ops[h].end = e;
        Ok(())
    }

    fn array(
        &mut self,
        desc: &'static TypeDesc,
        elem: &'static TypeDesc,
        len: usize,
        slot: usize,
        depth: usize,
        q: Query,
    ) -> Result<(), EncodeError> {
        let mut head = Opcode::new(Op::ArrayHead, desc, slot, depth);
        head.elem_idx = self.alloc();
        head.data = self.alloc();
        head.child = self.alloc();
        head.length = len;
        head.size = elem.size;
        let (elem_idx, data, child) = (head.elem_idx, head.data, head.child);
        let h = self.push(head);

        let body = self.ops.len();
        self.value(elem, child, depth + 1, elements(&q))?;

        let mut step = Opcode::new(Op::ArrayElem, desc, slot, depth);
        step.elem_idx = elem_idx;
        step.data = data;
        step.child = child;
        step.length = len;
        step.size = elem.size;
        step.jmp = body;
        let e = self.push(step);
        self.ops[h].end = e;
        Ok(())
    }

    fn map(&mut self, desc: &'static TypeDesc, m: MapDesc, slot: usize, depth: usize, q: Query) -> Result<(), EncodeError> {
        let key_slot = self.alloc();
        let value_slot = self.alloc();
        let mut head = Opcode::new(Op::MapHead, desc, slot, depth);
        head.child = key_slot;
        head.map = Some(m);
        let h = self.push(head);

        let body = self.ops.len();
        self.map_key(desc, (m.key)(), key_slot, depth + 1)?;

        let mut value = Opcode::new(Op::MapValue, desc, slot, depth);
        value.child = value_slot;
        self.push(value);
        self.value((m.value)(), value_slot, depth + 1, elements(&q))?;

        let mut key = Opcode::new(Op::MapKey, desc, slot, depth);
        key.child = key_slot;
        key.jmp = body;
        let k = self.push(key);
        let e = self.push(Opcode::new(Op::MapEnd, desc, slot, depth));
        self.ops[h].end = e;
        self.ops[k].end = e;
        Ok(())
    }

    fn map_key(
        &mut self,
        map: &'static TypeDesc,
        key: &'static TypeDesc,
        slot: usize,
        depth: usize,
    ) -> Result<(), EncodeError> {
        let mut code = match key.kind {
            Kind::String(view) => {
                let mut code = Opcode::new(Op::Leaf(Leaf::Str), key, slot, depth);
                code.view = Some(view);
                code
            }
            Kind::Int(w) => {
                let mut code = Opcode::new(Op::Leaf(Leaf::Int(w)), key, slot, depth);
                code.flags = QUOTED;
                code
            }
            Kind::Uint(w) => {
                let mut code = Opcode::new(Op::Leaf(Leaf::Uint(w)), key, slot, depth);
                code.flags = QUOTED;
                code
            }
            Kind::MarshalText(f) => {
                let mut code = Opcode::new(Op::MarshalText, key, slot, depth);
                code.marshal = Some(f);
                code
            }
            _ => return Err(EncodeError::UnsupportedType { type_name: map.type_name() }),
        };
        code.flags |= MAP_KEY;
        self.push(code);
        Ok(())
    }

    // ── Structs ──────────────────────────────────────────────────────

    fn structure(
        &mut self,
        desc: &'static TypeDesc,
        fields: &'static [Field],
        slot: usize,
        depth: usize,
        q: Query,
    ) -> Result<(), EncodeError> {
        let id = desc.type_id();
        if self.stack.contains(&id) {
            let link = self.links.len();
            self.links.push(Link { ty: desc, query: q, target: OnceCell::new() });
            let mut code = Opcode::new(Op::Recursive, desc, slot, depth);
            code.jmp = link;
            self.push(code);
            return Ok(());
        }

        let mut next_id = 0;
        let mut embedding = vec![id];
        let members = collect(fields, 0, &mut embedding, &mut next_id);
        let keep = dominant(&members);
        let members = prune(members, &keep, q.as_ref());
        if members.is_empty() {
            self.push(Opcode::new(Op::EmptyStruct, desc, slot, depth));
            return Ok(());
        }

        self.stack.push(id);
        let result = self.struct_body(desc, &members, slot, depth);
        self.stack.pop();
        result
    }

    fn struct_body(
        &mut self,
        desc: &'static TypeDesc,
        members: &[Member],
        slot: usize,
        depth: usize,
    ) -> Result<(), EncodeError> {
        let start = self.alloc();
        let last = members.len() - 1;

        let (head, rest) = match &members[0] {
            Member::Field(f) => (self.field(Op::StructHead, f, slot, depth)?, 1),
            Member::Group(_) => (self.push(Opcode::new(Op::StructHead(FieldOp::None), desc, slot, depth)), 0),
        };
        self.ops[head].elem_idx = start;

        let mut fused_end = None;
        for (i, m) in members.iter().enumerate().skip(rest) {
            match m {
                Member::Field(f) if i == last && leaf_of(deref_chain(f.desc).1).is_some() => {
                    fused_end = Some(self.field(Op::StructEnd, f, slot, depth)?);
                }
                Member::Field(f) => {
                    self.field(Op::StructField, f, slot, depth)?;
                }
                Member::Group(g) => self.group(g, slot, depth)?,
            }
        }
        let end = match fused_end {
            Some(e) => e,
            None => self.push(Opcode::new(Op::StructEnd(FieldOp::None), desc, slot, depth)),
        };
        self.ops[end].elem_idx = start;
        self.ops[head].end = end;
        Ok(())
    }

    /// Emits one field op of the given family; primitive fields are fused.
    fn field(&mut self, family: fn(FieldOp) -> Op, f: &Planned, slot: usize, depth: usize) -> Result<usize, EncodeError> {
        let (leaf_loads, target) = deref_chain(f.desc);
        let mut flags = 0;
        if f.tag.omit_empty {
            flags |= OMIT_EMPTY;
        }
        match leaf_of(target) {
            Some((leaf, view)) => {
                if f.tag.quoted && leaf != Leaf::Bytes {
                    flags |= QUOTED;
                }
                let mut code = Opcode::new(family(FieldOp::Leaf(leaf)), target, slot, depth);
                code.offset = f.field.offset;
                code.key = Some(Box::new(field_key(f.key)));
                code.flags = flags;
                code.leaf_loads = leaf_loads.into_boxed_slice();
                code.view = view;
                code.empty = empty_check(f.desc);
                Ok(self.push(code))
            }
            None => {
                let child = self.alloc();
                let mut code = Opcode::new(family(FieldOp::Value), f.desc, slot, depth);
                code.offset = f.field.offset;
                code.key = Some(Box::new(field_key(f.key)));
                code.flags = flags;
                code.child = child;
                code.empty = empty_check(f.desc);
                let i = self.push(code);
                self.value(f.desc, child, depth + 1, f.query.clone())?;
                self.ops[i].next_field = self.ops.len();
                Ok(i)
            }
        }
    }

    /// Inlines an embedded struct: no braces, fields share the outer object.
    fn group(&mut self, g: &Group, parent: usize, depth: usize) -> Result<(), EncodeError> {
        let base = self.alloc();
        let mut head = Opcode::new(Op::StructAnonymousHead, g.desc, parent, depth);
        head.child = base;
        head.offset = g.field.offset;
        head.loads = g.loads.clone().into_boxed_slice();
        let h = self.push(head);
        for m in &g.members {
            match m {
                Member::Field(f) => {
                    self.field(Op::StructField, f, base, depth)?;
                }
                Member::Group(inner) => self.group(inner, base, depth)?,
            }
        }
        let e = self.push(Opcode::new(Op::StructAnonymousEnd, g.desc, base, depth));
        self.ops[h].end = e;
        Ok(())
    }
}

fn elements(q: &Query) -> Query {
    q.as_ref().and_then(|n| n.elements())
}

fn leaf_of(desc: &TypeDesc) -> Option<(Leaf, Option<ViewFn>)> {
    Some(match desc.kind {
        Kind::Int(w) => (Leaf::Int(w), None),
        Kind::Uint(w) => (Leaf::Uint(w), None),
        Kind::F32 => (Leaf::F32, None),
        Kind::F64 => (Leaf::F64, None),
        Kind::Bool => (Leaf::Bool, None),
        Kind::String(view) => (Leaf::Str, Some(view)),
        Kind::Number => (Leaf::Number, None),
        Kind::Slice(seq) if desc.is_bytes() => (Leaf::Bytes, Some(seq.view)),
        _ => return None,
    })
}

/// Collapses `Option<Box<T>>`-style chains into their loads and `T`.
fn deref_chain(desc: &'static TypeDesc) -> (Vec<LoadFn>, &'static TypeDesc) {
    let mut loads = Vec::new();
    let mut cur = desc;
    while let Kind::Ptr(p) = cur.kind {
        loads.push(p.load);
        cur = (p.elem)();
    }
    (loads, cur)
}

fn empty_check(desc: &TypeDesc) -> EmptyCheck {
    match desc.kind {
        Kind::Int(w) | Kind::Uint(w) => EmptyCheck::Int(w),
        Kind::F32 => EmptyCheck::F32,
        Kind::F64 => EmptyCheck::F64,
        Kind::Bool => EmptyCheck::Bool,
        Kind::String(view) => EmptyCheck::View(view),
        Kind::Slice(seq) => EmptyCheck::View(seq.view),
        Kind::Number => EmptyCheck::Number,
        Kind::Array { len, .. } => EmptyCheck::Array(len),
        Kind::Map(m) => EmptyCheck::Map(m.len),
        Kind::Ptr(p) => EmptyCheck::Ptr(p.load),
        Kind::Interface => EmptyCheck::Interface,
        Kind::Struct(_) | Kind::MarshalJson(_) | Kind::MarshalText(_) | Kind::Unsupported => EmptyCheck::Never,
    }
}

fn field_key(name: &str) -> FieldKey {
    let mut escaped = Vec::with_capacity(name.len() + 3);
    escaped.push(b'"');
    escape_into::<true>(&mut escaped, name, false);
    escaped.extend_from_slice(b"\":");
    let mut plain = Vec::with_capacity(name.len() + 3);
    plain.push(b'"');
    escape_into::<false>(&mut plain, name, false);
    plain.extend_from_slice(b"\":");
    FieldKey {
        name: name.into(),
        escaped: escaped.into_boxed_slice(),
        plain: plain.into_boxed_slice(),
    }
}

// ── Field resolution ─────────────────────────────────────────────────

enum Member {
    Field(Planned),
    Group(Group),
}

struct Planned {
    field: &'static Field,
    desc: &'static TypeDesc,
    key: &'static str,
    tag: FieldTag,
    /// Embedding depth: 0 for the struct's own fields.
    level: usize,
    id: usize,
    query: Query,
}

struct Group {
    field: &'static Field,
    desc: &'static TypeDesc,
    loads: Vec<LoadFn>,
    members: Vec<Member>,
}

fn collect(fields: &'static [Field], level: usize, embedding: &mut Vec<TypeId>, next_id: &mut usize) -> Vec<Member> {
    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        let tag = FieldTag::parse(field.tag);
        if tag.ignore {
            continue;
        }
        let desc = (field.desc)();
        if tag.embed && !tag.is_named() {
            let (loads, target) = deref_chain(desc);
            if let Kind::Struct(inner) = target.kind {
                let id = target.type_id();
                if embedding.contains(&id) {
                    continue;
                }
                embedding.push(id);
                let members = collect(inner, level + 1, embedding, next_id);
                embedding.pop();
                out.push(Member::Group(Group { field, desc: target, loads, members }));
                continue;
            }
        }
        let id = *next_id;
        *next_id += 1;
        out.push(Member::Field(Planned {
            field,
            desc,
            key: tag.key.unwrap_or(field.name),
            tag,
            level,
            id,
            query: None,
        }));
    }
    out
}

fn flatten<'m>(members: &'m [Member], out: &mut Vec<&'m Planned>) {
    for m in members {
        match m {
            Member::Field(f) => out.push(f),
            Member::Group(g) => flatten(&g.members, out),
        }
    }
}

/// Picks, per key, the field that survives: the shallowest one, or among
/// equally shallow ones the only tagged one. Ties drop every candidate.
fn dominant(members: &[Member]) -> HashSet<usize> {
    let mut all = Vec::new();
    flatten(members, &mut all);
    let mut by_key: HashMap<&str, Vec<&Planned>> = HashMap::new();
    for f in all {
        by_key.entry(f.key).or_default().push(f);
    }
    let mut keep = HashSet::new();
    for candidates in by_key.values() {
        let Some(min) = candidates.iter().map(|f| f.level).min() else {
            continue;
        };
        let top: Vec<&&Planned> = candidates.iter().filter(|f| f.level == min).collect();
        if let [only] = top.as_slice() {
            keep.insert(only.id);
            continue;
        }
        let tagged: Vec<&&&Planned> = top.iter().filter(|f| f.tag.is_named()).collect();
        if let [only] = tagged.as_slice() {
            keep.insert(only.id);
        }
    }
    keep
}

fn prune(members: Vec<Member>, keep: &HashSet<usize>, q: Option<&Arc<QueryNode>>) -> Vec<Member> {
    members
        .into_iter()
        .filter_map(|m| match m {
            Member::Field(mut f) => {
                if !keep.contains(&f.id) {
                    return None;
                }
                if let Some(node) = q {
                    match node.select(f.key) {
                        Selection::Skip => return None,
                        Selection::All => f.query = None,
                        Selection::Sub(sub) => f.query = Some(sub),
                    }
                }
                Some(Member::Field(f))
            }
            Member::Group(mut g) => {
                g.members = prune(g.members, keep, q);
                (!g.members.is_empty()).then_some(Member::Group(g))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::FieldQuery;
    use crate::types::Describe;

    struct Point {
        x: i64,
        y: i64,
    }
    crate::describe_struct!(Point { x: i64 = "x", y: i64 = "y" });

    struct Tree {
        name: String,
        children: Vec<Tree>,
    }
    crate::describe_struct!(Tree { name: String, children: Vec<Tree> });

    struct Nothing {}
    crate::describe_struct!(Nothing {});

    struct Base {
        id: i32,
        name: String,
    }
    crate::describe_struct!(Base { id: i32 = "id", name: String });

    struct Derived {
        base: Base,
        name: String,
    }
    crate::describe_struct!(Derived { base: Base = ",embed", name: String });

    fn ops<T: Describe>() -> Vec<Op> {
        compile(T::DESC, None).unwrap().ops.iter().map(|c| c.op).collect()
    }

    #[test]
    fn head_and_end_fuse_primitive_fields() {
        assert_eq!(
            ops::<Point>(),
            vec![
                Op::StructHead(FieldOp::Leaf(Leaf::Int(crate::types::Width::W64))),
                Op::StructEnd(FieldOp::Leaf(Leaf::Int(crate::types::Width::W64))),
                Op::End,
            ]
        );
    }

    #[test]
    fn primitive_compiles_to_one_leaf() {
        assert_eq!(ops::<bool>(), vec![Op::Leaf(Leaf::Bool), Op::End]);
        assert_eq!(ops::<Vec<u8>>(), vec![Op::Leaf(Leaf::Bytes), Op::End]);
    }

    #[test]
    fn pointer_chains_collapse_into_head() {
        let p = compile(<Option<Box<Option<i32>>>>::DESC, None).unwrap();
        assert_eq!(p.ops.len(), 2);
        assert_eq!(p.ops[0].ptr_num(), 3);
    }

    #[test]
    fn slice_skeleton_links_back() {
        let p = compile(<Vec<String>>::DESC, None).unwrap();
        let names: Vec<Op> = p.ops.iter().map(|c| c.op).collect();
        assert_eq!(names, vec![Op::SliceHead, Op::Leaf(Leaf::Str), Op::SliceElem, Op::End]);
        assert_eq!(p.ops[0].end, 2);
        assert_eq!(p.ops[2].jmp, 1);
    }

    #[test]
    fn map_skeleton() {
        let p = compile(<std::collections::BTreeMap<i32, bool>>::DESC, None).unwrap();
        let names: Vec<Op> = p.ops.iter().map(|c| c.op).collect();
        assert_eq!(
            names,
            vec![
                Op::MapHead,
                Op::Leaf(Leaf::Int(crate::types::Width::W32)),
                Op::MapValue,
                Op::Leaf(Leaf::Bool),
                Op::MapKey,
                Op::MapEnd,
                Op::End,
            ]
        );
        assert!(p.ops[1].has(QUOTED) && p.ops[1].has(MAP_KEY));
        assert_eq!(p.ops[4].jmp, 1);
    }

    #[test]
    fn byte_slice_map_keys_are_unsupported() {
        let err = compile(<std::collections::BTreeMap<Vec<u8>, i32>>::DESC, None).unwrap_err();
        assert!(matches!(err, EncodeError::UnsupportedType { .. }));
    }

    #[test]
    fn recursive_struct_gets_back_edge() {
        let p = compile(Tree::DESC, None).unwrap();
        assert_eq!(p.recursion_points(), 1);
        assert!(p.ops.iter().any(|c| c.op == Op::Recursive));
    }

    #[test]
    fn empty_struct_is_constant() {
        assert_eq!(ops::<Nothing>(), vec![Op::EmptyStruct, Op::End]);
    }

    #[test]
    fn embedded_fields_resolve_by_depth() {
        let p = compile(Derived::DESC, None).unwrap();
        let keys: Vec<&str> = p.ops.iter().filter_map(|c| c.key_name()).collect();
        // Derived.name shadows Base.name.
        assert_eq!(keys, vec!["id", "name"]);
        assert!(p.ops.iter().any(|c| c.op == Op::StructAnonymousHead));
    }

    #[test]
    fn query_filters_fields() {
        let q = FieldQuery::builder().fields(["y"]).compile();
        let p = compile(Point::DESC, Some(&q)).unwrap();
        let keys: Vec<&str> = p.ops.iter().filter_map(|c| c.key_name()).collect();
        assert_eq!(keys, vec!["y"]);
    }

    #[test]
    fn unsupported_type_fails() {
        let err = compile(<std::sync::mpsc::Sender<i32>>::DESC, None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnsupportedType);
    }

    #[test]
    fn dump_lists_every_op() {
        let p = compile(Point::DESC, None).unwrap();
        let dump = p.to_string();
        assert!(dump.contains("STRUCT_HEAD_INT64 \"x\""));
        assert!(dump.contains("STRUCT_END_INT64 \"y\""));
        assert_eq!(dump.lines().count(), 1 + p.ops.len());
    }
}

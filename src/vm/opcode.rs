use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::query::QueryNode;
use crate::types::{LenFn, LoadFn, MapDesc, MarshalFn, TypeDesc, ViewFn, Width};

// ── Opcodes ──────────────────────────────────────────────────────────

/// Primitive leaf formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leaf {
    Int(Width),
    Uint(Width),
    F32,
    F64,
    Bool,
    Str,
    Bytes,
    Number,
}

/// What a struct head/field/end op does with its field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// No field: a bare open or close.
    None,
    /// Key plus an inlined primitive.
    Leaf(Leaf),
    /// Key, then hand the field address to the following ops.
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    End,
    Leaf(Leaf),
    Interface,
    MarshalJson,
    MarshalText,
    SliceHead,
    SliceElem,
    ArrayHead,
    ArrayElem,
    MapHead,
    MapValue,
    MapKey,
    MapEnd,
    StructHead(FieldOp),
    StructField(FieldOp),
    StructEnd(FieldOp),
    StructAnonymousHead,
    StructAnonymousEnd,
    EmptyStruct,
    Recursive,
}

pub(crate) const OMIT_EMPTY: u8 = 1 << 0;
/// `string` tag, and integer map keys.
pub(crate) const QUOTED: u8 = 1 << 1;
pub(crate) const MAP_KEY: u8 = 1 << 2;

/// Zero-value test for `omitempty` fields.
#[derive(Clone, Copy)]
pub(crate) enum EmptyCheck {
    Never,
    Int(Width),
    F32,
    F64,
    Bool,
    View(ViewFn),
    Map(LenFn),
    Array(usize),
    Ptr(LoadFn),
    Interface,
    Number,
}

/// A struct key, pre-escaped in both string modes, with the trailing colon.
#[derive(Debug)]
pub(crate) struct FieldKey {
    pub name: Box<str>,
    pub escaped: Box<[u8]>,
    pub plain: Box<[u8]>,
}

pub struct Opcode {
    pub op: Op,
    pub(crate) ty: &'static TypeDesc,
    /// Slot holding this op's input address (struct ops: the struct base).
    pub(crate) idx: usize,
    /// Slot this op writes for its successor: field value, element, key.
    pub(crate) child: usize,
    pub(crate) offset: usize,
    /// Iteration counter slot; struct heads keep the body start position here.
    pub(crate) elem_idx: usize,
    /// Length slot for slices, the constant length for arrays.
    pub(crate) length: usize,
    pub(crate) data: usize,
    pub(crate) size: usize,
    pub(crate) next: usize,
    pub(crate) end: usize,
    pub(crate) next_field: usize,
    /// Loop target for iteration ops, link index for `Recursive`.
    pub(crate) jmp: usize,
    pub(crate) depth: usize,
    pub(crate) flags: u8,
    pub(crate) key: Option<Box<FieldKey>>,
    /// Pointer chain applied to the input address (`ptr_num` = its length).
    pub(crate) loads: Box<[LoadFn]>,
    /// Pointer chain applied to a fused field before reading the leaf.
    pub(crate) leaf_loads: Box<[LoadFn]>,
    pub(crate) view: Option<ViewFn>,
    pub(crate) map: Option<MapDesc>,
    pub(crate) marshal: Option<MarshalFn>,
    pub(crate) empty: EmptyCheck,
    pub(crate) query: Option<Arc<QueryNode>>,
}

impl Opcode {
    pub(crate) fn new(op: Op, ty: &'static TypeDesc, idx: usize, depth: usize) -> Opcode {
        Opcode {
            op,
            ty,
            idx,
            child: 0,
            offset: 0,
            elem_idx: 0,
            length: 0,
            data: 0,
            size: 0,
            next: 0,
            end: 0,
            next_field: 0,
            jmp: 0,
            depth,
            flags: 0,
            key: None,
            loads: Box::new([]),
            leaf_loads: Box::new([]),
            view: None,
            map: None,
            marshal: None,
            empty: EmptyCheck::Never,
            query: None,
        }
    }

    pub fn ptr_num(&self) -> usize {
        self.loads.len()
    }

    pub fn key_name(&self) -> Option<&str> {
        self.key.as_ref().map(|k| &*k.name)
    }

    pub(crate) fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

// ── Programs ─────────────────────────────────────────────────────────

/// Target of a recursive back-edge, resolved on first execution.
pub(crate) struct Link {
    pub ty: &'static TypeDesc,
    pub query: Option<Arc<QueryNode>>,
    pub target: OnceCell<&'static Program>,
}

/// The compiled encoder for one type. Immutable once installed.
pub struct Program {
    pub(crate) ops: Vec<Opcode>,
    pub(crate) links: Vec<Link>,
    pub(crate) slot_count: usize,
    pub(crate) desc: &'static TypeDesc,
}

impl Program {
    pub fn ops(&self) -> &[Opcode] {
        &self.ops
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn type_name(&self) -> &'static str {
        self.desc.type_name()
    }

    /// Number of recursive back-edges in the program.
    pub fn recursion_points(&self) -> usize {
        self.links.len()
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn field(f: &mut fmt::Formatter<'_>, base: &str, fop: &FieldOp) -> fmt::Result {
            match fop {
                FieldOp::None => write!(f, "{base}"),
                FieldOp::Leaf(l) => write!(f, "{base}_{}", leaf_name(l)),
                FieldOp::Value => write!(f, "{base}_VALUE"),
            }
        }
        match self {
            Op::End => f.write_str("END"),
            Op::Leaf(l) => f.write_str(leaf_name(l)),
            Op::Interface => f.write_str("INTERFACE"),
            Op::MarshalJson => f.write_str("MARSHAL_JSON"),
            Op::MarshalText => f.write_str("MARSHAL_TEXT"),
            Op::SliceHead => f.write_str("SLICE_HEAD"),
            Op::SliceElem => f.write_str("SLICE_ELEM"),
            Op::ArrayHead => f.write_str("ARRAY_HEAD"),
            Op::ArrayElem => f.write_str("ARRAY_ELEM"),
            Op::MapHead => f.write_str("MAP_HEAD"),
            Op::MapValue => f.write_str("MAP_VALUE"),
            Op::MapKey => f.write_str("MAP_KEY"),
            Op::MapEnd => f.write_str("MAP_END"),
            Op::StructHead(fop) => field(f, "STRUCT_HEAD", fop),
            Op::StructField(fop) => field(f, "STRUCT_FIELD", fop),
            Op::StructEnd(fop) => field(f, "STRUCT_END", fop),
            Op::StructAnonymousHead => f.write_str("STRUCT_ANONYMOUS_HEAD"),
            Op::StructAnonymousEnd => f.write_str("STRUCT_ANONYMOUS_END"),
            Op::EmptyStruct => f.write_str("EMPTY_STRUCT"),
            Op::Recursive => f.write_str("RECURSIVE"),
        }
    }
}

fn leaf_name(l: &Leaf) -> &'static str {
    match l {
        Leaf::Int(Width::W8) => "INT8",
        Leaf::Int(Width::W16) => "INT16",
        Leaf::Int(Width::W32) => "INT32",
        Leaf::Int(Width::W64) => "INT64",
        Leaf::Uint(Width::W8) => "UINT8",
        Leaf::Uint(Width::W16) => "UINT16",
        Leaf::Uint(Width::W32) => "UINT32",
        Leaf::Uint(Width::W64) => "UINT64",
        Leaf::F32 => "FLOAT32",
        Leaf::F64 => "FLOAT64",
        Leaf::Bool => "BOOL",
        Leaf::Str => "STRING",
        Leaf::Bytes => "BYTES",
        Leaf::Number => "NUMBER",
    }
}

/// One line per op, indented by depth:
/// `[003] 1   STRUCT_FIELD_STRING "name" (idx:0 next:4)`.
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "program {} (slots: {})", self.desc.type_name(), self.slot_count)?;
        for (i, code) in self.ops.iter().enumerate() {
            write!(f, "[{i:03}] {:<3} {}{}", code.depth, "  ".repeat(code.depth), code.op)?;
            if code.ptr_num() > 0 {
                write!(f, " ptr:{}", code.ptr_num())?;
            }
            if let Some(name) = code.key_name() {
                write!(f, " {name:?}")?;
            }
            if code.has(OMIT_EMPTY) {
                f.write_str(" omitempty")?;
            }
            if code.has(QUOTED) {
                f.write_str(" string")?;
            }
            write!(f, " (idx:{} next:{}", code.idx, code.next)?;
            match code.op {
                Op::SliceHead | Op::ArrayHead | Op::MapHead | Op::StructHead(_) | Op::StructAnonymousHead => {
                    write!(f, " end:{}", code.end)?
                }
                Op::SliceElem | Op::ArrayElem | Op::MapKey => write!(f, " jmp:{}", code.jmp)?,
                Op::Recursive => write!(f, " link:{}", code.jmp)?,
                Op::StructField(FieldOp::Value) => write!(f, " next_field:{}", code.next_field)?,
                _ => {}
            }
            writeln!(f, ")")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

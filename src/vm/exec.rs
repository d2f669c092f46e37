//! The opcode interpreter.
//!
//! Every value an op emits is followed by a separator. Closers strip the
//! last one before writing their delimiter, so containers never need to
//! know whether an element is the first. The root's trailing separator is
//! removed after the loop.

use std::ptr::NonNull;
use std::slice;

use super::START_DETECTING_CYCLES_AFTER;
use super::cache;
use super::context::{Frame, MapPos, RuntimeContext};
use super::opcode::{EmptyCheck, FieldKey, FieldOp, Leaf, MAP_KEY, OMIT_EMPTY, Op, Opcode, Program, QUOTED};
use crate::color::{ColorScheme, Token};
use crate::encode::compact::{compact_into, indent_into, validate};
use crate::encode::number::{append_f32, append_f64, append_i64, append_number, append_u64};
use crate::encode::string::{append_base64, append_bytes_str, append_str};
use crate::error::EncodeError;
use crate::types::{Dyn, LoadFn, Number, Width};

/// Layout settings for one run. The const flags pick the monomorphized
/// flavor: HTML escaping, indentation and color.
pub(crate) struct Emitter<'a, const HTML: bool, const INDENT: bool, const COLOR: bool> {
    pub prefix: &'a [u8],
    pub unit: &'a [u8],
    pub colors: &'a ColorScheme,
    pub sep_len: usize,
    pub line_sep: bool,
    pub strict: bool,
    pub ordered: bool,
}

impl<const HTML: bool, const INDENT: bool, const COLOR: bool> Emitter<'_, HTML, INDENT, COLOR> {
    #[inline(always)]
    fn head(&self, b: &mut Vec<u8>, token: Token) {
        if COLOR {
            b.extend_from_slice(self.colors.format(token).header.as_bytes());
        }
    }

    #[inline(always)]
    fn foot(&self, b: &mut Vec<u8>, token: Token) {
        if COLOR {
            b.extend_from_slice(self.colors.format(token).footer.as_bytes());
        }
    }

    #[inline(always)]
    fn punct(&self, b: &mut Vec<u8>, token: Token, c: u8) {
        self.head(b, token);
        b.push(c);
        self.foot(b, token);
    }

    #[inline(always)]
    fn sep(&self, b: &mut Vec<u8>) {
        self.punct(b, Token::Comma, b',');
    }

    #[inline(always)]
    fn strip_sep(&self, b: &mut Vec<u8>) {
        b.truncate(b.len() - self.sep_len);
    }

    #[inline(always)]
    fn newline(&self, b: &mut Vec<u8>, depth: usize) {
        b.push(b'\n');
        b.extend_from_slice(self.prefix);
        for _ in 0..depth {
            b.extend_from_slice(self.unit);
        }
    }

    /// Whitespace before an element of a container at `depth`.
    #[inline(always)]
    fn entry(&self, b: &mut Vec<u8>, depth: usize) {
        if INDENT {
            self.newline(b, depth + 1);
        }
    }

    #[inline(always)]
    fn close(&self, b: &mut Vec<u8>, depth: usize, token: Token, c: u8, non_empty: bool) {
        if INDENT && non_empty {
            self.newline(b, depth);
        }
        self.punct(b, token, c);
    }

    fn empty(&self, b: &mut Vec<u8>, object: bool) {
        if object {
            self.punct(b, Token::ObjectStart, b'{');
            self.punct(b, Token::ObjectEnd, b'}');
        } else {
            self.punct(b, Token::ArrayStart, b'[');
            self.punct(b, Token::ArrayEnd, b']');
        }
    }

    #[inline(always)]
    fn colon(&self, b: &mut Vec<u8>) {
        self.punct(b, Token::Colon, b':');
        if INDENT {
            b.push(b' ');
        }
    }

    fn null(&self, b: &mut Vec<u8>) {
        self.head(b, Token::Null);
        b.extend_from_slice(b"null");
        self.foot(b, Token::Null);
    }

    #[inline(always)]
    fn key(&self, b: &mut Vec<u8>, key: &FieldKey) {
        let bytes: &[u8] = if HTML { &key.escaped } else { &key.plain };
        if COLOR {
            self.head(b, Token::ObjectKey);
            b.extend_from_slice(&bytes[..bytes.len() - 1]);
            self.foot(b, Token::ObjectKey);
            self.colon(b);
        } else {
            b.extend_from_slice(bytes);
            if INDENT {
                b.push(b' ');
            }
        }
    }

    /// Bytes around a map key, stripped when comparing keys for sorting.
    fn key_trim(&self) -> (usize, usize) {
        if COLOR {
            let f = self.colors.format(Token::ObjectKey);
            (1 + f.header.len(), 1 + f.footer.len())
        } else {
            (1, 1)
        }
    }

    /// # Safety
    /// `p` must point to a live value of the leaf's type.
    unsafe fn leaf(
        &self,
        b: &mut Vec<u8>,
        scratch: &mut Vec<u8>,
        leaf: Leaf,
        code: &Opcode,
        p: *const u8,
    ) -> Result<(), EncodeError> {
        let quoted = code.has(QUOTED);
        let token = if code.has(MAP_KEY) { Token::ObjectKey } else { leaf_token(leaf) };
        self.head(b, token);
        match leaf {
            Leaf::Int(w) => quote(b, quoted, |b| append_i64(b, unsafe { read_int(p, w) })),
            Leaf::Uint(w) => quote(b, quoted, |b| append_u64(b, unsafe { read_uint(p, w) })),
            Leaf::F32 => {
                let v = unsafe { *(p as *const f32) };
                quote_result(b, quoted, |b| append_f32(b, v))?
            }
            Leaf::F64 => {
                let v = unsafe { *(p as *const f64) };
                quote_result(b, quoted, |b| append_f64(b, v))?
            }
            Leaf::Bool => {
                let v = unsafe { *(p as *const bool) };
                quote(b, quoted, |b| b.extend_from_slice(if v { &b"true"[..] } else { b"false" }))
            }
            Leaf::Str => {
                let s = unsafe { str_at(code, p) };
                if quoted {
                    scratch.clear();
                    append_str::<HTML>(scratch, s, self.line_sep);
                    // SAFETY: escaping valid UTF-8 yields valid UTF-8.
                    let inner = unsafe { std::str::from_utf8_unchecked(scratch) };
                    append_str::<HTML>(b, inner, self.line_sep);
                } else {
                    append_str::<HTML>(b, s, self.line_sep);
                }
            }
            Leaf::Bytes => {
                let (data, len) = unsafe { view_at(code, p) };
                append_base64(b, unsafe { slice::from_raw_parts(data, len) });
            }
            Leaf::Number => {
                let n = unsafe { &*(p as *const Number) };
                quote_result(b, quoted, |b| append_number(b, n.as_str()))?
            }
        }
        self.foot(b, token);
        Ok(())
    }

    fn marshal_json(
        &self,
        b: &mut Vec<u8>,
        scratch: &mut Vec<u8>,
        code: &Opcode,
        p: *const u8,
        depth: usize,
    ) -> Result<(), EncodeError> {
        let type_name = code.ty.type_name();
        let Some(f) = code.marshal else {
            return Err(EncodeError::UnsupportedType { type_name });
        };
        // SAFETY: the op was compiled for this type and `p` is non-null.
        let out = unsafe { f(p) }.map_err(|source| EncodeError::Marshaler {
            type_name,
            method: "MarshalJson",
            source,
        })?;
        validate(&out).map_err(|e| EncodeError::Marshaler {
            type_name,
            method: "MarshalJson",
            source: Box::new(e),
        })?;
        if INDENT {
            scratch.clear();
            compact_into(scratch, &out, HTML, self.line_sep);
            indent_into(b, scratch, self.prefix, self.unit, depth);
        } else {
            compact_into(b, &out, HTML, self.line_sep);
        }
        Ok(())
    }

    fn marshal_text(&self, b: &mut Vec<u8>, code: &Opcode, p: *const u8) -> Result<(), EncodeError> {
        let type_name = code.ty.type_name();
        let Some(f) = code.marshal else {
            return Err(EncodeError::UnsupportedType { type_name });
        };
        // SAFETY: the op was compiled for this type and `p` is non-null.
        let out = unsafe { f(p) }.map_err(|source| EncodeError::Marshaler {
            type_name,
            method: "MarshalText",
            source,
        })?;
        let token = if code.has(MAP_KEY) { Token::ObjectKey } else { Token::String };
        self.head(b, token);
        append_bytes_str::<HTML>(b, &out, self.line_sep, self.strict)?;
        self.foot(b, token);
        Ok(())
    }

    /// Writes one struct field and returns the next op index.
    ///
    /// # Safety
    /// `slots` is the running frame; `code.idx` holds a live struct address.
    unsafe fn field(
        &self,
        b: &mut Vec<u8>,
        scratch: &mut Vec<u8>,
        slots: &mut [usize],
        code: &Opcode,
        fop: FieldOp,
        depth: usize,
    ) -> Result<usize, EncodeError> {
        let addr = (slots[code.idx] + code.offset) as *const u8;
        if code.has(OMIT_EMPTY) && unsafe { is_empty(code.empty, addr) } {
            return Ok(code.next_field);
        }
        self.entry(b, depth);
        if let Some(key) = &code.key {
            self.key(b, key);
        }
        match fop {
            FieldOp::Leaf(leaf) => {
                let p = unsafe { load_chain(addr, &code.leaf_loads) };
                if p.is_null() {
                    self.null(b);
                } else {
                    unsafe { self.leaf(b, scratch, leaf, code, p)? };
                }
                self.sep(b);
            }
            FieldOp::Value => slots[code.child] = addr as usize,
            FieldOp::None => {}
        }
        Ok(code.next)
    }
}

/// Runs `root` against the value at `p`, appending to `ctx.buf`.
///
/// # Safety
/// `p` must point to a live value of the type `root` was compiled for, and
/// that value must outlive the call.
pub(crate) unsafe fn run<const HTML: bool, const INDENT: bool, const COLOR: bool>(
    em: &Emitter<'_, HTML, INDENT, COLOR>,
    ctx: &mut RuntimeContext,
    root: &'static Program,
    p: *const u8,
) -> Result<(), EncodeError> {
    let RuntimeContext {
        buf: b,
        ptrs,
        seen,
        frames,
        maps,
        map_pool,
        scratch,
    } = ctx;
    ptrs.clear();
    ptrs.resize(root.slot_count, 0);
    ptrs[0] = p as usize;

    let mut prog: &'static Program = root;
    let mut base = 0;
    let mut indent = 0;
    let mut pc = 0;

    // SAFETY invariant for slot!/set_slot!: the compiler numbers slots below
    // the program's slot_count, and every frame entry resizes ptrs to
    // base + slot_count before running the callee.
    macro_rules! slot {
        ($i:expr) => {
            unsafe { *ptrs.get_unchecked(base + $i) }
        };
    }
    macro_rules! set_slot {
        ($i:expr, $v:expr) => {{
            let v = $v;
            unsafe { *ptrs.get_unchecked_mut(base + $i) = v }
        }};
    }
    macro_rules! op {
        ($i:expr) => {
            // SAFETY: link indices are produced by the compiler within ops.
            unsafe { prog.ops.get_unchecked($i) }
        };
    }
    macro_rules! load {
        ($code:expr) => {{
            let p = slot!($code.idx) as *const u8;
            unsafe { load_chain(p, &$code.loads) }
        }};
    }

    loop {
        let code = op!(pc);
        let depth = indent + code.depth;

        match code.op {
            Op::End => {
                let Some(f) = frames.pop() else { break };
                seen.pop();
                ptrs.truncate(base);
                prog = f.program;
                base = f.base;
                indent = f.indent;
                pc = f.ret;
            }

            Op::Leaf(leaf) => {
                let p = load!(code);
                if p.is_null() {
                    em.null(b);
                } else {
                    unsafe { em.leaf(b, scratch, leaf, code, p)? };
                }
                em.sep(b);
                pc = code.next;
            }

            Op::Interface | Op::Recursive => {
                let p = load!(code);
                let target = if p.is_null() {
                    None
                } else if code.op == Op::Interface {
                    match unsafe { &*(p as *const Dyn) }.parts() {
                        Some((desc, data)) => Some((cache::program(desc, code.query.as_ref())?, data)),
                        None => None,
                    }
                } else {
                    Some((cache::link_target(&prog.links[code.jmp])?, p))
                };
                let Some((callee, data)) = target else {
                    em.null(b);
                    em.sep(b);
                    pc = code.next;
                    continue;
                };
                if frames.len() > START_DETECTING_CYCLES_AFTER && seen.contains(&(data as usize)) {
                    return Err(EncodeError::cycle(callee.type_name()));
                }
                seen.push(data as usize);
                frames.push(Frame {
                    program: prog,
                    ret: code.next,
                    base,
                    indent,
                });
                base += prog.slot_count;
                indent = depth;
                prog = callee;
                ptrs.resize(base + callee.slot_count, 0);
                ptrs[base] = data as usize;
                pc = 0;
            }

            Op::MarshalJson => {
                let p = load!(code);
                if p.is_null() {
                    em.null(b);
                } else {
                    em.marshal_json(b, scratch, code, p, depth)?;
                }
                em.sep(b);
                pc = code.next;
            }

            Op::MarshalText => {
                let p = load!(code);
                if p.is_null() {
                    em.null(b);
                } else {
                    em.marshal_text(b, code, p)?;
                }
                em.sep(b);
                pc = code.next;
            }

            // ── Sequences ────────────────────────────────────────────
            Op::SliceHead => {
                let p = load!(code);
                if p.is_null() {
                    em.null(b);
                    em.sep(b);
                    pc = op!(code.end).next;
                    continue;
                }
                let (data, len) = unsafe { view_at(code, p) };
                if len == 0 {
                    em.empty(b, false);
                    em.sep(b);
                    pc = op!(code.end).next;
                    continue;
                }
                set_slot!(code.elem_idx, 0);
                set_slot!(code.length, len);
                set_slot!(code.data, data as usize);
                em.punct(b, Token::ArrayStart, b'[');
                em.entry(b, depth);
                set_slot!(code.child, data as usize);
                pc = code.next;
            }

            Op::ArrayHead => {
                let p = load!(code);
                if p.is_null() {
                    em.null(b);
                    em.sep(b);
                    pc = op!(code.end).next;
                    continue;
                }
                if code.length == 0 {
                    em.empty(b, false);
                    em.sep(b);
                    pc = op!(code.end).next;
                    continue;
                }
                set_slot!(code.elem_idx, 0);
                set_slot!(code.data, p as usize);
                em.punct(b, Token::ArrayStart, b'[');
                em.entry(b, depth);
                set_slot!(code.child, p as usize);
                pc = code.next;
            }

            Op::SliceElem | Op::ArrayElem => {
                let i = slot!(code.elem_idx) + 1;
                let len = if code.op == Op::SliceElem { slot!(code.length) } else { code.length };
                if i < len {
                    set_slot!(code.elem_idx, i);
                    em.entry(b, depth);
                    set_slot!(code.child, slot!(code.data) + i * code.size);
                    pc = code.jmp;
                } else {
                    em.strip_sep(b);
                    em.close(b, depth, Token::ArrayEnd, b']', true);
                    em.sep(b);
                    pc = code.next;
                }
            }

            // ── Maps ─────────────────────────────────────────────────
            Op::MapHead => {
                let p = load!(code);
                if p.is_null() {
                    em.null(b);
                    em.sep(b);
                    pc = op!(code.end).next;
                    continue;
                }
                let Some(m) = code.map else {
                    return Err(EncodeError::UnsupportedType { type_name: code.ty.type_name() });
                };
                if unsafe { (m.len)(p) } == 0 {
                    em.empty(b, true);
                    em.sep(b);
                    pc = op!(code.end).next;
                    continue;
                }
                let mut mc = map_pool.pop().unwrap_or_default();
                mc.ordered = em.ordered;
                unsafe { (m.entries)(p, &mut mc.entries) };
                em.punct(b, Token::ObjectStart, b'{');
                let start = b.len();
                em.entry(b, depth);
                if mc.ordered {
                    mc.positions.push(MapPos { start, key_start: b.len(), ..MapPos::default() });
                }
                set_slot!(code.child, mc.entries[0].0 as usize);
                maps.push(mc);
                pc = code.next;
            }

            Op::MapValue => {
                // SAFETY: MapValue only runs between its MapHead and MapEnd,
                // which keep a context on the stack.
                let mc = unsafe { maps.last_mut().unwrap_unchecked() };
                em.strip_sep(b);
                if let Some(pos) = mc.positions.last_mut() {
                    pos.key_end = b.len();
                }
                em.colon(b);
                set_slot!(code.child, mc.entries[mc.idx].1 as usize);
                pc = code.next;
            }

            Op::MapKey => {
                // SAFETY: same as MapValue.
                let mc = unsafe { maps.last_mut().unwrap_unchecked() };
                if let Some(pos) = mc.positions.last_mut() {
                    pos.end = b.len();
                }
                mc.idx += 1;
                if mc.idx < mc.entries.len() {
                    let start = b.len();
                    em.entry(b, depth);
                    if mc.ordered {
                        mc.positions.push(MapPos { start, key_start: b.len(), ..MapPos::default() });
                    }
                    set_slot!(code.child, mc.entries[mc.idx].0 as usize);
                    pc = code.jmp;
                } else {
                    pc = code.next;
                }
            }

            Op::MapEnd => {
                // SAFETY: same as MapValue.
                let mut mc = unsafe { maps.pop().unwrap_unchecked() };
                if mc.ordered {
                    let (front, back) = em.key_trim();
                    mc.sort_into(b, front, back);
                }
                em.strip_sep(b);
                em.close(b, depth, Token::ObjectEnd, b'}', true);
                em.sep(b);
                mc.clear();
                map_pool.push(mc);
                pc = code.next;
            }

            // ── Structs ──────────────────────────────────────────────
            Op::StructHead(fop) => {
                let p = load!(code);
                if p.is_null() {
                    em.null(b);
                    em.sep(b);
                    pc = op!(code.end).next;
                    continue;
                }
                set_slot!(code.idx, p as usize);
                em.punct(b, Token::ObjectStart, b'{');
                set_slot!(code.elem_idx, b.len());
                pc = match fop {
                    FieldOp::None => code.next,
                    _ => unsafe { em.field(b, scratch, &mut ptrs[base..], code, fop, depth)? },
                };
            }

            Op::StructField(fop) => {
                pc = unsafe { em.field(b, scratch, &mut ptrs[base..], code, fop, depth)? };
            }

            Op::StructEnd(fop) => {
                if fop != FieldOp::None {
                    unsafe { em.field(b, scratch, &mut ptrs[base..], code, fop, depth)? };
                }
                let non_empty = b.len() != slot!(code.elem_idx);
                if non_empty {
                    em.strip_sep(b);
                }
                em.close(b, depth, Token::ObjectEnd, b'}', non_empty);
                em.sep(b);
                pc = code.next;
            }

            Op::StructAnonymousHead => {
                let addr = (slot!(code.idx) + code.offset) as *const u8;
                let p = unsafe { load_chain(addr, &code.loads) };
                if p.is_null() {
                    pc = op!(code.end).next;
                } else {
                    set_slot!(code.child, p as usize);
                    pc = code.next;
                }
            }

            Op::StructAnonymousEnd => pc = code.next,

            Op::EmptyStruct => {
                if load!(code).is_null() {
                    em.null(b);
                } else {
                    em.empty(b, true);
                }
                em.sep(b);
                pc = code.next;
            }
        }
    }

    em.strip_sep(b);
    Ok(())
}

// ── Readers ──────────────────────────────────────────────────────────

/// Follows a pointer chain; stops at the first null.
#[inline(always)]
unsafe fn load_chain(mut p: *const u8, loads: &[LoadFn]) -> *const u8 {
    for load in loads {
        if p.is_null() {
            break;
        }
        p = unsafe { load(p) };
    }
    p
}

unsafe fn read_int(p: *const u8, w: Width) -> i64 {
    unsafe {
        match w {
            Width::W8 => *(p as *const i8) as i64,
            Width::W16 => *(p as *const i16) as i64,
            Width::W32 => *(p as *const i32) as i64,
            Width::W64 => *(p as *const i64),
        }
    }
}

unsafe fn read_uint(p: *const u8, w: Width) -> u64 {
    unsafe {
        match w {
            Width::W8 => *p as u64,
            Width::W16 => *(p as *const u16) as u64,
            Width::W32 => *(p as *const u32) as u64,
            Width::W64 => *(p as *const u64),
        }
    }
}

unsafe fn view_at(code: &Opcode, p: *const u8) -> (*const u8, usize) {
    match code.view {
        Some(view) => unsafe { view(p) },
        None => (NonNull::<u8>::dangling().as_ptr(), 0),
    }
}

unsafe fn str_at<'a>(code: &Opcode, p: *const u8) -> &'a str {
    let (data, len) = unsafe { view_at(code, p) };
    // SAFETY: string views come from str-backed types.
    unsafe { std::str::from_utf8_unchecked(slice::from_raw_parts(data, len)) }
}

unsafe fn is_empty(check: EmptyCheck, p: *const u8) -> bool {
    unsafe {
        match check {
            EmptyCheck::Never => false,
            EmptyCheck::Int(w) => read_uint(p, w) == 0,
            EmptyCheck::F32 => *(p as *const f32) == 0.0,
            EmptyCheck::F64 => *(p as *const f64) == 0.0,
            EmptyCheck::Bool => !*(p as *const bool),
            EmptyCheck::View(view) => view(p).1 == 0,
            EmptyCheck::Map(len) => len(p) == 0,
            EmptyCheck::Array(n) => n == 0,
            EmptyCheck::Ptr(load) => load(p).is_null(),
            EmptyCheck::Interface => (*(p as *const Dyn)).is_null(),
            EmptyCheck::Number => (*(p as *const Number)).as_str().is_empty(),
        }
    }
}

fn leaf_token(leaf: Leaf) -> Token {
    match leaf {
        Leaf::Int(_) => Token::Int,
        Leaf::Uint(_) => Token::Uint,
        Leaf::F32 | Leaf::F64 | Leaf::Number => Token::Float,
        Leaf::Bool => Token::Bool,
        Leaf::Str => Token::String,
        Leaf::Bytes => Token::Binary,
    }
}

#[inline(always)]
fn quote(b: &mut Vec<u8>, quoted: bool, f: impl FnOnce(&mut Vec<u8>)) {
    if quoted {
        b.push(b'"');
    }
    f(b);
    if quoted {
        b.push(b'"');
    }
}

#[inline(always)]
fn quote_result(
    b: &mut Vec<u8>,
    quoted: bool,
    f: impl FnOnce(&mut Vec<u8>) -> Result<(), EncodeError>,
) -> Result<(), EncodeError> {
    if quoted {
        b.push(b'"');
    }
    f(b)?;
    if quoted {
        b.push(b'"');
    }
    Ok(())
}

use std::collections::{BTreeMap, HashMap};
use std::ptr;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};

use once_cell::sync::OnceCell;

use super::{Describe, Dyn, Kind, MapDesc, PtrDesc, SeqDesc, TypeDesc, Width, desc_of};

/// A JSON number literal carried verbatim, e.g. an arbitrary-precision decimal.
///
/// The literal is checked against the JSON number grammar when encoded; the
/// empty string encodes as `0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Number(String);

impl Number {
    pub fn new(literal: impl Into<String>) -> Number {
        Number(literal.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Number {
    fn from(s: &str) -> Number {
        Number(s.to_string())
    }
}

impl From<i64> for Number {
    fn from(n: i64) -> Number {
        Number(n.to_string())
    }
}

// ── Primitives ───────────────────────────────────────────────────────

macro_rules! describe_scalar {
    ($($ty:ty => $kind:expr),* $(,)?) => {
        $(unsafe impl Describe for $ty {
            const DESC: &'static TypeDesc = &const { TypeDesc::of::<$ty>($kind) };
        })*
    };
}

describe_scalar! {
    i8 => Kind::Int(Width::W8),
    i16 => Kind::Int(Width::W16),
    i32 => Kind::Int(Width::W32),
    i64 => Kind::Int(Width::W64),
    isize => Kind::Int(Width::WORD),
    u8 => Kind::Uint(Width::W8),
    u16 => Kind::Uint(Width::W16),
    u32 => Kind::Uint(Width::W32),
    u64 => Kind::Uint(Width::W64),
    usize => Kind::Uint(Width::WORD),
    f32 => Kind::F32,
    f64 => Kind::F64,
    bool => Kind::Bool,
    String => Kind::String(string_view),
    &'static str => Kind::String(str_view),
    Box<str> => Kind::String(boxed_str_view),
    Number => Kind::Number,
    Dyn => Kind::Interface,
}

unsafe fn string_view(p: *const u8) -> (*const u8, usize) {
    let s = unsafe { &*(p as *const String) };
    (s.as_ptr(), s.len())
}

unsafe fn str_view(p: *const u8) -> (*const u8, usize) {
    let s = unsafe { *(p as *const &'static str) };
    (s.as_ptr(), s.len())
}

unsafe fn boxed_str_view(p: *const u8) -> (*const u8, usize) {
    let s = unsafe { &*(p as *const Box<str>) };
    (s.as_ptr(), s.len())
}

// ── Sequences ────────────────────────────────────────────────────────

unsafe impl<T: Describe> Describe for Vec<T> {
    const DESC: &'static TypeDesc = &const {
        TypeDesc::of::<Vec<T>>(Kind::Slice(SeqDesc { elem: desc_of::<T>, view: vec_view::<T> }))
    };
}

unsafe impl<T: Describe> Describe for Box<[T]> {
    const DESC: &'static TypeDesc = &const {
        TypeDesc::of::<Box<[T]>>(Kind::Slice(SeqDesc { elem: desc_of::<T>, view: boxed_slice_view::<T> }))
    };
}

unsafe impl<T: Describe, const N: usize> Describe for [T; N] {
    const DESC: &'static TypeDesc =
        &const { TypeDesc::of::<[T; N]>(Kind::Array { elem: desc_of::<T>, len: N }) };
}

unsafe fn vec_view<T>(p: *const u8) -> (*const u8, usize) {
    let v = unsafe { &*(p as *const Vec<T>) };
    (v.as_ptr() as *const u8, v.len())
}

unsafe fn boxed_slice_view<T>(p: *const u8) -> (*const u8, usize) {
    let v = unsafe { &*(p as *const Box<[T]>) };
    (v.as_ptr() as *const u8, v.len())
}

// ── Maps ─────────────────────────────────────────────────────────────

unsafe impl<K: Describe, V: Describe, S: 'static> Describe for HashMap<K, V, S> {
    const DESC: &'static TypeDesc = &const {
        TypeDesc::of::<HashMap<K, V, S>>(Kind::Map(MapDesc {
            key: desc_of::<K>,
            value: desc_of::<V>,
            len: hash_map_len::<K, V, S>,
            entries: hash_map_entries::<K, V, S>,
        }))
    };
}

unsafe impl<K: Describe, V: Describe> Describe for BTreeMap<K, V> {
    const DESC: &'static TypeDesc = &const {
        TypeDesc::of::<BTreeMap<K, V>>(Kind::Map(MapDesc {
            key: desc_of::<K>,
            value: desc_of::<V>,
            len: btree_map_len::<K, V>,
            entries: btree_map_entries::<K, V>,
        }))
    };
}

unsafe fn hash_map_len<K, V, S>(p: *const u8) -> usize {
    unsafe { &*(p as *const HashMap<K, V, S>) }.len()
}

unsafe fn hash_map_entries<K, V, S>(p: *const u8, out: &mut Vec<(*const u8, *const u8)>) {
    let map = unsafe { &*(p as *const HashMap<K, V, S>) };
    out.extend(map.iter().map(|(k, v)| (k as *const K as *const u8, v as *const V as *const u8)));
}

unsafe fn btree_map_len<K, V>(p: *const u8) -> usize {
    unsafe { &*(p as *const BTreeMap<K, V>) }.len()
}

unsafe fn btree_map_entries<K, V>(p: *const u8, out: &mut Vec<(*const u8, *const u8)>) {
    let map = unsafe { &*(p as *const BTreeMap<K, V>) };
    out.extend(map.iter().map(|(k, v)| (k as *const K as *const u8, v as *const V as *const u8)));
}

// ── Pointers ─────────────────────────────────────────────────────────

macro_rules! describe_pointer {
    ($($ty:ty => $load:ident),* $(,)?) => {
        $(unsafe impl<T: Describe> Describe for $ty {
            const DESC: &'static TypeDesc = &const {
                TypeDesc::of::<$ty>(Kind::Ptr(PtrDesc { elem: desc_of::<T>, load: $load::<T> }))
            };
        })*
    };
}

describe_pointer! {
    Option<T> => load_option,
    Box<T> => load_box,
    Arc<T> => load_arc,
    &'static T => load_ref,
    OnceCell<T> => load_once_cell,
}

unsafe fn load_option<T>(p: *const u8) -> *const u8 {
    match unsafe { &*(p as *const Option<T>) } {
        Some(v) => v as *const T as *const u8,
        None => ptr::null(),
    }
}

unsafe fn load_box<T>(p: *const u8) -> *const u8 {
    let b = unsafe { &*(p as *const Box<T>) };
    &**b as *const T as *const u8
}

unsafe fn load_arc<T>(p: *const u8) -> *const u8 {
    Arc::as_ptr(unsafe { &*(p as *const Arc<T>) }) as *const u8
}

unsafe fn load_ref<T: 'static>(p: *const u8) -> *const u8 {
    unsafe { *(p as *const &'static T) as *const T as *const u8 }
}

unsafe fn load_once_cell<T>(p: *const u8) -> *const u8 {
    match unsafe { &*(p as *const OnceCell<T>) }.get() {
        Some(v) => v as *const T as *const u8,
        None => ptr::null(),
    }
}

// ── Types without an encoding ────────────────────────────────────────

unsafe impl<T: 'static> Describe for Sender<T> {
    const DESC: &'static TypeDesc = &const { TypeDesc::of::<Sender<T>>(Kind::Unsupported) };
}

unsafe impl<T: 'static> Describe for Receiver<T> {
    const DESC: &'static TypeDesc = &const { TypeDesc::of::<Receiver<T>>(Kind::Unsupported) };
}

unsafe impl Describe for fn() {
    const DESC: &'static TypeDesc = &const { TypeDesc::of::<fn()>(Kind::Unsupported) };
}

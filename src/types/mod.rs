//! Compile-time type descriptors.
//!
//! Every encodable type carries a `&'static TypeDesc` through [`Describe`].
//! The descriptor names the type's kind, its layout (field offsets, element
//! types) and a handful of accessor functions the VM calls instead of
//! reflecting on the value.

mod dynamic;
mod impls;
mod macros;
pub(crate) mod tag;

use std::any::TypeId;
use std::fmt;

use crate::error::BoxError;

pub use dynamic::{Dyn, Dynamic};
pub use impls::Number;

pub type DescFn = fn() -> &'static TypeDesc;
/// Returns the `(data, len)` view of a string or slice value.
pub type ViewFn = unsafe fn(*const u8) -> (*const u8, usize);
/// Follows one pointer level; null when the pointer is absent.
pub type LoadFn = unsafe fn(*const u8) -> *const u8;
pub type LenFn = unsafe fn(*const u8) -> usize;
pub type EntriesFn = unsafe fn(*const u8, &mut Vec<(*const u8, *const u8)>);
pub type MarshalFn = unsafe fn(*const u8) -> Result<Vec<u8>, BoxError>;

/// Types the encoder can walk.
///
/// Implement it through [`describe_struct!`](crate::describe_struct) and the
/// other `describe_*` macros, which derive the descriptor from the type itself.
///
/// # Safety
///
/// `DESC` must describe `Self` exactly: its `size` and `id` are those of
/// `Self`, every field offset and field descriptor matches the real field,
/// and every accessor in the [`Kind`] reads a value of the layout it is
/// handed. The encoder reads values through these without further checks.
///
/// Borrowing another type's descriptor is rejected without `unsafe`:
///
/// ```compile_fail
/// struct Byte(u8);
///
/// impl jsonvm::Describe for Byte {
///     const DESC: &'static jsonvm::TypeDesc = <Vec<String> as jsonvm::Describe>::DESC;
/// }
/// ```
pub unsafe trait Describe: 'static {
    const DESC: &'static TypeDesc;
}

pub fn desc_of<T: Describe>() -> &'static TypeDesc {
    T::DESC
}

pub fn type_id_of<T: 'static>() -> TypeId {
    TypeId::of::<T>()
}

/// Produces the JSON encoding of a value directly.
pub trait MarshalJson {
    fn marshal_json(&self) -> Result<Vec<u8>, BoxError>;
}

/// Produces the text form of a value, encoded as a JSON string.
pub trait MarshalText {
    fn marshal_text(&self) -> Result<Vec<u8>, BoxError>;
}

/// # Safety
/// `p` must point to a live `T`.
pub unsafe fn marshal_json_adapter<T: MarshalJson>(p: *const u8) -> Result<Vec<u8>, BoxError> {
    unsafe { &*(p as *const T) }.marshal_json()
}

/// # Safety
/// `p` must point to a live `T`.
pub unsafe fn marshal_text_adapter<T: MarshalText>(p: *const u8) -> Result<Vec<u8>, BoxError> {
    unsafe { &*(p as *const T) }.marshal_text()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    W8,
    W16,
    W32,
    W64,
}

impl Width {
    pub const WORD: Width = if usize::BITS == 64 { Width::W64 } else { Width::W32 };

    pub const fn bytes(self) -> usize {
        match self {
            Width::W8 => 1,
            Width::W16 => 2,
            Width::W32 => 4,
            Width::W64 => 8,
        }
    }

    /// Mask selecting the low `bytes()` bytes of a widened value.
    pub const fn mask(self) -> u64 {
        match self {
            Width::W64 => u64::MAX,
            w => (1u64 << (w.bytes() * 8)) - 1,
        }
    }
}

#[derive(Clone, Copy)]
pub struct SeqDesc {
    pub elem: DescFn,
    pub view: ViewFn,
}

#[derive(Clone, Copy)]
pub struct MapDesc {
    pub key: DescFn,
    pub value: DescFn,
    pub len: LenFn,
    pub entries: EntriesFn,
}

#[derive(Clone, Copy)]
pub struct PtrDesc {
    pub elem: DescFn,
    pub load: LoadFn,
}

#[derive(Clone, Copy)]
pub enum Kind {
    Int(Width),
    Uint(Width),
    F32,
    F64,
    Bool,
    String(ViewFn),
    Number,
    Slice(SeqDesc),
    Array { elem: DescFn, len: usize },
    Map(MapDesc),
    Struct(&'static [Field]),
    Ptr(PtrDesc),
    Interface,
    MarshalJson(MarshalFn),
    MarshalText(MarshalFn),
    Unsupported,
}

impl Kind {
    pub fn name(&self) -> &'static str {
        match self {
            Kind::Int(_) => "int",
            Kind::Uint(_) => "uint",
            Kind::F32 => "float32",
            Kind::F64 => "float64",
            Kind::Bool => "bool",
            Kind::String(_) => "string",
            Kind::Number => "number",
            Kind::Slice(_) => "slice",
            Kind::Array { .. } => "array",
            Kind::Map(_) => "map",
            Kind::Struct(_) => "struct",
            Kind::Ptr(_) => "ptr",
            Kind::Interface => "interface",
            Kind::MarshalJson(_) => "marshal_json",
            Kind::MarshalText(_) => "marshal_text",
            Kind::Unsupported => "unsupported",
        }
    }
}

pub struct TypeDesc {
    pub name: fn() -> &'static str,
    pub size: usize,
    pub id: fn() -> TypeId,
    pub kind: Kind,
}

impl TypeDesc {
    pub const fn of<T: 'static>(kind: Kind) -> TypeDesc {
        TypeDesc {
            name: std::any::type_name::<T>,
            size: size_of::<T>(),
            id: type_id_of::<T>,
            kind,
        }
    }

    pub fn type_name(&self) -> &'static str {
        (self.name)()
    }

    pub fn type_id(&self) -> TypeId {
        (self.id)()
    }

    /// True for `Vec<u8>`-like slices, which encode as base64.
    pub fn is_bytes(&self) -> bool {
        match self.kind {
            Kind::Slice(seq) => matches!((seq.elem)().kind, Kind::Uint(Width::W8)),
            _ => false,
        }
    }
}

impl fmt::Debug for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDesc")
            .field("name", &self.type_name())
            .field("kind", &self.kind.name())
            .field("size", &self.size)
            .finish()
    }
}

/// One declared struct field.
#[derive(Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub offset: usize,
    pub desc: DescFn,
    pub tag: &'static str,
}

impl Field {
    pub const fn new(name: &'static str, offset: usize, desc: DescFn, tag: &'static str) -> Field {
        Field { name, offset, desc, tag }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("offset", &self.offset)
            .field("type", &(self.desc)().type_name())
            .field("tag", &self.tag)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn width_masks() {
        assert_eq!(Width::W8.mask(), 0xff);
        assert_eq!(Width::W32.mask(), 0xffff_ffff);
        assert_eq!(Width::W64.mask(), u64::MAX);
        assert_eq!(Width::WORD.bytes(), size_of::<usize>());
    }

    #[test]
    fn bytes_detection() {
        assert!(<Vec<u8>>::DESC.is_bytes());
        assert!(!<Vec<i8>>::DESC.is_bytes());
        assert!(!<Vec<String>>::DESC.is_bytes());
        assert!(!<[u8; 4]>::DESC.is_bytes());
    }

    #[test]
    fn descriptors_carry_identity() {
        let d = <BTreeMap<String, i32>>::DESC;
        assert_eq!(d.type_id(), TypeId::of::<BTreeMap<String, i32>>());
        assert_eq!(d.kind.name(), "map");
        assert_eq!(d.size, size_of::<BTreeMap<String, i32>>());
    }

    #[repr(transparent)]
    struct Celsius(f64);

    // SAFETY: a transparent newtype has the layout of its `f64`.
    unsafe impl Describe for Celsius {
        const DESC: &'static TypeDesc = &const { TypeDesc::of::<Celsius>(Kind::F64) };
    }

    #[test]
    fn hand_written_descriptor_encodes() {
        assert_eq!(Celsius::DESC.size, size_of::<f64>());
        assert_eq!(crate::marshal(&Celsius(21.5)).unwrap(), b"21.5");
    }
}

//! A JSON encoder that compiles each Rust type into an opcode program and
//! runs it in a single dispatch loop.
//!
//! Types opt in through [`Describe`], usually via [`describe_struct!`]:
//!
//! ```
//! use jsonvm::describe_struct;
//!
//! struct User { id: u64, name: String, email: Option<String> }
//! describe_struct!(User {
//!     id: u64 = "id",
//!     name: String = "name",
//!     email: Option<String> = "email,omitempty",
//! });
//!
//! let u = User { id: 7, name: "Ada".into(), email: None };
//! assert_eq!(jsonvm::marshal(&u).unwrap(), br#"{"id":7,"name":"Ada"}"#);
//! ```
//!
//! The first encode of a type compiles its program; later encodes reuse it
//! from a process-wide cache.

pub mod color;
mod encode;
pub mod error;
pub mod options;
pub mod query;
pub mod types;
mod vm;

use std::io;

pub use color::{ColorFormat, ColorScheme};
pub use error::{BoxError, EncodeError, ErrorKind};
pub use options::EncodeOptions;
pub use query::FieldQuery;
pub use types::{
    Describe, Dyn, Dynamic, Field, Kind, MarshalJson, MarshalText, Number, TypeDesc, Width, desc_of,
    marshal_json_adapter, marshal_text_adapter,
};
pub use vm::{FieldOp, Leaf, Op, Opcode, Program, register_types};

/// Encodes `v` with HTML escaping and sorted map keys.
pub fn marshal<T: Describe>(v: &T) -> Result<Vec<u8>, EncodeError> {
    marshal_with_options(v, &EncodeOptions::default())
}

/// Like [`marshal`], leaving `<`, `>` and `&` as they are.
pub fn marshal_no_escape<T: Describe>(v: &T) -> Result<Vec<u8>, EncodeError> {
    marshal_with_options(v, &EncodeOptions::new().disable_html_escape())
}

/// Encodes `v` with each element on its own line, starting with `prefix`
/// and indented by one `indent` per nesting level.
pub fn marshal_indent<T: Describe>(v: &T, prefix: &str, indent: &str) -> Result<Vec<u8>, EncodeError> {
    marshal_with_options(v, &EncodeOptions::new().indent(prefix, indent))
}

pub fn marshal_with_options<T: Describe>(v: &T, opts: &EncodeOptions) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    encode_into(&mut out, v, opts)?;
    Ok(out)
}

/// Appends the encoding of `v` to `out`. On error `out` is left unchanged.
pub fn encode_into<T: Describe>(out: &mut Vec<u8>, v: &T, opts: &EncodeOptions) -> Result<(), EncodeError> {
    // SAFETY: `v` is a live `T` for the whole call and `T::DESC` describes `T`.
    unsafe { vm::encode(T::DESC, v as *const T as *const u8, opts, out) }
}

/// Compiles and caches the program for `T` ahead of the first encode.
pub fn compile<T: Describe>() -> Result<&'static Program, EncodeError> {
    vm::program(T::DESC, None)
}

/// Compiles and caches the program for a descriptor known only at run time,
/// such as the dynamic type behind a [`Dyn`].
pub fn compile_desc(desc: &'static TypeDesc) -> Result<&'static Program, EncodeError> {
    vm::program(desc, None)
}

/// Writes one JSON value per [`encode`](Encoder::encode) call, each followed
/// by a newline.
pub struct Encoder<W: io::Write> {
    w: W,
    opts: EncodeOptions,
    buf: Vec<u8>,
}

impl<W: io::Write> Encoder<W> {
    pub fn new(w: W) -> Self {
        Encoder {
            w,
            opts: EncodeOptions::default(),
            buf: Vec::new(),
        }
    }

    pub fn set_escape_html(&mut self, on: bool) {
        self.opts.escape_html = on;
    }

    pub fn set_indent(&mut self, prefix: &str, indent: &str) {
        self.opts.indent_prefix = prefix.to_string();
        self.opts.indent_unit = indent.to_string();
    }

    pub fn set_options(&mut self, opts: EncodeOptions) {
        self.opts = opts;
    }

    pub fn options(&self) -> &EncodeOptions {
        &self.opts
    }

    pub fn encode<T: Describe>(&mut self, v: &T) -> Result<(), EncodeError> {
        self.buf.clear();
        encode_into(&mut self.buf, v, &self.opts)?;
        self.buf.push(b'\n');
        self.w.write_all(&self.buf)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.w
    }
}

//! Compiled encoders: per-type opcode programs, their cache, and the loop
//! that runs them.

mod cache;
mod compiler;
mod context;
mod exec;
mod opcode;

use log::error;

use crate::color::ColorScheme;
use crate::error::EncodeError;
use crate::options::EncodeOptions;
use crate::types::TypeDesc;

use context::{PooledContext, RuntimeContext};
use exec::Emitter;

pub use cache::register_types;
pub use opcode::{FieldOp, Leaf, Op, Opcode, Program};

pub(crate) use cache::program;

/// Frames entered before the seen set is consulted.
pub(crate) const START_DETECTING_CYCLES_AFTER: usize = 1000;

static PLAIN: ColorScheme = ColorScheme::PLAIN;

/// Encodes the value at `p` and appends it to `out`.
///
/// # Safety
/// `p` must point to a live value of the type `desc` describes, valid for
/// the whole call.
pub(crate) unsafe fn encode(
    desc: &'static TypeDesc,
    p: *const u8,
    opts: &EncodeOptions,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    let query = opts.field_query.as_ref().map(|q| q.compile()).filter(|q| !q.is_leaf());
    let program = cache::program(desc, query.as_ref())?;
    let mut ctx = PooledContext::acquire();
    match unsafe { execute(&mut ctx, program, p, opts) } {
        Ok(()) => {
            out.extend_from_slice(&ctx.buf);
            Ok(())
        }
        Err(e) => {
            if opts.debug {
                error!("encoding {} failed: {e}\n{program}", desc.type_name());
            }
            Err(e)
        }
    }
}

fn emitter<'a, const HTML: bool, const INDENT: bool, const COLOR: bool>(
    opts: &'a EncodeOptions,
    colors: &'a ColorScheme,
) -> Emitter<'a, HTML, INDENT, COLOR> {
    let sep_len = if COLOR {
        colors.comma.header.len() + 1 + colors.comma.footer.len()
    } else {
        1
    };
    Emitter {
        prefix: opts.indent_prefix.as_bytes(),
        unit: opts.indent_unit.as_bytes(),
        colors,
        sep_len,
        line_sep: opts.escape_line_separators,
        strict: opts.strict_utf8,
        ordered: !opts.unordered_map,
    }
}

/// Picks the loop flavor for `opts` and runs `program`.
///
/// # Safety
/// Same contract as [`encode`].
unsafe fn execute(
    ctx: &mut RuntimeContext,
    program: &'static Program,
    p: *const u8,
    opts: &EncodeOptions,
) -> Result<(), EncodeError> {
    let colors = opts.colorize.as_ref().unwrap_or(&PLAIN);
    macro_rules! run {
        ($html:literal, $indent:literal, $color:literal) => {
            unsafe { exec::run(&emitter::<$html, $indent, $color>(opts, colors), ctx, program, p) }
        };
    }
    match (opts.escape_html, opts.is_indented(), opts.colorize.is_some()) {
        (true, false, false) => run!(true, false, false),
        (true, false, true) => run!(true, false, true),
        (true, true, false) => run!(true, true, false),
        (true, true, true) => run!(true, true, true),
        (false, false, false) => run!(false, false, false),
        (false, false, true) => run!(false, false, true),
        (false, true, false) => run!(false, true, false),
        (false, true, true) => run!(false, true, true),
    }
}

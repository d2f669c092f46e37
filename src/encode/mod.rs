//! Leaf formatters shared by every VM flavor.

pub(crate) mod compact;
pub(crate) mod number;
pub(crate) mod string;

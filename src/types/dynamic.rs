use std::fmt;
use std::sync::Arc;

use super::{Describe, TypeDesc};

/// Object-safe view of a [`Describe`] type.
///
/// # Safety
///
/// `type_desc` must return a descriptor of the concrete `Self` type, under
/// the same contract as [`Describe::DESC`].
pub unsafe trait Dynamic: Send + Sync + 'static {
    fn type_desc(&self) -> &'static TypeDesc;
}

// SAFETY: `T::DESC` describes `T` by the `Describe` contract.
unsafe impl<T: Describe + Send + Sync> Dynamic for T {
    fn type_desc(&self) -> &'static TypeDesc {
        T::DESC
    }
}

/// An interface value: any describable type, or null.
///
/// The encoder resolves the dynamic type at run time and compiles a program
/// for it on first sight.
#[derive(Clone, Default)]
pub struct Dyn(Option<Arc<dyn Dynamic>>);

impl Dyn {
    pub fn new<T: Describe + Send + Sync>(value: T) -> Dyn {
        Dyn(Some(Arc::new(value) as Arc<dyn Dynamic>))
    }

    pub fn shared<T: Describe + Send + Sync>(value: Arc<T>) -> Dyn {
        Dyn(Some(value as Arc<dyn Dynamic>))
    }

    pub const fn null() -> Dyn {
        Dyn(None)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub fn type_desc(&self) -> Option<&'static TypeDesc> {
        self.0.as_ref().map(|v| v.type_desc())
    }

    /// Dynamic type and data address, or `None` for null.
    pub(crate) fn parts(&self) -> Option<(&'static TypeDesc, *const u8)> {
        self.0
            .as_ref()
            .map(|v| (v.type_desc(), Arc::as_ptr(v) as *const u8))
    }
}

impl fmt::Debug for Dyn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.type_desc() {
            Some(d) => write!(f, "Dyn({})", d.type_name()),
            None => f.write_str("Dyn(null)"),
        }
    }
}

/// Implements [`Describe`](crate::Describe) for a struct, listing its
/// encoded fields in declaration order with an optional tag each.
///
/// ```
/// use jsonvm::describe_struct;
///
/// struct Point { x: i64, y: Option<i64>, label: String }
///
/// describe_struct!(Point {
///     x: i64 = "x",
///     y: Option<i64> = "y,omitempty",
///     label: String,
/// });
///
/// let p = Point { x: 1, y: None, label: "a".into() };
/// assert_eq!(jsonvm::marshal(&p).unwrap(), br#"{"x":1,"label":"a"}"#);
/// ```
///
/// Tag grammar follows the usual JSON struct tags: a key, then options
/// `omitempty`, `string` and `embed` (promote the fields of an embedded
/// struct). `"-"` skips the field.
#[macro_export]
macro_rules! describe_struct {
    ($ty:ident { $($field:ident : $fty:ty $(= $tag:literal)?),* $(,)? }) => {
        unsafe impl $crate::Describe for $ty {
            const DESC: &'static $crate::TypeDesc = {
                const FIELDS: &'static [$crate::Field] = &[
                    $($crate::Field::new(
                        stringify!($field),
                        ::core::mem::offset_of!($ty, $field),
                        $crate::desc_of::<$fty>,
                        $crate::describe_struct!(@tag $($tag)?),
                    ),)*
                ];
                const STRUCT: $crate::TypeDesc = $crate::TypeDesc::of::<$ty>($crate::Kind::Struct(FIELDS));
                &STRUCT
            };
        }
    };
    (@tag) => { "" };
    (@tag $tag:literal) => { $tag };
}

/// Describes types that encode themselves through [`MarshalJson`](crate::MarshalJson).
#[macro_export]
macro_rules! describe_marshal_json {
    ($($ty:ty),+ $(,)?) => {
        $(unsafe impl $crate::Describe for $ty {
            const DESC: &'static $crate::TypeDesc = &const {
                $crate::TypeDesc::of::<$ty>($crate::Kind::MarshalJson($crate::marshal_json_adapter::<$ty>))
            };
        })+
    };
}

/// Describes types that encode as a JSON string through [`MarshalText`](crate::MarshalText).
#[macro_export]
macro_rules! describe_marshal_text {
    ($($ty:ty),+ $(,)?) => {
        $(unsafe impl $crate::Describe for $ty {
            const DESC: &'static $crate::TypeDesc = &const {
                $crate::TypeDesc::of::<$ty>($crate::Kind::MarshalText($crate::marshal_text_adapter::<$ty>))
            };
        })+
    };
}

/// Marks types that have no JSON encoding; encoding them fails with
/// `unsupported-type`.
#[macro_export]
macro_rules! describe_unsupported {
    ($($ty:ty),+ $(,)?) => {
        $(unsafe impl $crate::Describe for $ty {
            const DESC: &'static $crate::TypeDesc =
                &const { $crate::TypeDesc::of::<$ty>($crate::Kind::Unsupported) };
        })+
    };
}

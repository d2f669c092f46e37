use serde::{Deserialize, Serialize};

/// Bytes written around one kind of token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorFormat {
    pub header: String,
    pub footer: String,
}

impl ColorFormat {
    pub const NONE: ColorFormat = ColorFormat { header: String::new(), footer: String::new() };

    pub fn ansi(code: &str) -> ColorFormat {
        ColorFormat {
            header: format!("\x1b[{code}m"),
            footer: "\x1b[0m".to_string(),
        }
    }
}

/// Per-token colors for colorized output. Colors only wrap tokens, so the
/// output without the escape sequences is the plain encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorScheme {
    pub int: ColorFormat,
    pub uint: ColorFormat,
    pub float: ColorFormat,
    pub string: ColorFormat,
    pub bool: ColorFormat,
    pub null: ColorFormat,
    pub binary: ColorFormat,
    pub object_key: ColorFormat,
    pub object_start: ColorFormat,
    pub object_end: ColorFormat,
    pub array_start: ColorFormat,
    pub array_end: ColorFormat,
    pub colon: ColorFormat,
    pub comma: ColorFormat,
}

impl ColorScheme {
    /// A scheme that writes nothing around any token.
    pub const PLAIN: ColorScheme = ColorScheme {
        int: ColorFormat::NONE,
        uint: ColorFormat::NONE,
        float: ColorFormat::NONE,
        string: ColorFormat::NONE,
        bool: ColorFormat::NONE,
        null: ColorFormat::NONE,
        binary: ColorFormat::NONE,
        object_key: ColorFormat::NONE,
        object_start: ColorFormat::NONE,
        object_end: ColorFormat::NONE,
        array_start: ColorFormat::NONE,
        array_end: ColorFormat::NONE,
        colon: ColorFormat::NONE,
        comma: ColorFormat::NONE,
    };

    pub(crate) fn format(&self, token: Token) -> &ColorFormat {
        match token {
            Token::Int => &self.int,
            Token::Uint => &self.uint,
            Token::Float => &self.float,
            Token::String => &self.string,
            Token::Bool => &self.bool,
            Token::Null => &self.null,
            Token::Binary => &self.binary,
            Token::ObjectKey => &self.object_key,
            Token::ObjectStart => &self.object_start,
            Token::ObjectEnd => &self.object_end,
            Token::ArrayStart => &self.array_start,
            Token::ArrayEnd => &self.array_end,
            Token::Colon => &self.colon,
            Token::Comma => &self.comma,
        }
    }
}

impl Default for ColorScheme {
    fn default() -> Self {
        ColorScheme {
            int: ColorFormat::ansi("36"),
            uint: ColorFormat::ansi("36"),
            float: ColorFormat::ansi("36"),
            string: ColorFormat::ansi("32"),
            bool: ColorFormat::ansi("33"),
            null: ColorFormat::ansi("2"),
            binary: ColorFormat::ansi("31"),
            object_key: ColorFormat::ansi("1;34"),
            ..ColorScheme::PLAIN
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Token {
    Int,
    Uint,
    Float,
    String,
    Bool,
    Null,
    Binary,
    ObjectKey,
    ObjectStart,
    ObjectEnd,
    ArrayStart,
    ArrayEnd,
    Colon,
    Comma,
}

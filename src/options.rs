use serde::{Deserialize, Serialize};

use crate::color::ColorScheme;
use crate::query::FieldQuery;

/// Options recognized by the encode entry points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    /// Escape `<`, `>` and `&` inside strings.
    pub escape_html: bool,
    pub indent_prefix: String,
    pub indent_unit: String,
    /// Emit map entries in iteration order instead of sorted by key.
    pub unordered_map: bool,
    pub colorize: Option<ColorScheme>,
    pub field_query: Option<FieldQuery>,
    /// Fail on invalid UTF-8 instead of writing U+FFFD.
    pub strict_utf8: bool,
    /// Escape U+2028 and U+2029.
    pub escape_line_separators: bool,
    /// Log the compiled program when an encode fails.
    pub debug: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            escape_html: true,
            indent_prefix: String::new(),
            indent_unit: String::new(),
            unordered_map: false,
            colorize: None,
            field_query: None,
            strict_utf8: false,
            escape_line_separators: false,
            debug: false,
        }
    }
}

impl EncodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disable_html_escape(mut self) -> Self {
        self.escape_html = false;
        self
    }

    pub fn indent(mut self, prefix: impl Into<String>, unit: impl Into<String>) -> Self {
        self.indent_prefix = prefix.into();
        self.indent_unit = unit.into();
        self
    }

    pub fn unordered_map(mut self) -> Self {
        self.unordered_map = true;
        self
    }

    pub fn colorize(mut self, scheme: ColorScheme) -> Self {
        self.colorize = Some(scheme);
        self
    }

    pub fn field_query(mut self, query: FieldQuery) -> Self {
        self.field_query = Some(query);
        self
    }

    pub fn strict_utf8(mut self) -> Self {
        self.strict_utf8 = true;
        self
    }

    pub fn escape_line_separators(mut self) -> Self {
        self.escape_line_separators = true;
        self
    }

    pub fn debug(mut self) -> Self {
        self.debug = true;
        self
    }

    pub fn is_indented(&self) -> bool {
        !self.indent_prefix.is_empty() || !self.indent_unit.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_escape_html_and_sort_maps() {
        let o = EncodeOptions::default();
        assert!(o.escape_html);
        assert!(!o.unordered_map);
        assert!(!o.is_indented());
    }

    #[test]
    fn builder_chains() {
        let o = EncodeOptions::new().disable_html_escape().indent("", "  ").unordered_map();
        assert!(!o.escape_html);
        assert!(o.is_indented());
        assert!(o.unordered_map);
    }

    #[test]
    fn loads_from_partial_json() {
        let o: EncodeOptions = serde_json::from_str(r#"{"indent_unit":"\t","escape_html":false}"#).unwrap();
        assert_eq!(o.indent_unit, "\t");
        assert!(!o.escape_html);
        assert!(o.colorize.is_none());
    }
}

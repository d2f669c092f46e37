//! Field tag grammar: `"key,opt1,opt2"`, `"-"` to skip, `"-,"` for the key `-`.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FieldTag {
    pub key: Option<&'static str>,
    pub omit_empty: bool,
    pub quoted: bool,
    pub ignore: bool,
    pub embed: bool,
}

impl FieldTag {
    pub fn parse(tag: &'static str) -> FieldTag {
        if tag == "-" {
            return FieldTag { ignore: true, ..FieldTag::default() };
        }
        let mut parts = tag.split(',');
        let name = parts.next().unwrap_or("");
        let mut out = FieldTag {
            key: is_valid_key(name).then_some(name),
            ..FieldTag::default()
        };
        for opt in parts {
            match opt {
                "omitempty" => out.omit_empty = true,
                "string" => out.quoted = true,
                "embed" => out.embed = true,
                _ => {}
            }
        }
        out
    }

    pub fn is_named(&self) -> bool {
        self.key.is_some()
    }
}

fn is_valid_key(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    s.chars().all(|c| {
        "!#$%&()*+-./:;<=>?@[]^_{|}~ ".contains(c) || c.is_alphabetic() || c.is_numeric()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_and_options() {
        let t = FieldTag::parse("id,omitempty,string");
        assert_eq!(t.key, Some("id"));
        assert!(t.omit_empty && t.quoted && !t.ignore);
    }

    #[test]
    fn dash_skips_but_dash_comma_names() {
        assert!(FieldTag::parse("-").ignore);
        let t = FieldTag::parse("-,");
        assert!(!t.ignore);
        assert_eq!(t.key, Some("-"));
    }

    #[test]
    fn empty_or_invalid_key_falls_back() {
        assert_eq!(FieldTag::parse(",omitempty").key, None);
        assert_eq!(FieldTag::parse("").key, None);
        assert_eq!(FieldTag::parse("bad\"key").key, None);
        assert_eq!(FieldTag::parse("naïve key").key, Some("naïve key"));
    }

    #[test]
    fn embed_option() {
        let t = FieldTag::parse(",embed");
        assert!(t.embed);
        assert!(!t.is_named());
    }
}

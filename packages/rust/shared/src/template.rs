//! Prompt template rendering.
//!
//! Templates are opaque UTF-8 text with `{NAME}` placeholders. Names may
//! contain spaces (`{DISTRIBUTION FINDINGS}`). Rendering is a single uniform
//! contract: substitute from a named-field context, defaulting unknown
//! placeholders to the empty string.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

/// Placeholder pattern: a brace-delimited field name. The character class is
/// deliberately narrow so literal JSON braces in a template survive.
fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z][A-Za-z0-9 _&/-]*)\}").expect("valid regex"))
}

/// Render `template` against `context`, replacing every `{NAME}` placeholder
/// with the context value for `NAME`, or `""` when the field is unknown.
pub fn render(template: &str, context: &HashMap<String, String>) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            context
                .get(&caps[1])
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_known_placeholders() {
        let out = render(
            "Company: {COMPANY}\nSite: {URL}",
            &ctx(&[("COMPANY", "Acme Foods"), ("URL", "https://acme.test")]),
        );
        assert_eq!(out, "Company: Acme Foods\nSite: https://acme.test");
    }

    #[test]
    fn unknown_placeholders_render_empty() {
        let out = render("Before {MISSING FIELD} after", &ctx(&[]));
        assert_eq!(out, "Before  after");
    }

    #[test]
    fn multi_word_and_punctuated_names() {
        let out = render(
            "{DISTRIBUTION FINDINGS} / {PHONE NUMBERS & EMAILS}",
            &ctx(&[
                ("DISTRIBUTION FINDINGS", "regional"),
                ("PHONE NUMBERS & EMAILS", "none listed"),
            ]),
        );
        assert_eq!(out, "regional / none listed");
    }

    #[test]
    fn json_braces_survive() {
        let template = r#"Respond as {"score": <n>} for {COMPANY}."#;
        let out = render(template, &ctx(&[("COMPANY", "Acme")]));
        assert_eq!(out, r#"Respond as {"score": <n>} for Acme."#);
    }

    #[test]
    fn values_are_trimmed() {
        let out = render("[{URL}]", &ctx(&[("URL", "  https://acme.test  ")]));
        assert_eq!(out, "[https://acme.test]");
    }
}

use std::fmt;
use std::sync::LazyLock;

use onig::Regex;

use crate::grammars::compiled::RuleId;
use crate::tokenizer::AnchorActive;

static BACK_REFERENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\(\d+)").expect("Invalid back reference regex"));

/// `$1` or `${1:/downcase}` in rule names
static CAPTURE_REFERENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(\d+)|\$\{(\d+):\/(downcase|upcase)\}").expect("Invalid capture reference regex")
});

/// Captured text inserted in a regex must match literally
fn escape_regex_characters(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_whitespace() || "-\\{}*+?|^$.,[]()#".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn captured_text<'a>(
    line: &'a str,
    captures: &[Option<(usize, usize)>],
    index: usize,
) -> Option<&'a str> {
    captures
        .get(index)
        .map(|pos| pos.and_then(|(start, end)| line.get(start..end)).unwrap_or(""))
}

pub(crate) fn has_capture_references(template: &str) -> bool {
    CAPTURE_REFERENCE_REGEX.find(template).is_some()
}

/// Resolves `$n`/`${n:/upcase}` in a scope name with the text of capture `n` of `line`.
/// References to captures that don't exist are kept as is.
pub(crate) fn replace_capture_references(
    template: &str,
    line: &str,
    captures: &[Option<(usize, usize)>],
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut last_end = 0;

    for caps in CAPTURE_REFERENCE_REGEX.captures_iter(template) {
        let Some((start, end)) = caps.pos(0) else {
            continue;
        };
        out.push_str(&template[last_end..start]);
        last_end = end;

        let index = caps
            .at(1)
            .or_else(|| caps.at(2))
            .and_then(|i| i.parse::<usize>().ok());
        let Some(text) = index.and_then(|i| captured_text(line, captures, i)) else {
            out.push_str(&template[start..end]);
            continue;
        };

        let text = text.trim_start_matches('.');
        match caps.at(3) {
            Some("downcase") => out.push_str(&text.to_lowercase()),
            Some("upcase") => out.push_str(&text.to_uppercase()),
            _ => out.push_str(text),
        }
    }

    out.push_str(&template[last_end..]);
    out
}

/// A regex as written in a grammar, with the rewrites needed before handing it to the
/// regex engine.
#[derive(Clone)]
pub struct RegexSource {
    source: String,
    rule_id: RuleId,
    has_anchor: bool,
    has_back_references: bool,
    /// The source for each anchor variant, indexed by [`AnchorActive::index`]
    anchor_cache: Option<[String; 4]>,
}

impl RegexSource {
    pub fn new(source: &str, rule_id: RuleId) -> Self {
        let mut has_anchor = false;
        let mut rewritten = String::with_capacity(source.len());
        let mut chars = source.chars();

        while let Some(c) = chars.next() {
            if c != '\\' {
                rewritten.push(c);
                continue;
            }
            match chars.next() {
                // `\z` isn't supported everywhere, this is the same thing without the final \n
                Some('z') => rewritten.push_str("$(?!\\n)(?<!\\n)"),
                Some(next) => {
                    if next == 'A' || next == 'G' {
                        has_anchor = true;
                    }
                    rewritten.push('\\');
                    rewritten.push(next);
                }
                None => rewritten.push('\\'),
            }
        }

        let mut regex_source = Self {
            has_back_references: BACK_REFERENCE_REGEX.find(&rewritten).is_some(),
            source: rewritten,
            rule_id,
            has_anchor,
            anchor_cache: None,
        };
        regex_source.build_anchor_cache();
        regex_source
    }

    fn build_anchor_cache(&mut self) {
        self.anchor_cache = if self.has_anchor {
            Some([
                AnchorActive::None.replace_anchors(&self.source),
                AnchorActive::A.replace_anchors(&self.source),
                AnchorActive::G.replace_anchors(&self.source),
                AnchorActive::AG.replace_anchors(&self.source),
            ])
        } else {
            None
        };
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn rule_id(&self) -> RuleId {
        self.rule_id
    }

    pub fn has_anchor(&self) -> bool {
        self.has_anchor
    }

    pub fn has_back_references(&self) -> bool {
        self.has_back_references
    }

    /// Replaces the source, eg with an end pattern whose back references were resolved.
    /// Returns whether anything changed.
    pub(crate) fn set_source(&mut self, source: &str) -> bool {
        if self.source == source {
            return false;
        }
        self.source = source.to_owned();
        if self.has_anchor {
            self.build_anchor_cache();
        }
        true
    }

    /// Replaces `\1`, `\2`... with the escaped text captured by the begin pattern
    pub fn resolve_back_references(&self, line: &str, captures: &[Option<(usize, usize)>]) -> String {
        let mut out = String::with_capacity(self.source.len());
        let mut last_end = 0;

        for caps in BACK_REFERENCE_REGEX.captures_iter(&self.source) {
            let Some((start, end)) = caps.pos(0) else {
                continue;
            };
            out.push_str(&self.source[last_end..start]);
            last_end = end;

            let text = caps
                .at(1)
                .and_then(|i| i.parse::<usize>().ok())
                .and_then(|i| captured_text(line, captures, i))
                .unwrap_or("");
            out.push_str(&escape_regex_characters(text));
        }

        out.push_str(&self.source[last_end..]);
        out
    }

    /// The source to compile for the given anchor variant
    pub(crate) fn resolve_anchors(&self, anchors: AnchorActive) -> &str {
        match &self.anchor_cache {
            Some(cache) => &cache[anchors.index()],
            None => &self.source,
        }
    }
}

impl fmt::Debug for RegexSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrites() {
        let source = RegexSource::new(r"foo\z", RuleId(1));
        assert_eq!(source.source(), r"foo$(?!\n)(?<!\n)");
        assert!(!source.has_anchor());

        let source = RegexSource::new(r"\\z\Gbar", RuleId(1));
        assert_eq!(source.source(), r"\\z\Gbar");
        assert!(source.has_anchor());
        assert_eq!(source.resolve_anchors(AnchorActive::G), r"\\z\Gbar");
        assert_eq!(source.resolve_anchors(AnchorActive::A), "\\\\z\\\u{FFFF}bar");

        let source = RegexSource::new(r"plain", RuleId(1));
        assert_eq!(source.resolve_anchors(AnchorActive::None), "plain");
    }

    #[test]
    fn test_back_references() {
        let line = "<<EOF.sql here";
        // 0: whole match, 1: `EOF.sql`, 2: didn't participate
        let captures = vec![Some((0, 9)), Some((2, 9)), None];

        let test_cases = vec![
            (r"^\1$", true, r"^EOF\.sql$"),
            (r"\2end", true, "end"),
            (r"\9", true, ""),
            (r"\\w+", false, r"\\w+"),
        ];

        for (input, has_back_references, expected) in test_cases {
            let source = RegexSource::new(input, RuleId(1));
            assert_eq!(source.has_back_references(), has_back_references, "{input}");
            assert_eq!(source.resolve_back_references(line, &captures), expected, "{input}");
        }

        assert_eq!(escape_regex_characters("a b(c)"), r"a\ b\(c\)");
    }

    #[test]
    fn test_set_source() {
        let mut source = RegexSource::new(r"\1\G", RuleId(1));
        assert!(!source.set_source(r"\1\G"));
        assert!(source.set_source(r"x\G"));
        assert_eq!(source.resolve_anchors(AnchorActive::None), "x\\\u{FFFF}");
    }

    #[test]
    fn test_capture_references_in_names() {
        let line = "def .Foo bar";
        let captures = vec![Some((0, 12)), Some((4, 8)), None];

        let test_cases = vec![
            ("entity.name.$1", "entity.name.Foo"),
            ("entity.${1:/downcase}.x", "entity.foo.x"),
            ("entity.${1:/upcase}", "entity.FOO"),
            ("missing.$2", "missing."),
            ("out.of.range.$5", "out.of.range.$5"),
            ("no.reference", "no.reference"),
        ];

        for (template, expected) in test_cases {
            assert_eq!(replace_capture_references(template, line, &captures), expected);
        }
        assert!(has_capture_references("a.$1"));
        assert!(!has_capture_references("a.b"));
    }
}

use std::fmt;

/// Conveys which anchors should be active in regexes. We don't want to enable `\A` or `\G`
/// everywhere, it's context dependent: `\A` only on the first line of a document and `\G`
/// only where the previous rule stopped.
#[derive(Copy, Clone, PartialEq, Hash, Eq)]
pub enum AnchorActive {
    /// Only \A is active
    A,
    /// Only \G is active
    G,
    /// Both \A and \G are active
    AG,
    /// Neither \A nor \G are active
    None,
}

impl AnchorActive {
    pub fn new(allow_a: bool, allow_g: bool) -> Self {
        match (allow_a, allow_g) {
            (true, true) => AnchorActive::AG,
            (true, false) => AnchorActive::A,
            (false, true) => AnchorActive::G,
            (false, false) => AnchorActive::None,
        }
    }

    pub fn allows_a(self) -> bool {
        matches!(self, AnchorActive::A | AnchorActive::AG)
    }

    pub fn allows_g(self) -> bool {
        matches!(self, AnchorActive::G | AnchorActive::AG)
    }

    /// Index in per-variant caches
    pub(crate) fn index(self) -> usize {
        match self {
            AnchorActive::None => 0,
            AnchorActive::A => 1,
            AnchorActive::G => 2,
            AnchorActive::AG => 3,
        }
    }

    /// Replaces the letter of disabled anchors with `\u{FFFF}`, turning `\A` into an escaped
    /// character that is very unlikely to ever match.
    /// Escaped backslashes are skipped so `\\A` is left alone.
    pub fn replace_anchors(self, pat: &str) -> String {
        let mut out = String::with_capacity(pat.len() + 2);
        let mut chars = pat.chars();

        while let Some(c) = chars.next() {
            out.push(c);
            if c != '\\' {
                continue;
            }
            let Some(next) = chars.next() else {
                break;
            };
            match next {
                'A' if !self.allows_a() => out.push('\u{FFFF}'),
                'G' if !self.allows_g() => out.push('\u{FFFF}'),
                _ => out.push(next),
            }
        }

        out
    }
}

impl fmt::Debug for AnchorActive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnchorActive::A => "allow_A=true, allow_G=false",
            AnchorActive::G => "allow_A=false, allow_G=true",
            AnchorActive::AG => "allow_A=true, allow_G=true",
            AnchorActive::None => "allow_A=false, allow_G=false",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_anchors() {
        let test_cases = vec![
            (AnchorActive::AG, r"\A\Gfoo", r"\A\Gfoo"),
            (AnchorActive::A, r"\A\Gfoo", "\\A\\\u{FFFF}foo"),
            (AnchorActive::G, r"\A\Gfoo", "\\\u{FFFF}\\Gfoo"),
            (AnchorActive::None, r"\A\Gfoo", "\\\u{FFFF}\\\u{FFFF}foo"),
            // escaped backslash followed by a literal G
            (AnchorActive::None, r"\\G", r"\\G"),
            (AnchorActive::None, r"a\", r"a\"),
        ];

        for (anchors, input, expected) in test_cases {
            assert_eq!(anchors.replace_anchors(input), expected, "{anchors:?} on {input}");
        }
    }

    #[test]
    fn test_variants() {
        assert_eq!(AnchorActive::new(true, false), AnchorActive::A);
        assert_eq!(AnchorActive::new(false, true), AnchorActive::G);
        assert!(AnchorActive::new(true, true).allows_g());
        assert!(!AnchorActive::new(false, false).allows_a());
    }
}

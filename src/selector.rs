//! Scope selector parsing and matching.
//!
//! Selectors are used for injections, token type overrides and balanced bracket detection.
//! The grammar is small:
//!
//! - `source.js meta.function`: every identifier must match a scope, in order
//! - `a, b` or `(a | b)`: either side
//! - `-comment`: negation
//! - `L:`/`R:`/`B:` before a selector: priority of an injection

use std::sync::LazyLock;

use onig::Regex;

/// Regex for tokenizing selectors, same as vscode-textmate plus the `B:` prefix
static TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([LRB]:|[\w.:][\w.:\-]*|[,|\-()])").expect("Invalid selector regex")
});

/// Where an injection is tried relative to the rules of the grammar it's injected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    /// `L:`, wins ties against the normal rules
    Left,
    /// No prefix or `B:`
    #[default]
    Default,
    /// `R:`
    Right,
}

impl Priority {
    /// Sort key: -1, 0 or 1
    pub fn value(self) -> i8 {
        match self {
            Priority::Left => -1,
            Priority::Default => 0,
            Priority::Right => 1,
        }
    }
}

/// A parsed selector that can be evaluated against the scope names of a stack,
/// outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// Result of an expression we could not make sense of: never matches
    Never,
    /// Space separated identifiers, each must match a scope after the previous one
    Path(Vec<String>),
    And(Vec<Matcher>),
    Or(Vec<Matcher>),
    Not(Box<Matcher>),
}

impl Matcher {
    pub fn matches<S: AsRef<str>>(&self, scopes: &[S]) -> bool {
        match self {
            Matcher::Never => false,
            Matcher::Path(identifiers) => path_matches(identifiers, scopes),
            Matcher::And(matchers) => matchers.iter().all(|m| m.matches(scopes)),
            Matcher::Or(matchers) => matchers.iter().any(|m| m.matches(scopes)),
            Matcher::Not(matcher) => !matcher.matches(scopes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatcherWithPriority {
    pub matcher: Matcher,
    pub priority: Priority,
}

/// `scope` is `identifier` or a child of it, eg `string.quoted` matches `string`
/// but `stringy` doesn't.
pub(crate) fn scopes_are_matching(scope: &str, identifier: &str) -> bool {
    match scope.strip_prefix(identifier) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

fn path_matches<S: AsRef<str>>(identifiers: &[String], scopes: &[S]) -> bool {
    if scopes.len() < identifiers.len() {
        return false;
    }

    let mut cursor = 0;
    identifiers.iter().all(|identifier| {
        for (i, scope) in scopes.iter().enumerate().skip(cursor) {
            if scopes_are_matching(scope.as_ref(), identifier) {
                cursor = i + 1;
                return true;
            }
        }
        false
    })
}

fn is_identifier(token: &str) -> bool {
    token
        .chars()
        .any(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == ':')
}

fn is_or_separator(token: Option<&str>) -> bool {
    matches!(token, Some("|" | ","))
}

struct SelectorParser<'a> {
    tokens: Vec<&'a str>,
    position: usize,
}

impl<'a> SelectorParser<'a> {
    fn new(selector: &'a str) -> Self {
        let tokens = TOKEN_REGEX
            .find_iter(selector)
            .map(|(start, end)| &selector[start..end])
            .collect();
        Self {
            tokens,
            position: 0,
        }
    }

    fn token(&self) -> Option<&'a str> {
        self.tokens.get(self.position).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn parse_operand(&mut self) -> Option<Matcher> {
        let token = self.token()?;
        match token {
            "-" => {
                self.advance();
                // A dangling `-` negates nothing and matches nothing
                Some(match self.parse_operand() {
                    Some(negated) => Matcher::Not(Box::new(negated)),
                    None => Matcher::Never,
                })
            }
            "(" => {
                self.advance();
                let inner = self.parse_inner_expression();
                if self.token() == Some(")") {
                    self.advance();
                }
                Some(inner)
            }
            t if is_identifier(t) => {
                let mut identifiers = Vec::new();
                while let Some(t) = self.token()
                    && is_identifier(t)
                {
                    identifiers.push(t.to_owned());
                    self.advance();
                }
                Some(Matcher::Path(identifiers))
            }
            _ => None,
        }
    }

    fn parse_conjunction(&mut self) -> Matcher {
        let mut matchers = Vec::new();
        while let Some(m) = self.parse_operand() {
            matchers.push(m);
        }

        match matchers.len() {
            0 => Matcher::Never,
            1 => matchers.remove(0),
            _ => Matcher::And(matchers),
        }
    }

    fn parse_inner_expression(&mut self) -> Matcher {
        let mut matchers = Vec::new();
        loop {
            matchers.push(self.parse_conjunction());
            if !is_or_separator(self.token()) {
                break;
            }
            // `a,,b` is the same as `a,b`
            while is_or_separator(self.token()) {
                self.advance();
            }
        }

        if matchers.len() == 1 {
            matchers.remove(0)
        } else {
            Matcher::Or(matchers)
        }
    }

    fn parse(mut self) -> Vec<MatcherWithPriority> {
        let mut res = Vec::new();

        while let Some(token) = self.token() {
            let mut priority = Priority::Default;
            if token.len() == 2 && token.ends_with(':') {
                match token {
                    "L:" => priority = Priority::Left,
                    "R:" => priority = Priority::Right,
                    "B:" => priority = Priority::Default,
                    _ => {
                        #[cfg(feature = "debug")]
                        log::warn!("Unknown priority {token} in scope selector");
                    }
                }
                self.advance();
            }

            let matcher = self.parse_conjunction();
            res.push(MatcherWithPriority { matcher, priority });

            if self.token() != Some(",") {
                break;
            }
            self.advance();
        }

        res
    }
}

/// Parses a selector into one matcher per top-level `,` separated part.
/// Malformed parts become [`Matcher::Never`] instead of failing.
pub fn create_matchers(selector: &str) -> Vec<MatcherWithPriority> {
    SelectorParser::new(selector).parse()
}

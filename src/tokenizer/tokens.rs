use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::metadata::{EncodedTokenAttributes, StandardTokenType};
use crate::scope::AttributedScopeStack;
use crate::selector::{Matcher, create_matchers};
use crate::tokenizer::StateStack;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Byte span within the line (start inclusive, end exclusive, 0-based)
    pub span: Range<usize>,
    /// Scope names, ordered from outermost to innermost
    /// (e.g., source.js -> string.quoted.double -> punctuation.definition.string).
    pub scopes: Vec<String>,
}

/// Forces a standard token type on the scopes matching a selector
#[derive(Debug, Clone)]
pub(crate) struct TokenTypeMatcher {
    pub matcher: Matcher,
    pub token_type: StandardTokenType,
}

impl TokenTypeMatcher {
    /// One matcher per `,` separated part of each selector, in the given order
    pub fn from_selectors(token_types: &[(String, StandardTokenType)]) -> Vec<Self> {
        token_types
            .iter()
            .flat_map(|(selector, token_type)| {
                create_matchers(selector)
                    .into_iter()
                    .map(|m| TokenTypeMatcher {
                        matcher: m.matcher,
                        token_type: *token_type,
                    })
            })
            .collect()
    }
}

/// Decides which tokens can contain brackets that editors should try to balance.
#[derive(Debug, Clone, Default)]
pub struct BalancedBracketSelectors {
    balanced: Vec<Matcher>,
    unbalanced: Vec<Matcher>,
    /// `*` was one of the balanced selectors
    allow_any: bool,
}

impl BalancedBracketSelectors {
    pub fn new<S: AsRef<str>>(balanced: &[S], unbalanced: &[S]) -> Self {
        let mut allow_any = false;
        let mut balanced_matchers = Vec::new();
        for selector in balanced {
            if selector.as_ref() == "*" {
                allow_any = true;
                continue;
            }
            balanced_matchers.extend(create_matchers(selector.as_ref()).into_iter().map(|m| m.matcher));
        }
        let unbalanced = unbalanced
            .iter()
            .flat_map(|selector| create_matchers(selector.as_ref()))
            .map(|m| m.matcher)
            .collect();

        Self {
            balanced: balanced_matchers,
            unbalanced,
            allow_any,
        }
    }

    pub fn matches_always(&self) -> bool {
        self.allow_any && self.unbalanced.is_empty()
    }

    pub fn matches_never(&self) -> bool {
        self.balanced.is_empty() && !self.allow_any
    }

    pub fn matches<S: AsRef<str>>(&self, scopes: &[S]) -> bool {
        if self.unbalanced.iter().any(|m| m.matches(scopes)) {
            return false;
        }
        if self.balanced.iter().any(|m| m.matches(scopes)) {
            return true;
        }
        self.allow_any
    }
}

/// Collects the tokens of a line as the tokenizer advances, either as scope names or as
/// encoded attributes.
///
/// Empty tokens are never produced: producing up to a position that was already reached
/// is a no-op.
#[derive(Debug)]
pub(crate) struct LineTokens<'g> {
    emit_binary_tokens: bool,
    tokens: Vec<Token>,
    /// Start of each run along with its attributes, consecutive runs always differ
    binary_tokens: Vec<(usize, EncodedTokenAttributes)>,
    /// Position up to which tokens have been generated
    last_end_pos: usize,
    token_type_overrides: &'g [TokenTypeMatcher],
    balanced_bracket_selectors: Option<&'g BalancedBracketSelectors>,
}

impl<'g> LineTokens<'g> {
    pub fn new(
        emit_binary_tokens: bool,
        token_type_overrides: &'g [TokenTypeMatcher],
        balanced_bracket_selectors: Option<&'g BalancedBracketSelectors>,
    ) -> Self {
        Self {
            emit_binary_tokens,
            tokens: Vec::new(),
            binary_tokens: Vec::new(),
            last_end_pos: 0,
            token_type_overrides,
            balanced_bracket_selectors,
        }
    }

    pub fn produce(&mut self, stack: &StateStack, end_pos: usize) {
        self.produce_from_scopes(stack.content_name_scopes(), end_pos);
    }

    pub fn produce_from_scopes(&mut self, scopes: &AttributedScopeStack, end_pos: usize) {
        if self.last_end_pos >= end_pos {
            return;
        }

        #[cfg(feature = "debug")]
        log::trace!("[produce] [{}..{end_pos}] {:?}", self.last_end_pos, scopes);

        if self.emit_binary_tokens {
            let attributes = self.binary_attributes(scopes);
            if self
                .binary_tokens
                .last()
                .is_some_and(|(_, last)| *last == attributes)
            {
                self.last_end_pos = end_pos;
                return;
            }
            self.binary_tokens.push((self.last_end_pos, attributes));
            self.last_end_pos = end_pos;
            return;
        }

        self.tokens.push(Token {
            span: self.last_end_pos..end_pos,
            scopes: scopes.scope_names(),
        });
        self.last_end_pos = end_pos;
    }

    /// The attributes of the scopes with the token type and bracket overrides applied
    fn binary_attributes(&self, scopes: &AttributedScopeStack) -> EncodedTokenAttributes {
        let mut attributes = scopes.token_attributes();
        let mut contains_balanced_brackets = self
            .balanced_bracket_selectors
            .is_some_and(BalancedBracketSelectors::matches_always);

        let selectors_need_scopes = self
            .balanced_bracket_selectors
            .is_some_and(|s| !s.matches_always() && !s.matches_never());
        if !self.token_type_overrides.is_empty() || selectors_need_scopes {
            let scope_names = scopes.scope_names();
            for token_type in self.token_type_overrides {
                if token_type.matcher.matches(&scope_names) {
                    attributes =
                        attributes.set(0, Some(token_type.token_type), None, None, 0, 0);
                }
            }
            if let Some(selectors) = self.balanced_bracket_selectors {
                contains_balanced_brackets = selectors.matches(&scope_names);
            }
        }

        if contains_balanced_brackets {
            attributes = attributes.set(0, None, Some(true), None, 0, 0);
        }
        attributes
    }

    /// `line_len` includes the `\n` added at the end of the line.
    /// The token for that `\n` is removed and the last token stops before it.
    pub fn into_tokens(mut self, stack: &StateStack, line_len: usize) -> Vec<Token> {
        if self
            .tokens
            .last()
            .is_some_and(|t| t.span.start == line_len - 1)
        {
            self.tokens.pop();
        }

        if self.tokens.is_empty() {
            self.tokens.push(Token {
                span: 0..line_len,
                scopes: stack.content_name_scopes().scope_names(),
            });
        }

        if let Some(last) = self.tokens.last_mut()
            && last.span.end > line_len - 1
        {
            last.span.end = line_len - 1;
        }
        self.tokens
    }

    pub fn into_binary_tokens(
        mut self,
        stack: &StateStack,
        line_len: usize,
    ) -> Vec<(usize, EncodedTokenAttributes)> {
        if self
            .binary_tokens
            .last()
            .is_some_and(|(start, _)| *start == line_len - 1)
        {
            self.binary_tokens.pop();
        }

        if self.binary_tokens.is_empty() {
            let attributes = self.binary_attributes(stack.content_name_scopes());
            self.binary_tokens.push((0, attributes));
        }
        self.binary_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::RuleId;

    fn scopes(names: &[&str], attributes: u32) -> AttributedScopeStack {
        let (first, rest) = names.split_first().unwrap();
        let mut stack = AttributedScopeStack::create_root(first, EncodedTokenAttributes(0));
        for name in rest {
            stack = stack.push(name, EncodedTokenAttributes(0));
        }
        stack.push("leaf", EncodedTokenAttributes(attributes))
    }

    #[test]
    fn test_produce_skips_empty_tokens() {
        let root = scopes(&["source.test"], 0);
        let string = scopes(&["source.test", "string"], 0);
        let stack = StateStack::new(RuleId(1), root.clone());

        let mut tokens = LineTokens::new(false, &[], None);
        tokens.produce_from_scopes(&string, 2);
        tokens.produce_from_scopes(&root, 2);
        tokens.produce(&stack, 5);
        // the \n
        tokens.produce(&stack, 6);

        let spans: Vec<_> = tokens
            .into_tokens(&stack, 6)
            .into_iter()
            .map(|t| (t.span, t.scopes.len()))
            .collect();
        assert_eq!(spans, vec![(0..2, 3), (2..5, 2)]);
    }

    #[test]
    fn test_last_token_stops_before_newline() {
        let root = scopes(&["source.test"], 0);
        let stack = StateStack::new(RuleId(1), root);

        let mut tokens = LineTokens::new(false, &[], None);
        tokens.produce(&stack, 4);
        assert_eq!(tokens.into_tokens(&stack, 4)[0].span, 0..3);

        // empty line
        let tokens = LineTokens::new(false, &[], None);
        assert_eq!(tokens.into_tokens(&stack, 1)[0].span, 0..0);
    }

    #[test]
    fn test_binary_tokens_merge_identical_runs() {
        let a = scopes(&["source.test"], 1);
        let a_again = scopes(&["source.test", "other"], 1);
        let b = scopes(&["source.test"], 2);
        let stack = StateStack::new(RuleId(1), a.clone());

        let mut tokens = LineTokens::new(true, &[], None);
        tokens.produce_from_scopes(&a, 2);
        tokens.produce_from_scopes(&a_again, 4);
        tokens.produce_from_scopes(&b, 6);
        tokens.produce_from_scopes(&b, 7);

        assert_eq!(
            tokens.into_binary_tokens(&stack, 7),
            vec![
                (0, EncodedTokenAttributes(1)),
                (4, EncodedTokenAttributes(2))
            ]
        );
    }

    #[test]
    fn test_binary_overrides() {
        let token_types = TokenTypeMatcher::from_selectors(&[
            ("string".to_string(), StandardTokenType::String),
            ("string.unquoted, comment".to_string(), StandardTokenType::Other),
        ]);
        let brackets = BalancedBracketSelectors::new(&["*"], &["string.unquoted"]);

        let test_cases = vec![
            (vec!["source.test", "string"], StandardTokenType::String, true),
            (vec!["source.test", "string.unquoted"], StandardTokenType::Other, false),
            (vec!["source.test", "comment"], StandardTokenType::Other, true),
            (vec!["source.test"], StandardTokenType::Other, true),
        ];

        for (names, token_type, balanced) in test_cases {
            let line_tokens = LineTokens::new(true, &token_types, Some(&brackets));
            let stack = scopes(&names, EncodedTokenAttributes::default().0);
            let attributes = line_tokens.binary_attributes(&stack);
            assert_eq!(attributes.token_type(), token_type, "{names:?}");
            assert_eq!(attributes.contains_balanced_brackets(), balanced, "{names:?}");
        }
    }

    #[test]
    fn test_balanced_bracket_selectors() {
        let never = BalancedBracketSelectors::new::<&str>(&[], &[]);
        assert!(never.matches_never());
        assert!(!never.matches(&["source.test"]));

        let always = BalancedBracketSelectors::new(&["*"], &[]);
        assert!(always.matches_always());

        let some = BalancedBracketSelectors::new(&["meta.brackets"], &["string"]);
        assert!(some.matches(&["source.test", "meta.brackets.round"]));
        assert!(!some.matches(&["source.test", "meta.brackets", "string"]));
        assert!(!some.matches(&["source.test"]));
    }
}

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::OcraResult;
use crate::grammars::{
    Injection, RawGrammar, RegexEngine, RuleFactory, RuleId, Rules, ScannerCache,
    collect_injections,
};
use crate::metadata::{EncodedTokenAttributes, StandardTokenType};
use crate::registry::GrammarRepository;
use crate::scope::{AttributedScopeStack, BasicScopeAttributesProvider, ScopeAttributes};
use crate::themes::Theme;
use crate::tokenizer::{
    BalancedBracketSelectors, LineTokens, StateStack, Token, TokenTypeMatcher, Tokenizer,
};

/// Options given when loading a grammar
#[derive(Debug, Clone, Default)]
pub struct GrammarConfiguration {
    /// Scope name of embedded languages -> their language id
    pub embedded_languages: HashMap<String, u8>,
    /// Selector -> token type forced on the tokens matching it, applied in order
    pub token_types: Vec<(String, StandardTokenType)>,
    pub balanced_bracket_selectors: Vec<String>,
    pub unbalanced_bracket_selectors: Vec<String>,
}

/// Tokens of a line along with the stack to give when tokenizing the next one
#[derive(Debug, Clone)]
pub struct TokenizeLineResult {
    pub tokens: Vec<Token>,
    pub rule_stack: StateStack,
    /// The time limit was reached before the end of the line: the tokens and the stack
    /// are the ones reached so far.
    pub stopped_early: bool,
}

/// Like [`TokenizeLineResult`] but with each token being a start offset and its attributes
#[derive(Debug, Clone)]
pub struct TokenizeLineResult2 {
    pub tokens: Vec<(usize, EncodedTokenAttributes)>,
    pub rule_stack: StateStack,
    pub stopped_early: bool,
}

/// A grammar with all its rules compiled, ready to tokenize.
///
/// Scanners are compiled lazily and cached, which is why tokenizing needs `&mut self`.
pub struct Grammar {
    scope_name: String,
    root_id: RuleId,
    rules: Rules,
    injections: Vec<Injection>,
    scanners: ScannerCache,
    attributes: ScopeAttributes,
    token_type_matchers: Vec<TokenTypeMatcher>,
    balanced_bracket_selectors: Option<BalancedBracketSelectors>,
    engine: Arc<dyn RegexEngine>,
}

impl Grammar {
    pub(crate) fn new(
        raw: Arc<RawGrammar>,
        initial_language: u8,
        configuration: Option<&GrammarConfiguration>,
        theme: Arc<Theme>,
        grammar_repository: Arc<dyn GrammarRepository>,
        engine: Arc<dyn RegexEngine>,
    ) -> Self {
        let scope_name = raw.scope_name.clone();
        let mut factory = RuleFactory::new(raw, grammar_repository);
        let root_id = factory.compile_root();
        let injections = collect_injections(&mut factory);
        let rules = factory.into_rules();

        #[cfg(feature = "debug")]
        log::debug!(
            "Compiled {scope_name}: {} rule(s), {} injection(s)",
            rules.len(),
            injections.len()
        );

        let default_configuration = GrammarConfiguration::default();
        let config = configuration.unwrap_or(&default_configuration);
        let balanced_bracket_selectors = configuration.map(|c| {
            BalancedBracketSelectors::new(
                &c.balanced_bracket_selectors,
                &c.unbalanced_bracket_selectors,
            )
        });

        Self {
            scope_name,
            root_id,
            rules,
            injections,
            scanners: ScannerCache::default(),
            attributes: ScopeAttributes {
                basic: BasicScopeAttributesProvider::new(
                    initial_language,
                    &config.embedded_languages,
                ),
                theme,
            },
            token_type_matchers: TokenTypeMatcher::from_selectors(&config.token_types),
            balanced_bracket_selectors,
            engine,
        }
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    /// Uses another theme for the lines tokenized from now on.
    /// Stacks returned before keep the attributes they were created with.
    pub fn set_theme(&mut self, theme: Arc<Theme>) {
        self.attributes.theme = theme;
    }

    /// The stack every first line starts from
    fn initial_stack(&self) -> StateStack {
        let defaults = self.attributes.default_token_attributes();
        let root_scope_name = self
            .rules
            .get(self.root_id)
            .and_then(|rule| rule.name().raw())
            .unwrap_or("unknown");
        let scopes = AttributedScopeStack::create_root_and_look_up_scope_name(
            root_scope_name,
            defaults,
            &self.attributes,
        );
        StateStack::new(self.root_id, scopes)
    }

    fn tokenize(
        &mut self,
        line: &str,
        prev_state: Option<&StateStack>,
        emit_binary_tokens: bool,
        time_limit: Option<Duration>,
    ) -> OcraResult<(LineTokens<'_>, StateStack, bool, usize)> {
        let (is_first_line, prev_state) = match prev_state {
            Some(prev) => (false, prev.reset()),
            None => (true, self.initial_stack()),
        };

        let line = format!("{line}\n");
        let deadline = time_limit.map(|limit| Instant::now() + limit);
        let mut tokens = LineTokens::new(
            emit_binary_tokens,
            &self.token_type_matchers,
            self.balanced_bracket_selectors.as_ref(),
        );
        let mut tokenizer = Tokenizer {
            rules: &self.rules,
            injections: &self.injections,
            attributes: &self.attributes,
            engine: self.engine.as_ref(),
            scanners: &mut self.scanners,
        };

        let (stack, stopped_early) = tokenizer.tokenize_string(
            &line,
            is_first_line,
            0,
            prev_state,
            &mut tokens,
            true,
            deadline,
        )?;

        Ok((tokens, stack, stopped_early, line.len()))
    }

    /// Tokenizes a single line (without its line terminator).
    ///
    /// `prev_state` is the `rule_stack` returned for the previous line, `None` for the
    /// first one.
    pub fn tokenize_line(
        &mut self,
        line: &str,
        prev_state: Option<&StateStack>,
        time_limit: Option<Duration>,
    ) -> OcraResult<TokenizeLineResult> {
        let (tokens, rule_stack, stopped_early, line_len) =
            self.tokenize(line, prev_state, false, time_limit)?;
        Ok(TokenizeLineResult {
            tokens: tokens.into_tokens(&rule_stack, line_len),
            rule_stack,
            stopped_early,
        })
    }

    /// Same as [`Grammar::tokenize_line`] but each token is its start offset and its
    /// encoded attributes: language, token type, font style and colors from the theme.
    pub fn tokenize_line2(
        &mut self,
        line: &str,
        prev_state: Option<&StateStack>,
        time_limit: Option<Duration>,
    ) -> OcraResult<TokenizeLineResult2> {
        let (tokens, rule_stack, stopped_early, line_len) =
            self.tokenize(line, prev_state, true, time_limit)?;
        Ok(TokenizeLineResult2 {
            tokens: tokens.into_binary_tokens(&rule_stack, line_len),
            rule_stack,
            stopped_early,
        })
    }

    /// Tokenizes every `\n` separated line of `text`, passing the stack from one line to
    /// the next.
    pub fn tokenize_string(&mut self, text: &str) -> OcraResult<Vec<TokenizeLineResult>> {
        let mut results: Vec<TokenizeLineResult> = Vec::new();
        for line in text.split('\n') {
            let prev_state = results.last().map(|r| r.rule_stack.clone());
            results.push(self.tokenize_line(line, prev_state.as_ref(), None)?);
        }
        Ok(results)
    }
}

impl fmt::Debug for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grammar")
            .field("scope_name", &self.scope_name)
            .field("root_id", &self.root_id)
            .field("rules", &self.rules.len())
            .field("injections", &self.injections)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestRepository, test_grammar, test_grammar_with_theme};
    use crate::themes::{FontStyle, RawTheme};

    const STRINGS: &str = r#"{
        "scopeName": "source.test",
        "patterns": [
            {"begin": "\"", "end": "\"", "name": "string.quoted"},
            {"match": "//.*", "name": "comment.line"},
            {"match": "[()]", "name": "meta.brace"}
        ]
    }"#;

    #[test]
    fn test_tokens_cover_the_line() {
        let mut grammar = test_grammar(STRINGS, TestRepository::new(&[]));
        for line in ["", "a", "\"abc\" (x) // c", "((\"", "é \"ü\""] {
            let result = grammar.tokenize_line(line, None, None).unwrap();
            let mut expected_start = 0;
            for token in &result.tokens {
                assert_eq!(token.span.start, expected_start, "{line:?}");
                assert_eq!(token.scopes[0], "source.test");
                expected_start = token.span.end;
            }
            assert_eq!(expected_start, line.len(), "{line:?}");
        }
    }

    #[test]
    fn test_empty_line() {
        let mut grammar = test_grammar(STRINGS, TestRepository::new(&[]));
        let result = grammar.tokenize_line("", None, None).unwrap();
        assert_eq!(result.tokens.len(), 1);
        assert_eq!(result.tokens[0].span, 0..0);
        assert_eq!(result.tokens[0].scopes, vec!["source.test"]);
    }

    #[test]
    fn test_state_carries_over_lines() {
        let mut grammar = test_grammar(STRINGS, TestRepository::new(&[]));
        let first = grammar.tokenize_line("a \"b", None, None).unwrap();
        assert_eq!(first.rule_stack.depth(), 2);

        let second = grammar
            .tokenize_line("c\" d", Some(&first.rule_stack), None)
            .unwrap();
        let spans: Vec<_> = second
            .tokens
            .iter()
            .map(|t| (t.span.clone(), t.scopes.len()))
            .collect();
        assert_eq!(spans, vec![(0..1, 2), (1..2, 2), (2..4, 1)]);
        assert_eq!(second.rule_stack.depth(), 1);

        // The state of the first line is untouched
        assert_eq!(first.rule_stack.depth(), 2);
        let again = grammar
            .tokenize_line("c\" d", Some(&first.rule_stack), None)
            .unwrap();
        assert_eq!(again.tokens, second.tokens);
        assert_eq!(again.rule_stack, second.rule_stack);
    }

    #[test]
    fn test_tokenize_string() {
        let mut grammar = test_grammar(STRINGS, TestRepository::new(&[]));
        let results = grammar.tokenize_string("\"a\nb\"\nc").unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[1].tokens[0].scopes, vec!["source.test", "string.quoted"]);
        assert_eq!(results[2].tokens[0].scopes, vec!["source.test"]);
    }

    #[test]
    fn test_time_limit_reached() {
        let mut grammar = test_grammar(STRINGS, TestRepository::new(&[]));
        let first = grammar.tokenize_line("\"a", None, None).unwrap();
        let result = grammar
            .tokenize_line("b\" c", Some(&first.rule_stack), Some(Duration::ZERO))
            .unwrap();
        assert!(result.stopped_early);
        assert_eq!(result.rule_stack, first.rule_stack.reset());
    }

    #[test]
    fn test_tokenize_line2() {
        let theme = RawTheme::from_json(
            r##"{
                "settings": [
                    {"settings": {"foreground": "#111111", "background": "#222222"}},
                    {"scope": "string", "settings": {"foreground": "#333333", "fontStyle": "italic"}},
                    {"scope": "comment", "settings": {"foreground": "#444444"}}
                ]
            }"##,
        )
        .unwrap();
        let mut grammar = test_grammar_with_theme(STRINGS, TestRepository::new(&[]), &theme);

        let result = grammar.tokenize_line2("x \"y\" z // c", None, None).unwrap();
        let decoded: Vec<_> = result
            .tokens
            .iter()
            .map(|(start, attributes)| {
                (
                    *start,
                    attributes.token_type(),
                    attributes.foreground(),
                    attributes.background(),
                    attributes.font_style().contains(FontStyle::ITALIC),
                )
            })
            .collect();
        assert_eq!(
            decoded,
            vec![
                (0, StandardTokenType::Other, 1, 2, false),
                (2, StandardTokenType::String, 4, 2, true),
                (5, StandardTokenType::Other, 1, 2, false),
                (8, StandardTokenType::Comment, 3, 2, false),
            ]
        );
    }

    #[test]
    fn test_configuration() {
        let raw = Arc::new(
            RawGrammar::from_json(
                r#"{
                    "scopeName": "source.test",
                    "patterns": [
                        {"match": "\\{", "name": "meta.embedded.inner"},
                        {"match": "s", "name": "string.unquoted"},
                        {"match": "q", "name": "string.quoted"}
                    ]
                }"#,
            )
            .unwrap(),
        );
        let configuration = GrammarConfiguration {
            embedded_languages: HashMap::from([("meta.embedded.inner".to_string(), 7)]),
            token_types: vec![("string.unquoted".to_string(), StandardTokenType::Other)],
            balanced_bracket_selectors: vec!["*".to_string()],
            unbalanced_bracket_selectors: vec!["string".to_string()],
        };
        let mut grammar = Grammar::new(
            raw,
            3,
            Some(&configuration),
            Arc::new(Theme::default()),
            Arc::new(TestRepository::new(&[])),
            Arc::new(crate::grammars::OnigEngine),
        );

        let result = grammar.tokenize_line2("{sq", None, None).unwrap();
        let decoded: Vec<_> = result
            .tokens
            .iter()
            .map(|(start, a)| {
                (
                    *start,
                    a.language_id(),
                    a.token_type(),
                    a.contains_balanced_brackets(),
                )
            })
            .collect();
        assert_eq!(
            decoded,
            vec![
                (0, 7, StandardTokenType::Other, true),
                (1, 3, StandardTokenType::Other, false),
                (2, 3, StandardTokenType::String, false),
            ]
        );
    }
}

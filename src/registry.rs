use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, OcraResult};
use crate::grammar::{Grammar, GrammarConfiguration};
use crate::grammars::{OnigEngine, RawGrammar, RegexEngine, ScopeDependencyProcessor};
use crate::themes::{RawTheme, Theme};

/// Read access to the raw grammars known when compiling a grammar
pub trait GrammarRepository: Send + Sync {
    fn lookup(&self, scope_name: &str) -> Option<Arc<RawGrammar>>;

    /// Scope names of the grammars injecting themselves into `scope_name`
    fn injections(&self, scope_name: &str) -> Vec<String>;
}

/// Where the registry gets the grammars it doesn't have yet.
///
/// A grammar is only requested once, the first time a grammar being loaded needs it.
pub trait GrammarSource: Send + Sync {
    fn load_grammar(&self, scope_name: &str) -> Option<RawGrammar>;

    /// Grammars to inject in `scope_name`, on top of the ones declaring it in `injectTo`
    fn injections(&self, _scope_name: &str) -> Option<Vec<String>> {
        None
    }
}

/// The raw grammars added so far. Every loaded [`Grammar`] gets its own copy so adding
/// grammars later doesn't change what it compiled.
#[derive(Debug, Clone, Default)]
struct GrammarSnapshot {
    grammars: HashMap<String, Arc<RawGrammar>>,
    injections: HashMap<String, Vec<String>>,
}

impl GrammarRepository for GrammarSnapshot {
    fn lookup(&self, scope_name: &str) -> Option<Arc<RawGrammar>> {
        self.grammars.get(scope_name).cloned()
    }

    fn injections(&self, scope_name: &str) -> Vec<String> {
        self.injections.get(scope_name).cloned().unwrap_or_default()
    }
}

/// Holds the raw grammars and the theme, and creates [`Grammar`]s from them.
pub struct Registry {
    theme: Arc<Theme>,
    grammars: GrammarSnapshot,
    source: Option<Box<dyn GrammarSource>>,
    engine: Arc<dyn RegexEngine>,
}

impl Registry {
    pub fn new(theme: &RawTheme) -> OcraResult<Self> {
        Ok(Self {
            theme: Arc::new(Theme::from_raw(theme, None)?),
            ..Default::default()
        })
    }

    /// Creates a registry whose theme can only use the colors of `color_map`: the ids in
    /// the token attributes are the indices in that list.
    pub fn with_color_map(theme: &RawTheme, color_map: &[String]) -> OcraResult<Self> {
        Ok(Self {
            theme: Arc::new(Theme::from_raw(theme, Some(color_map))?),
            ..Default::default()
        })
    }

    /// Replaces the theme of the grammars loaded from now on.
    /// Grammars already loaded can be updated with [`Grammar::set_theme`].
    pub fn set_theme(&mut self, theme: &RawTheme, color_map: Option<&[String]>) -> OcraResult<()> {
        self.theme = Arc::new(Theme::from_raw(theme, color_map)?);
        Ok(())
    }

    pub fn theme(&self) -> &Arc<Theme> {
        &self.theme
    }

    /// The colors of the current theme, index 0 is unused
    pub fn color_map(&self) -> &[String] {
        self.theme.color_map()
    }

    pub fn set_grammar_source(&mut self, source: impl GrammarSource + 'static) {
        self.source = Some(Box::new(source));
    }

    /// Uses another regex engine than oniguruma for the grammars loaded from now on
    pub fn set_regex_engine(&mut self, engine: impl RegexEngine + 'static) {
        self.engine = Arc::new(engine);
    }

    /// Adds a raw grammar, replacing any grammar with the same scope name.
    ///
    /// `injections` are the scope names of the grammars to inject into this one.
    pub fn add_grammar(&mut self, grammar: RawGrammar, injections: Option<Vec<String>>) {
        let scope_name = grammar.scope_name.clone();

        if let Some(injections) = injections {
            let existing = self.grammars.injections.entry(scope_name.clone()).or_default();
            for injection in injections {
                if !existing.contains(&injection) {
                    existing.push(injection);
                }
            }
        }
        for target in &grammar.inject_to {
            let existing = self.grammars.injections.entry(target.clone()).or_default();
            if !existing.contains(&scope_name) {
                existing.push(scope_name.clone());
            }
        }

        #[cfg(feature = "debug")]
        log::debug!("Adding grammar {scope_name}");
        self.grammars.grammars.insert(scope_name, Arc::new(grammar));
    }

    /// Parses a grammar from JSON and adds it
    pub fn add_grammar_from_json(&mut self, json: &str) -> OcraResult<()> {
        let grammar = RawGrammar::from_json(json)?;
        self.add_grammar(grammar, None);
        Ok(())
    }

    pub fn contains_grammar(&self, scope_name: &str) -> bool {
        self.grammars.grammars.contains_key(scope_name)
    }

    fn ensure_loaded(&mut self, scope_name: &str) {
        if self.contains_grammar(scope_name) {
            return;
        }
        let Some(source) = &self.source else {
            return;
        };
        let Some(grammar) = source.load_grammar(scope_name) else {
            #[cfg(feature = "debug")]
            log::warn!("No grammar found for {scope_name}");
            return;
        };
        let injections = source.injections(scope_name);
        self.add_grammar(grammar, injections);
    }

    fn load(
        &mut self,
        scope_name: &str,
        initial_language: u8,
        configuration: Option<&GrammarConfiguration>,
    ) -> OcraResult<Grammar> {
        let mut processor = ScopeDependencyProcessor::new(scope_name);
        while !processor.queue.is_empty() {
            let scope_names: Vec<String> = processor
                .queue
                .iter()
                .map(|reference| reference.scope_name().to_owned())
                .collect();
            for name in scope_names {
                self.ensure_loaded(&name);
            }
            processor.process_queue(&self.grammars)?;
        }

        let raw = self
            .grammars
            .lookup(scope_name)
            .ok_or_else(|| Error::GrammarNotFound(scope_name.to_owned()))?;

        Ok(Grammar::new(
            raw,
            initial_language,
            configuration,
            Arc::clone(&self.theme),
            Arc::new(self.grammars.clone()),
            Arc::clone(&self.engine),
        ))
    }

    /// Loads the grammar of `scope_name` along with every grammar it includes
    pub fn load_grammar(&mut self, scope_name: &str) -> OcraResult<Grammar> {
        self.load(scope_name, 0, None)
    }

    pub fn load_grammar_with_configuration(
        &mut self,
        scope_name: &str,
        initial_language: u8,
        configuration: &GrammarConfiguration,
    ) -> OcraResult<Grammar> {
        self.load(scope_name, initial_language, Some(configuration))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            theme: Arc::new(Theme::default()),
            grammars: GrammarSnapshot::default(),
            source: None,
            engine: Arc::new(OnigEngine),
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut scope_names: Vec<_> = self.grammars.grammars.keys().collect();
        scope_names.sort();
        f.debug_struct("Registry")
            .field("theme", &self.theme)
            .field("grammars", &scope_names)
            .field("has_source", &self.source.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::test_utils::render_tokens;

    struct JsonSource {
        grammars: HashMap<&'static str, &'static str>,
        requested: Arc<Mutex<Vec<String>>>,
    }

    impl GrammarSource for JsonSource {
        fn load_grammar(&self, scope_name: &str) -> Option<RawGrammar> {
            self.requested.lock().unwrap().push(scope_name.to_owned());
            let json = self.grammars.get(scope_name)?;
            Some(RawGrammar::from_json(json).unwrap())
        }

        fn injections(&self, scope_name: &str) -> Option<Vec<String>> {
            (scope_name == "source.outer").then(|| vec!["text.todo".to_string()])
        }
    }

    fn source() -> JsonSource {
        JsonSource {
            grammars: HashMap::from([
                (
                    "source.outer",
                    r#"{
                        "scopeName": "source.outer",
                        "patterns": [
                            {"begin": "<", "end": ">", "name": "meta.inner", "patterns": [{"include": "source.inner"}]},
                            {"include": "source.missing"}
                        ]
                    }"#,
                ),
                (
                    "source.inner",
                    r#"{"scopeName": "source.inner", "patterns": [{"match": "\\d", "name": "digit"}]}"#,
                ),
                (
                    "text.todo",
                    r#"{
                        "scopeName": "text.todo",
                        "injectionSelector": "source.outer",
                        "patterns": [{"match": "TODO", "name": "keyword.todo"}]
                    }"#,
                ),
            ]),
            requested: Arc::default(),
        }
    }

    #[test]
    fn test_load_grammar_from_source() {
        let mut registry = Registry::default();
        registry.set_grammar_source(source());
        let mut grammar = registry.load_grammar("source.outer").unwrap();
        assert!(registry.contains_grammar("source.inner"));
        assert!(registry.contains_grammar("text.todo"));
        assert!(!registry.contains_grammar("source.missing"));

        let result = grammar.tokenize_line("a<1> TODO", None, None).unwrap();
        insta::assert_snapshot!(render_tokens(&result.tokens), @r"
        0..1 source.outer
        1..2 source.outer meta.inner
        2..3 source.outer meta.inner digit
        3..4 source.outer meta.inner
        4..5 source.outer
        5..9 source.outer keyword.todo
        ");
    }

    #[test]
    fn test_grammars_are_requested_once() {
        let source = source();
        let requested = Arc::clone(&source.requested);
        let mut registry = Registry::default();
        registry.set_grammar_source(source);
        registry.load_grammar("source.outer").unwrap();
        registry.load_grammar("source.outer").unwrap();
        registry.load_grammar("source.inner").unwrap();

        let mut requested = requested.lock().unwrap().clone();
        requested.sort();
        // Only the missing grammar is requested again
        assert_eq!(
            requested,
            vec![
                "source.inner",
                "source.missing",
                "source.missing",
                "source.outer",
                "text.todo"
            ]
        );
    }

    #[test]
    fn test_missing_grammar() {
        let mut registry = Registry::default();
        assert!(matches!(
            registry.load_grammar("source.nope"),
            Err(Error::GrammarNotFound(scope)) if scope == "source.nope"
        ));
    }

    #[test]
    fn test_inject_to() {
        let mut registry = Registry::default();
        registry
            .add_grammar_from_json(r#"{"scopeName": "source.a", "patterns": [{"match": "a", "name": "letter"}]}"#)
            .unwrap();
        registry
            .add_grammar_from_json(
                r#"{
                    "scopeName": "text.injected",
                    "injectTo": ["source.a"],
                    "injectionSelector": "L:source.a",
                    "patterns": [{"match": "ab", "name": "injected"}]
                }"#,
            )
            .unwrap();
        let mut grammar = registry.load_grammar("source.a").unwrap();
        let result = grammar.tokenize_line("aab", None, None).unwrap();
        insta::assert_snapshot!(render_tokens(&result.tokens), @r"
        0..1 source.a letter
        1..3 source.a injected
        ");
    }

    #[test]
    fn test_themes() {
        let theme = RawTheme::from_json(
            r##"{"settings": [{"scope": "letter", "settings": {"foreground": "#ff0000"}}]}"##,
        )
        .unwrap();
        let mut registry = Registry::new(&theme).unwrap();
        assert_eq!(registry.color_map(), &["", "#000000", "#FFFFFF", "#FF0000"]);

        assert!(matches!(
            Registry::with_color_map(&theme, &["#000000".to_string(), "#FFFFFF".to_string()]),
            Err(Error::MissingColor { .. })
        ));
        let colors = vec![
            String::new(),
            "#FF0000".to_string(),
            "#000000".to_string(),
            "#FFFFFF".to_string(),
        ];
        registry.set_theme(&theme, Some(colors.as_slice())).unwrap();
        assert_eq!(registry.color_map(), colors.as_slice());

        registry
            .add_grammar_from_json(r#"{"scopeName": "source.a", "patterns": [{"match": "a", "name": "letter"}]}"#)
            .unwrap();
        let mut grammar = registry.load_grammar("source.a").unwrap();
        let result = grammar.tokenize_line2("ab", None, None).unwrap();
        let foregrounds: Vec<_> = result
            .tokens
            .iter()
            .map(|(start, attributes)| (*start, attributes.foreground()))
            .collect();
        assert_eq!(foregrounds, vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn test_build_theme_and_inspect_rules_from_crate_root() {
        use crate::{MatchRule, RawScope, RawStyleSettings, RawThemeSetting, Rule, RuleId};

        let theme = RawTheme {
            name: None,
            settings: vec![RawThemeSetting {
                name: None,
                scope: Some(RawScope::One("constant".to_string())),
                settings: Some(RawStyleSettings {
                    foreground: Some("#ff0000".to_string()),
                    ..Default::default()
                }),
            }],
        };
        let mut registry = Registry::new(&theme).unwrap();
        assert!(registry.color_map().iter().any(|c| c == "#FF0000"));

        registry
            .add_grammar_from_json(
                r#"{"scopeName": "source.test", "patterns": [{"match": "\\d+", "name": "constant"}]}"#,
            )
            .unwrap();
        let grammar = registry.load_grammar("source.test").unwrap();
        let rules = grammar.rules();
        let match_sources: Vec<&str> = (1..=rules.len() as u32)
            .filter_map(|id| match rules.get(RuleId(id)) {
                Some(Rule::Match(MatchRule { match_, .. })) => Some(match_.source()),
                _ => None,
            })
            .collect();
        assert_eq!(match_sources, vec!["\\d+"]);
    }
}

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use crate::grammar::Grammar;
use crate::grammars::{OnigEngine, RawGrammar};
use crate::registry::GrammarRepository;
use crate::themes::{RawTheme, Theme};
use crate::tokenizer::Token;

/// Grammars available to includes and injections in tests
#[derive(Debug, Default)]
pub(crate) struct TestRepository {
    grammars: HashMap<String, Arc<RawGrammar>>,
    injections: HashMap<String, Vec<String>>,
}

impl TestRepository {
    pub fn new(grammars: &[&str]) -> Self {
        let grammars = grammars
            .iter()
            .map(|json| {
                let grammar = RawGrammar::from_json(json).unwrap();
                (grammar.scope_name.clone(), Arc::new(grammar))
            })
            .collect();
        Self {
            grammars,
            injections: HashMap::new(),
        }
    }

    pub fn with_injections(mut self, scope_name: &str, injections: &[&str]) -> Self {
        self.injections.insert(
            scope_name.to_owned(),
            injections.iter().map(|s| s.to_string()).collect(),
        );
        self
    }
}

impl GrammarRepository for TestRepository {
    fn lookup(&self, scope_name: &str) -> Option<Arc<RawGrammar>> {
        self.grammars.get(scope_name).cloned()
    }

    fn injections(&self, scope_name: &str) -> Vec<String> {
        self.injections.get(scope_name).cloned().unwrap_or_default()
    }
}

pub(crate) fn test_grammar(json: &str, repository: TestRepository) -> Grammar {
    let raw = RawGrammar::from_json(json).unwrap();
    Grammar::new(
        Arc::new(raw),
        0,
        None,
        Arc::new(Theme::default()),
        Arc::new(repository),
        Arc::new(OnigEngine),
    )
}

pub(crate) fn test_grammar_with_theme(
    json: &str,
    repository: TestRepository,
    theme: &RawTheme,
) -> Grammar {
    let raw = RawGrammar::from_json(json).unwrap();
    Grammar::new(
        Arc::new(raw),
        0,
        None,
        Arc::new(Theme::from_raw(theme, None).unwrap()),
        Arc::new(repository),
        Arc::new(OnigEngine),
    )
}

/// One `start..end scopes` line per token
pub(crate) fn render_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        writeln!(
            out,
            "{}..{} {}",
            token.span.start,
            token.span.end,
            token.scopes.join(" ")
        )
        .unwrap();
    }
    out.trim_end().to_string()
}

pub(crate) fn render_line(grammar: &mut Grammar, line: &str) -> String {
    let result = grammar.tokenize_line(line, None, None).unwrap();
    render_tokens(&result.tokens)
}

/// Tokenizes every line of `text`, prefixing each token with its line number
pub(crate) fn render_lines(grammar: &mut Grammar, text: &str) -> String {
    let mut out = String::new();
    for (i, result) in grammar.tokenize_string(text).unwrap().iter().enumerate() {
        for line in render_tokens(&result.tokens).lines() {
            writeln!(out, "{i}: {line}").unwrap();
        }
    }
    out.trim_end().to_string()
}

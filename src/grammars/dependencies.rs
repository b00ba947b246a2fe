//! Finding which grammars a grammar needs before it can be compiled.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{Error, OcraResult};
use crate::grammars::raw::{RawGrammar, RawRule};
use crate::registry::GrammarRepository;

/// per vscode-textmate:
///  Allowed values:
///  * Scope Name, e.g. `source.ts`
///  * Top level scope reference, e.g. `source.ts#entity.name.class`
///  * Relative scope reference, e.g. `#entity.name.class`
///  * self, e.g. `$self`
///  * base, e.g. `$base`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IncludeReference<'a> {
    Base,
    Self_,
    Relative(&'a str),
    TopLevel(&'a str),
    TopLevelRepository(&'a str, &'a str),
}

pub(crate) fn parse_include(include: &str) -> IncludeReference<'_> {
    match include {
        "$base" => IncludeReference::Base,
        "$self" => IncludeReference::Self_,
        _ => match include.split_once('#') {
            None => IncludeReference::TopLevel(include),
            Some(("", name)) => IncludeReference::Relative(name),
            Some((scope_name, name)) => IncludeReference::TopLevelRepository(scope_name, name),
        },
    }
}

/// A rule of another grammar: either all of it or a single repository entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AbsoluteRuleReference {
    TopLevel(String),
    TopLevelRepository(String, String),
}

impl AbsoluteRuleReference {
    pub fn scope_name(&self) -> &str {
        match self {
            AbsoluteRuleReference::TopLevel(scope_name) => scope_name,
            AbsoluteRuleReference::TopLevelRepository(scope_name, _) => scope_name,
        }
    }

    fn key(&self) -> String {
        match self {
            AbsoluteRuleReference::TopLevel(scope_name) => scope_name.clone(),
            AbsoluteRuleReference::TopLevelRepository(scope_name, name) => {
                format!("{scope_name}#{name}")
            }
        }
    }
}

#[derive(Default)]
struct ExternalReferenceCollector {
    references: Vec<AbsoluteRuleReference>,
    seen_references: HashSet<String>,
    /// Raw rules already looked at, by address
    visited_rules: HashSet<usize>,
}

impl ExternalReferenceCollector {
    fn add(&mut self, reference: AbsoluteRuleReference) {
        if self.seen_references.insert(reference.key()) {
            self.references.push(reference);
        }
    }
}

#[derive(Clone)]
struct Context<'g> {
    base_grammar: &'g RawGrammar,
    self_grammar: &'g RawGrammar,
    repository: HashMap<&'g str, &'g RawRule>,
}

fn grammar_repository(grammar: &RawGrammar) -> HashMap<&str, &RawRule> {
    grammar
        .repository
        .iter()
        .map(|(name, rule)| (name.as_str(), rule))
        .collect()
}

fn collect_in_top_level_rule(context: &Context<'_>, result: &mut ExternalReferenceCollector) {
    let context = Context {
        repository: grammar_repository(context.self_grammar),
        ..context.clone()
    };
    collect_in_rules(&context.self_grammar.patterns, &context, result);
    collect_in_rules(context.self_grammar.injections.values(), &context, result);
}

fn collect_in_top_level_repository_rule(
    name: &str,
    context: &Context<'_>,
    result: &mut ExternalReferenceCollector,
) {
    if let Some(rule) = context.repository.get(name) {
        collect_in_rules([*rule], context, result);
    }
}

fn collect_in_rules<'g>(
    rules: impl IntoIterator<Item = &'g RawRule>,
    context: &Context<'g>,
    result: &mut ExternalReferenceCollector,
) {
    for rule in rules {
        if !result.visited_rules.insert(rule as *const RawRule as usize) {
            continue;
        }

        let mut pattern_repository = context.repository.clone();
        for (name, entry) in &rule.repository {
            pattern_repository.insert(name.as_str(), entry);
        }
        let pattern_context = Context {
            repository: pattern_repository,
            ..context.clone()
        };

        if let Some(patterns) = &rule.patterns {
            collect_in_rules(patterns, &pattern_context, result);
        }

        let Some(include) = &rule.include else {
            continue;
        };

        match parse_include(include) {
            IncludeReference::Base => {
                let base_context = Context {
                    self_grammar: context.base_grammar,
                    ..context.clone()
                };
                collect_in_top_level_rule(&base_context, result);
            }
            IncludeReference::Self_ => collect_in_top_level_rule(context, result),
            IncludeReference::Relative(name) => {
                collect_in_top_level_repository_rule(name, &pattern_context, result);
            }
            IncludeReference::TopLevel(scope_name)
            | IncludeReference::TopLevelRepository(scope_name, _) => {
                let self_grammar = if scope_name == context.self_grammar.scope_name {
                    Some(context.self_grammar)
                } else if scope_name == context.base_grammar.scope_name {
                    Some(context.base_grammar)
                } else {
                    None
                };

                match (self_grammar, parse_include(include)) {
                    (Some(self_grammar), IncludeReference::TopLevelRepository(_, name)) => {
                        let new_context = Context {
                            self_grammar,
                            ..pattern_context
                        };
                        collect_in_top_level_repository_rule(name, &new_context, result);
                    }
                    (Some(self_grammar), _) => {
                        let new_context = Context {
                            self_grammar,
                            ..pattern_context
                        };
                        collect_in_top_level_rule(&new_context, result);
                    }
                    (None, IncludeReference::TopLevelRepository(_, name)) => {
                        result.add(AbsoluteRuleReference::TopLevelRepository(
                            scope_name.to_owned(),
                            name.to_owned(),
                        ));
                    }
                    (None, _) => {
                        result.add(AbsoluteRuleReference::TopLevel(scope_name.to_owned()));
                    }
                }
            }
        }
    }
}

fn collect_references_of_reference(
    reference: &AbsoluteRuleReference,
    base_scope_name: &str,
    repository: &dyn GrammarRepository,
    grammars: &[Arc<RawGrammar>],
    result: &mut ExternalReferenceCollector,
) -> OcraResult<()> {
    let find = |scope_name: &str| {
        grammars
            .iter()
            .find(|g| g.scope_name == scope_name)
            .map(|g| &**g)
    };
    let Some(self_grammar) = find(reference.scope_name()) else {
        if reference.scope_name() == base_scope_name {
            return Err(Error::GrammarNotFound(base_scope_name.to_owned()));
        }
        return Ok(());
    };
    let Some(base_grammar) = find(base_scope_name) else {
        return Err(Error::GrammarNotFound(base_scope_name.to_owned()));
    };

    let context = Context {
        base_grammar,
        self_grammar,
        repository: grammar_repository(self_grammar),
    };
    match reference {
        AbsoluteRuleReference::TopLevel(_) => collect_in_top_level_rule(&context, result),
        AbsoluteRuleReference::TopLevelRepository(_, name) => {
            collect_in_top_level_repository_rule(name, &context, result);
        }
    }

    for injection in repository.injections(reference.scope_name()) {
        result.add(AbsoluteRuleReference::TopLevel(injection));
    }

    Ok(())
}

/// Walks includes grammar by grammar, starting from a root scope, to find every grammar
/// (or repository entry of a grammar) that is needed.
///
/// The caller loads the scopes of [`queue`](Self::queue) and then calls
/// [`process_queue`](Self::process_queue), until the queue is empty.
#[derive(Debug)]
pub struct ScopeDependencyProcessor {
    initial_scope_name: String,
    seen_full_scope_requests: HashSet<String>,
    seen_partial_scope_requests: HashSet<String>,
    pub queue: Vec<AbsoluteRuleReference>,
}

impl ScopeDependencyProcessor {
    pub fn new(initial_scope_name: &str) -> Self {
        Self {
            initial_scope_name: initial_scope_name.to_owned(),
            seen_full_scope_requests: HashSet::from([initial_scope_name.to_owned()]),
            seen_partial_scope_requests: HashSet::new(),
            queue: vec![AbsoluteRuleReference::TopLevel(
                initial_scope_name.to_owned(),
            )],
        }
    }

    pub fn process_queue(&mut self, repository: &dyn GrammarRepository) -> OcraResult<()> {
        let queue = std::mem::take(&mut self.queue);

        // Keeps the grammars alive while we are looking at rules by address
        let mut grammars = Vec::new();
        for scope_name in queue
            .iter()
            .map(AbsoluteRuleReference::scope_name)
            .chain([self.initial_scope_name.as_str()])
        {
            if grammars.iter().any(|g: &Arc<RawGrammar>| g.scope_name == scope_name) {
                continue;
            }
            if let Some(grammar) = repository.lookup(scope_name) {
                grammars.push(grammar);
            }
        }

        let mut result = ExternalReferenceCollector::default();
        for reference in &queue {
            collect_references_of_reference(
                reference,
                &self.initial_scope_name,
                repository,
                &grammars,
                &mut result,
            )?;
        }

        for reference in result.references {
            if self
                .seen_full_scope_requests
                .contains(reference.scope_name())
            {
                continue;
            }
            match &reference {
                AbsoluteRuleReference::TopLevel(scope_name) => {
                    self.seen_full_scope_requests.insert(scope_name.clone());
                }
                AbsoluteRuleReference::TopLevelRepository(..) => {
                    if !self.seen_partial_scope_requests.insert(reference.key()) {
                        continue;
                    }
                }
            }
            #[cfg(feature = "debug")]
            log::debug!("{} needs {}", self.initial_scope_name, reference.key());
            self.queue.push(reference);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestRepository;

    #[test]
    fn test_parse_include() {
        let test_cases = vec![
            ("$base", IncludeReference::Base),
            ("$self", IncludeReference::Self_),
            ("#strings", IncludeReference::Relative("strings")),
            ("source.js", IncludeReference::TopLevel("source.js")),
            (
                "source.js#expr",
                IncludeReference::TopLevelRepository("source.js", "expr"),
            ),
        ];

        for (input, expected) in test_cases {
            assert_eq!(parse_include(input), expected);
        }
    }

    #[test]
    fn test_dependencies_are_found_level_by_level() {
        let repository = TestRepository::new(&[
            r##"{
                "scopeName": "source.a",
                "patterns": [
                    {"include": "source.b"},
                    {"include": "source.c#x"},
                    {"include": "#local"},
                    {"include": "source.a#local"}
                ],
                "repository": {"local": {"patterns": [{"include": "source.d"}]}}
            }"##,
            r##"{
                "scopeName": "source.b",
                "patterns": [{"include": "$base"}, {"include": "source.e"}]
            }"##,
            r##"{"scopeName": "source.c", "repository": {"x": {"include": "source.f"}}}"##,
        ])
        .with_injections("source.a", &["source.injected"]);

        let mut processor = ScopeDependencyProcessor::new("source.a");
        processor.process_queue(&repository).unwrap();
        assert_eq!(
            processor.queue,
            vec![
                AbsoluteRuleReference::TopLevel("source.b".to_string()),
                AbsoluteRuleReference::TopLevelRepository(
                    "source.c".to_string(),
                    "x".to_string()
                ),
                AbsoluteRuleReference::TopLevel("source.d".to_string()),
                AbsoluteRuleReference::TopLevel("source.injected".to_string()),
            ]
        );

        processor.process_queue(&repository).unwrap();
        assert_eq!(
            processor.queue,
            vec![
                AbsoluteRuleReference::TopLevel("source.e".to_string()),
                AbsoluteRuleReference::TopLevel("source.f".to_string()),
            ]
        );

        processor.process_queue(&repository).unwrap();
        assert!(processor.queue.is_empty());
    }

    #[test]
    fn test_missing_root_grammar() {
        let repository = TestRepository::new(&[]);
        let mut processor = ScopeDependencyProcessor::new("source.missing");
        assert!(matches!(
            processor.process_queue(&repository),
            Err(Error::GrammarNotFound(scope)) if scope == "source.missing"
        ));
    }
}

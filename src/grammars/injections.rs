//! Rules injected into a grammar, activated by the scopes of the current stack instead of
//! by being included somewhere.

use std::fmt;
use std::sync::Arc;

use crate::grammars::compiled::{RuleFactory, RuleId};
use crate::selector::{Matcher, Priority, create_matchers};

#[derive(Clone)]
pub(crate) struct Injection {
    /// The selector as written, for debugging
    pub selector: String,
    pub matcher: Matcher,
    pub priority: Priority,
    pub rule_id: RuleId,
    /// Scope name of the grammar the injection comes from
    pub grammar: String,
}

impl Injection {
    pub fn matches<S: AsRef<str>>(&self, scopes: &[S]) -> bool {
        self.matcher.matches(scopes)
    }
}

impl fmt::Debug for Injection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Injection({} from {}, rule={}, priority={})",
            self.selector,
            self.grammar,
            self.rule_id.0,
            self.priority.value()
        )
    }
}

fn push_injections(out: &mut Vec<Injection>, selector: &str, rule_id: RuleId, grammar: &str) {
    for matcher in create_matchers(selector) {
        out.push(Injection {
            selector: selector.to_owned(),
            matcher: matcher.matcher,
            priority: matcher.priority,
            rule_id,
            grammar: grammar.to_owned(),
        });
    }
}

/// Compiles the injections of the root grammar and of the grammars injecting themselves
/// into it, `L:` ones first.
pub(crate) fn collect_injections(factory: &mut RuleFactory) -> Vec<Injection> {
    let mut out = Vec::new();
    let base = Arc::clone(factory.base());
    let scope_name = base.raw.scope_name.clone();

    if !base.raw.injections.is_empty() {
        let repository = base.repository();
        // HashMap order isn't stable, keep the result deterministic
        let mut selectors: Vec<_> = base.raw.injections.iter().collect();
        selectors.sort_by(|a, b| a.0.cmp(b.0));
        for (selector, rule) in selectors {
            let rule_id = factory.compile_rule(rule, &repository);
            push_injections(&mut out, selector, rule_id, &scope_name);
        }
    }

    let injection_scope_names = factory.grammar_repository().injections(&scope_name);
    for injection_scope_name in injection_scope_names {
        let Some(grammar) = factory.get_external_grammar(&injection_scope_name, None) else {
            #[cfg(feature = "debug")]
            log::warn!("Injection grammar {injection_scope_name} not found for {scope_name}");
            continue;
        };
        let Some(selector) = grammar.raw.injection_selector.as_deref() else {
            continue;
        };
        let repository = grammar.repository();
        let rule_id = factory.compile_rule(&grammar.self_rule, &repository);
        push_injections(&mut out, selector, rule_id, &grammar.raw.scope_name);
    }

    out.sort_by_key(|injection| injection.priority.value());

    #[cfg(feature = "debug")]
    log::debug!("{} injection(s) for {scope_name}: {out:?}", out.len());
    out
}

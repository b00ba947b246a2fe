//! A TextMate grammar tokenizer producing the same tokens as
//! [vscode-textmate](https://github.com/microsoft/vscode-textmate).
//!
//! ```no_run
//! use ocra::{RawTheme, Registry};
//!
//! let theme = RawTheme::from_json(r##"{"settings": []}"##)?;
//! let mut registry = Registry::new(&theme)?;
//! registry.add_grammar_from_json(
//!     r#"{"scopeName": "source.test", "patterns": [{"match": "\\d+", "name": "constant.numeric"}]}"#,
//! )?;
//! let mut grammar = registry.load_grammar("source.test")?;
//!
//! let mut state = None;
//! for line in ["12 ab", "cd 3"] {
//!     let result = grammar.tokenize_line(line, state.as_ref(), None)?;
//!     for token in &result.tokens {
//!         println!("{:?} {:?}", token.span, token.scopes);
//!     }
//!     state = Some(result.rule_stack);
//! }
//! # Ok::<(), ocra::Error>(())
//! ```

mod error;
mod grammar;
mod grammars;
mod metadata;
mod registry;
mod scope;
mod selector;
mod themes;
mod tokenizer;

#[cfg(test)]
mod test_utils;

pub use error::Error;
pub use grammar::{Grammar, GrammarConfiguration, TokenizeLineResult, TokenizeLineResult2};
pub use grammars::{
    AbsoluteRuleReference, BeginEndRule, BeginWhileRule, CapturePositions, CaptureRule, Captures,
    IncludeOnlyRule, MatchRule, OnigEngine, RawGrammar, RawRule, RegexEngine, RegexSource, Rule,
    RuleId, Rules, Scanner, ScopeDependencyProcessor, ScopeTemplate,
};
pub use metadata::{EncodedTokenAttributes, StandardTokenType};
pub use registry::{GrammarRepository, GrammarSource, Registry};
pub use scope::{AttributedScopeStack, ScopeStack};
pub use selector::{Matcher, MatcherWithPriority, Priority, create_matchers};
pub use themes::{
    ColorMap, FontStyle, RawScope, RawStyleSettings, RawTheme, RawThemeSetting, StyleAttributes,
    Theme,
};
pub use tokenizer::{BalancedBracketSelectors, StateStack, Token};

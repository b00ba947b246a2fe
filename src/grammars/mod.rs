mod compiled;
mod dependencies;
mod injections;
mod pattern_set;
mod raw;
mod regex;

pub use compiled::{
    BeginEndRule, BeginWhileRule, CaptureRule, IncludeOnlyRule, MatchRule, Rule, RuleId, Rules,
    ScopeTemplate,
};
pub(crate) use compiled::{END_RULE_ID, RuleFactory, ScannerCache, WHILE_RULE_ID};
pub use dependencies::{AbsoluteRuleReference, ScopeDependencyProcessor};
pub(crate) use injections::{Injection, collect_injections};
pub use pattern_set::{CapturePositions, OnigEngine, RegexEngine, Scanner};
pub use raw::{Captures, RawGrammar, RawRule};
pub use regex::RegexSource;

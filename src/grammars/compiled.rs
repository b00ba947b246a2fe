//! Rules compiled from raw grammars.
//!
//! Every raw rule reachable from the root of a grammar gets a [`RuleId`], includes are
//! resolved at that point. Regexes are only compiled into scanners when the tokenizer
//! first needs them, see [`ScannerCache`].

use std::borrow::Cow;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::OcraResult;
use crate::grammars::dependencies::{IncludeReference, parse_include};
use crate::grammars::pattern_set::{CompiledScanner, RegexEngine, RegexSourceList};
use crate::grammars::raw::{Captures, RawGrammar, RawRule};
use crate::grammars::regex::{RegexSource, has_capture_references, replace_capture_references};
use crate::registry::GrammarRepository;
use crate::tokenizer::AnchorActive;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub u32);

impl RuleId {
    fn index(self) -> usize {
        self.0 as usize - 1
    }
}

/// Marks the end pattern of a begin/end rule in a scanner
pub const END_RULE_ID: RuleId = RuleId(u32::MAX);
/// Marks the while pattern of a begin/while rule in a scanner
pub const WHILE_RULE_ID: RuleId = RuleId(u32::MAX - 1);

/// A `name` or `contentName`, which can refer to captures of the rule regex
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeTemplate {
    template: Option<String>,
    has_captures: bool,
}

impl ScopeTemplate {
    pub fn new(template: Option<&str>) -> Self {
        Self {
            has_captures: template.is_some_and(has_capture_references),
            template: template.map(|t| t.to_owned()),
        }
    }

    /// The template as written in the grammar
    pub fn raw(&self) -> Option<&str> {
        self.template.as_deref()
    }

    pub fn resolve(
        &self,
        line: &str,
        captures: Option<&[Option<(usize, usize)>]>,
    ) -> Option<Cow<'_, str>> {
        let template = self.template.as_deref()?;
        match captures {
            Some(captures) if self.has_captures => Some(Cow::Owned(replace_capture_references(
                template, line, captures,
            ))),
            _ => Some(Cow::Borrowed(template)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchRule {
    pub id: RuleId,
    pub name: ScopeTemplate,
    pub match_: RegexSource,
    pub captures: Vec<Option<RuleId>>,
}

#[derive(Debug, Clone)]
pub struct IncludeOnlyRule {
    pub id: RuleId,
    pub name: ScopeTemplate,
    pub content_name: ScopeTemplate,
    pub patterns: Vec<RuleId>,
    pub has_missing_patterns: bool,
}

#[derive(Debug, Clone)]
pub struct BeginEndRule {
    pub id: RuleId,
    pub name: ScopeTemplate,
    pub content_name: ScopeTemplate,
    pub begin: RegexSource,
    pub begin_captures: Vec<Option<RuleId>>,
    pub end: RegexSource,
    pub end_has_back_references: bool,
    pub end_captures: Vec<Option<RuleId>>,
    pub apply_end_pattern_last: bool,
    pub patterns: Vec<RuleId>,
    pub has_missing_patterns: bool,
}

#[derive(Debug, Clone)]
pub struct BeginWhileRule {
    pub id: RuleId,
    pub name: ScopeTemplate,
    pub content_name: ScopeTemplate,
    pub begin: RegexSource,
    pub begin_captures: Vec<Option<RuleId>>,
    pub while_: RegexSource,
    pub while_has_back_references: bool,
    pub while_captures: Vec<Option<RuleId>>,
    pub patterns: Vec<RuleId>,
    pub has_missing_patterns: bool,
}

/// Scopes given to a capture group, and possibly rules to tokenize the captured text with
#[derive(Debug, Clone)]
pub struct CaptureRule {
    pub id: RuleId,
    pub name: ScopeTemplate,
    pub content_name: ScopeTemplate,
    pub retokenize_captured_with: Option<RuleId>,
}

#[derive(Debug, Clone)]
pub enum Rule {
    Match(MatchRule),
    IncludeOnly(IncludeOnlyRule),
    BeginEnd(BeginEndRule),
    BeginWhile(BeginWhileRule),
    Capture(CaptureRule),
}

impl Rule {
    pub fn id(&self) -> RuleId {
        match self {
            Rule::Match(r) => r.id,
            Rule::IncludeOnly(r) => r.id,
            Rule::BeginEnd(r) => r.id,
            Rule::BeginWhile(r) => r.id,
            Rule::Capture(r) => r.id,
        }
    }

    pub fn name(&self) -> &ScopeTemplate {
        match self {
            Rule::Match(r) => &r.name,
            Rule::IncludeOnly(r) => &r.name,
            Rule::BeginEnd(r) => &r.name,
            Rule::BeginWhile(r) => &r.name,
            Rule::Capture(r) => &r.name,
        }
    }

    /// Match rules never have a content name
    pub fn content_name(&self) -> Option<&ScopeTemplate> {
        match self {
            Rule::Match(_) => None,
            Rule::IncludeOnly(r) => Some(&r.content_name),
            Rule::BeginEnd(r) => Some(&r.content_name),
            Rule::BeginWhile(r) => Some(&r.content_name),
            Rule::Capture(r) => Some(&r.content_name),
        }
    }

    /// Rules that can only match things through includes that didn't resolve to anything
    /// are useless and get dropped from their parent.
    fn only_has_missing_patterns(&self) -> bool {
        match self {
            Rule::IncludeOnly(r) => r.has_missing_patterns && r.patterns.is_empty(),
            Rule::BeginEnd(r) => r.has_missing_patterns && r.patterns.is_empty(),
            Rule::BeginWhile(r) => r.has_missing_patterns && r.patterns.is_empty(),
            Rule::Match(_) | Rule::Capture(_) => false,
        }
    }
}

/// All the rules of a grammar, indexed by id
#[derive(Debug, Default)]
pub struct Rules(Vec<Option<Rule>>);

impl Rules {
    /// Returns `None` for unknown ids and for rules still being compiled
    pub fn get(&self, id: RuleId) -> Option<&Rule> {
        if id.0 == 0 {
            return None;
        }
        self.0.get(id.index()).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn reserve(&mut self) -> RuleId {
        self.0.push(None);
        RuleId(self.0.len() as u32)
    }

    fn set(&mut self, id: RuleId, rule: Rule) {
        self.0[id.index()] = Some(rule);
    }

    /// Adds the regexes this rule can start matching with to `out`
    fn collect_patterns(
        &self,
        id: RuleId,
        out: &mut RegexSourceList,
        in_progress: &mut HashSet<RuleId>,
    ) {
        match self.get(id) {
            Some(Rule::Match(r)) => out.push(r.match_.clone()),
            Some(Rule::BeginEnd(r)) => out.push(r.begin.clone()),
            Some(Rule::BeginWhile(r)) => out.push(r.begin.clone()),
            Some(Rule::IncludeOnly(r)) => {
                // `$self` directly in the root patterns would never end otherwise
                if !in_progress.insert(r.id) {
                    return;
                }
                for pattern in &r.patterns {
                    self.collect_patterns(*pattern, out, in_progress);
                }
                in_progress.remove(&r.id);
            }
            Some(Rule::Capture(_)) | None => (),
        }
    }

    fn collect_children(&self, patterns: &[RuleId], out: &mut RegexSourceList) {
        let mut in_progress = HashSet::new();
        for pattern in patterns {
            self.collect_patterns(*pattern, out, &mut in_progress);
        }
    }

    /// The regexes the tokenizer looks for while `id` is the top of the stack
    fn source_list(&self, id: RuleId) -> RegexSourceList {
        let mut out = RegexSourceList::new();
        match self.get(id) {
            Some(Rule::Match(r)) => out.push(r.match_.clone()),
            Some(Rule::IncludeOnly(_)) => self.collect_patterns(id, &mut out, &mut HashSet::new()),
            Some(Rule::BeginEnd(r)) => {
                self.collect_children(&r.patterns, &mut out);
                if r.apply_end_pattern_last {
                    out.push(r.end.clone());
                } else {
                    out.unshift(r.end.clone());
                }
            }
            Some(Rule::BeginWhile(r)) => self.collect_children(&r.patterns, &mut out),
            Some(Rule::Capture(_)) | None => (),
        }
        out
    }
}

/// Compiled scanners of each rule, for each anchor variant used so far
#[derive(Debug, Default)]
pub struct ScannerCache {
    patterns: HashMap<RuleId, RegexSourceList>,
    while_patterns: HashMap<RuleId, RegexSourceList>,
}

impl ScannerCache {
    /// The scanner to use while `id` is the top of the stack.
    /// `end_rule` is the end pattern of a begin/end rule with its back references resolved.
    pub fn compile(
        &mut self,
        rules: &Rules,
        engine: &dyn RegexEngine,
        id: RuleId,
        end_rule: Option<&str>,
        anchors: AnchorActive,
    ) -> OcraResult<&CompiledScanner> {
        let list = match self.patterns.entry(id) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(rules.source_list(id)),
        };

        if let Some(Rule::BeginEnd(r)) = rules.get(id)
            && r.end_has_back_references
            && let Some(end_rule) = end_rule
        {
            let index = if r.apply_end_pattern_last {
                list.len() - 1
            } else {
                0
            };
            list.set_source(index, end_rule);
        }

        list.compile(engine, anchors)
    }

    /// The scanner checking whether a begin/while rule continues on a new line
    pub fn compile_while(
        &mut self,
        rules: &Rules,
        engine: &dyn RegexEngine,
        id: RuleId,
        end_rule: Option<&str>,
        anchors: AnchorActive,
    ) -> OcraResult<&CompiledScanner> {
        let Some(Rule::BeginWhile(rule)) = rules.get(id) else {
            return self
                .while_patterns
                .entry(id)
                .or_default()
                .compile(engine, anchors);
        };

        let list = self.while_patterns.entry(id).or_insert_with(|| {
            let mut list = RegexSourceList::new();
            list.push(rule.while_.clone());
            list
        });
        if rule.while_has_back_references {
            list.set_source(0, end_rule.unwrap_or("\u{FFFF}"));
        }

        list.compile(engine, anchors)
    }
}

/// A raw grammar ready to be compiled: `$self` is its root patterns and `$base` the root
/// of the grammar tokenization started from.
#[derive(Debug)]
pub(crate) struct InitializedGrammar {
    pub raw: Arc<RawGrammar>,
    pub self_rule: RawRule,
    /// `None` if `$base` is this grammar
    base: Option<Arc<InitializedGrammar>>,
}

impl InitializedGrammar {
    pub fn new(raw: Arc<RawGrammar>, base: Option<Arc<InitializedGrammar>>) -> Self {
        let self_rule = RawRule {
            name: Some(raw.scope_name.clone()),
            patterns: Some(raw.patterns.clone()),
            ..Default::default()
        };
        Self {
            raw,
            self_rule,
            base,
        }
    }

    /// The grammar `$base` refers to
    pub fn base(self: &Arc<Self>) -> Arc<InitializedGrammar> {
        self.base.clone().unwrap_or_else(|| Arc::clone(self))
    }

    pub fn repository(self: &Arc<Self>) -> Repository<'_> {
        let mut rules: HashMap<&str, &RawRule> = self
            .raw
            .repository
            .iter()
            .map(|(name, rule)| (name.as_str(), rule))
            .collect();
        rules.insert("$self", &self.self_rule);
        let base_rule = match &self.base {
            Some(base) => &base.self_rule,
            None => &self.self_rule,
        };
        rules.insert("$base", base_rule);

        Repository {
            rules,
            base: self.base(),
        }
    }
}

/// Repository entries visible from a rule, including `$self` and `$base`
#[derive(Debug, Clone)]
pub(crate) struct Repository<'r> {
    rules: HashMap<&'r str, &'r RawRule>,
    base: Arc<InitializedGrammar>,
}

impl<'r> Repository<'r> {
    pub fn get(&self, name: &str) -> Option<&'r RawRule> {
        self.rules.get(name).copied()
    }

    /// Entries of `other` hide the ones with the same name
    fn merge(&self, other: &'r HashMap<String, RawRule>) -> Repository<'r> {
        let mut rules = self.rules.clone();
        for (name, rule) in other {
            rules.insert(name.as_str(), rule);
        }
        Repository {
            rules,
            base: Arc::clone(&self.base),
        }
    }
}

/// Grammars treat an empty `match`, `end` or `while` as if the key was missing
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Compiles raw rules into [`Rules`], resolving includes along the way.
pub(crate) struct RuleFactory {
    rules: Rules,
    /// Raw rules already compiled, by address. Raw rules all live in `Arc`s kept alive by
    /// the factory so addresses are stable.
    compiled: HashMap<usize, RuleId>,
    base: Arc<InitializedGrammar>,
    included_grammars: HashMap<String, Arc<InitializedGrammar>>,
    grammar_repository: Arc<dyn GrammarRepository>,
}

impl RuleFactory {
    pub fn new(raw: Arc<RawGrammar>, grammar_repository: Arc<dyn GrammarRepository>) -> Self {
        Self {
            rules: Rules::default(),
            compiled: HashMap::new(),
            base: Arc::new(InitializedGrammar::new(raw, None)),
            included_grammars: HashMap::new(),
            grammar_repository,
        }
    }

    pub fn base(&self) -> &Arc<InitializedGrammar> {
        &self.base
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    pub fn grammar_repository(&self) -> &Arc<dyn GrammarRepository> {
        &self.grammar_repository
    }

    pub fn into_rules(self) -> Rules {
        self.rules
    }

    /// Compiles the root patterns of the grammar
    pub fn compile_root(&mut self) -> RuleId {
        let base = Arc::clone(&self.base);
        let repository = base.repository();
        self.compile_rule(&base.self_rule, &repository)
    }

    /// Finds another grammar by scope name. The first lookup decides what its `$base` is.
    pub fn get_external_grammar(
        &mut self,
        scope_name: &str,
        base: Option<Arc<InitializedGrammar>>,
    ) -> Option<Arc<InitializedGrammar>> {
        if scope_name == self.base.raw.scope_name {
            return Some(Arc::clone(&self.base));
        }
        if let Some(grammar) = self.included_grammars.get(scope_name) {
            return Some(Arc::clone(grammar));
        }

        let raw = self.grammar_repository.lookup(scope_name)?;
        let grammar = Arc::new(InitializedGrammar::new(raw, base));
        self.included_grammars
            .insert(scope_name.to_owned(), Arc::clone(&grammar));
        Some(grammar)
    }

    pub fn compile_rule(&mut self, desc: &RawRule, repository: &Repository<'_>) -> RuleId {
        let key = desc as *const RawRule as usize;
        if let Some(id) = self.compiled.get(&key) {
            return *id;
        }

        let id = self.rules.reserve();
        self.compiled.insert(key, id);

        // https://github.com/microsoft/vscode-textmate/blob/f03a6a8790af81372d0e81facae75554ec5e97ef/src/rule.ts#L389-L447
        let rule = if let Some(match_) = non_empty(&desc.match_) {
            Rule::Match(MatchRule {
                id,
                name: ScopeTemplate::new(desc.name.as_deref()),
                match_: RegexSource::new(match_, id),
                captures: self.compile_captures(desc.captures.as_ref(), repository),
            })
        } else if let Some(begin) = &desc.begin {
            let begin_captures = desc.begin_captures.as_ref().or(desc.captures.as_ref());
            let nested_patterns = desc.patterns.as_deref().unwrap_or_default();
            if let Some(while_) = non_empty(&desc.while_) {
                let while_ = RegexSource::new(while_, WHILE_RULE_ID);
                let begin_captures = self.compile_captures(begin_captures, repository);
                let while_captures = self.compile_captures(
                    desc.while_captures.as_ref().or(desc.captures.as_ref()),
                    repository,
                );
                let (patterns, has_missing_patterns) =
                    self.compile_patterns(nested_patterns, repository);
                Rule::BeginWhile(BeginWhileRule {
                    id,
                    name: ScopeTemplate::new(desc.name.as_deref()),
                    content_name: ScopeTemplate::new(desc.content_name.as_deref()),
                    begin: RegexSource::new(begin, id),
                    begin_captures,
                    while_has_back_references: while_.has_back_references(),
                    while_,
                    while_captures,
                    patterns,
                    has_missing_patterns,
                })
            } else {
                // A missing or empty end can never match
                let end = non_empty(&desc.end).unwrap_or("\u{FFFF}");
                let end = RegexSource::new(end, END_RULE_ID);
                let begin_captures = self.compile_captures(begin_captures, repository);
                let end_captures = self.compile_captures(
                    desc.end_captures.as_ref().or(desc.captures.as_ref()),
                    repository,
                );
                let (patterns, has_missing_patterns) =
                    self.compile_patterns(nested_patterns, repository);
                Rule::BeginEnd(BeginEndRule {
                    id,
                    name: ScopeTemplate::new(desc.name.as_deref()),
                    content_name: ScopeTemplate::new(desc.content_name.as_deref()),
                    begin: RegexSource::new(begin, id),
                    begin_captures,
                    end_has_back_references: end.has_back_references(),
                    end,
                    end_captures,
                    apply_end_pattern_last: desc.apply_end_pattern_last,
                    patterns,
                    has_missing_patterns,
                })
            }
        } else {
            let merged;
            let repository = if desc.repository.is_empty() {
                repository
            } else {
                merged = repository.merge(&desc.repository);
                &merged
            };

            // vscode-textmate does something funny here:
            // - if patterns are NOT present and includes are, it moves includes to patterns;
            // - however, if patterns ARE present, includes are ignored
            let include_only;
            let patterns: &[RawRule] = match (&desc.patterns, &desc.include) {
                (Some(patterns), _) => &patterns[..],
                (None, Some(include)) => {
                    include_only = [RawRule {
                        include: Some(include.clone()),
                        ..Default::default()
                    }];
                    &include_only[..]
                }
                (None, None) => &[],
            };
            let (patterns, has_missing_patterns) = self.compile_patterns(patterns, repository);
            Rule::IncludeOnly(IncludeOnlyRule {
                id,
                name: ScopeTemplate::new(desc.name.as_deref()),
                content_name: ScopeTemplate::new(desc.content_name.as_deref()),
                patterns,
                has_missing_patterns,
            })
        };

        self.rules.set(id, rule);
        id
    }

    fn compile_captures(
        &mut self,
        captures: Option<&Captures>,
        repository: &Repository<'_>,
    ) -> Vec<Option<RuleId>> {
        let Some(captures) = captures.filter(|c| !c.is_empty()) else {
            return Vec::new();
        };

        // mdc.json syntax has actually a 912 backref
        let max_capture = captures.keys().max().copied().unwrap_or_default();
        let mut out: Vec<Option<RuleId>> = vec![None; max_capture + 1];

        for (index, desc) in &captures.0 {
            let retokenize_captured_with = if desc.patterns.is_none() {
                None
            } else {
                Some(self.compile_rule(desc, repository))
            };
            let id = self.rules.reserve();
            self.rules.set(
                id,
                Rule::Capture(CaptureRule {
                    id,
                    name: ScopeTemplate::new(desc.name.as_deref()),
                    content_name: ScopeTemplate::new(desc.content_name.as_deref()),
                    retokenize_captured_with,
                }),
            );
            out[*index] = Some(id);
        }

        out
    }

    /// Returns the compiled patterns and whether some of them could not be resolved
    fn compile_patterns(
        &mut self,
        patterns: &[RawRule],
        repository: &Repository<'_>,
    ) -> (Vec<RuleId>, bool) {
        let mut out = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let id = match &pattern.include {
                // vscode ignores other rule contents if there's an include
                Some(include) => self.compile_include(include, repository),
                None => Some(self.compile_rule(pattern, repository)),
            };
            let Some(id) = id else {
                #[cfg(feature = "debug")]
                log::warn!("Could not resolve include {:?}", pattern.include);
                continue;
            };

            // `None` means the rule is being compiled, eg a recursive include
            if self
                .rules
                .get(id)
                .is_some_and(Rule::only_has_missing_patterns)
            {
                continue;
            }
            out.push(id);
        }

        let has_missing_patterns = out.len() != patterns.len();
        (out, has_missing_patterns)
    }

    fn compile_include(&mut self, include: &str, repository: &Repository<'_>) -> Option<RuleId> {
        match parse_include(include) {
            IncludeReference::Base | IncludeReference::Self_ => {
                let desc = repository.get(include)?;
                Some(self.compile_rule(desc, repository))
            }
            IncludeReference::Relative(name) => {
                let desc = repository.get(name)?;
                Some(self.compile_rule(desc, repository))
            }
            IncludeReference::TopLevel(scope_name) => {
                let grammar =
                    self.get_external_grammar(scope_name, Some(Arc::clone(&repository.base)))?;
                let external_repository = grammar.repository();
                Some(self.compile_rule(&grammar.self_rule, &external_repository))
            }
            IncludeReference::TopLevelRepository(scope_name, name) => {
                let grammar =
                    self.get_external_grammar(scope_name, Some(Arc::clone(&repository.base)))?;
                let desc = grammar.raw.repository.get(name)?;
                let external_repository = grammar.repository();
                Some(self.compile_rule(desc, &external_repository))
            }
        }
    }
}

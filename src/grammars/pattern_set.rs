use std::fmt::{self, Debug, Formatter};

use onig::{RegSet, RegexOptions, SearchOptions};

use crate::error::{Error, OcraResult};
use crate::grammars::compiled::RuleId;
use crate::grammars::regex::RegexSource;
use crate::tokenizer::AnchorActive;

/// Byte offsets of each capture group of a match, `None` for groups that didn't participate.
/// Index 0 is the whole match.
pub type CapturePositions = Vec<Option<(usize, usize)>>;

/// A compiled list of regexes that can find the earliest match of any of them.
pub trait Scanner: Debug {
    /// Finds the leftmost match starting at or after `start`, returning the index of the
    /// regex that matched and its capture positions.
    /// Ties are won by the regex that comes first in the list.
    fn find_next_match(&self, text: &str, start: usize) -> Option<(usize, CapturePositions)>;
}

/// Compiles lists of regexes into scanners
pub trait RegexEngine: Send + Sync {
    fn create_scanner(&self, sources: &[&str]) -> OcraResult<Box<dyn Scanner>>;
}

/// The default engine, using an oniguruma `RegSet`
#[derive(Debug, Clone, Copy, Default)]
pub struct OnigEngine;

impl RegexEngine for OnigEngine {
    fn create_scanner(&self, sources: &[&str]) -> OcraResult<Box<dyn Scanner>> {
        if sources.is_empty() {
            return Ok(Box::new(OnigScanner {
                regset: None,
                pattern_count: 0,
            }));
        }

        #[cfg(feature = "debug")]
        log::debug!("Compiling a scanner of {} pattern(s)", sources.len());

        let regset = RegSet::with_options(sources, RegexOptions::REGEX_OPTION_CAPTURE_GROUP)
            .map_err(|e| Error::InvalidRegex {
                patterns: sources.iter().map(|s| s.to_string()).collect(),
                message: e.to_string(),
            })?;

        Ok(Box::new(OnigScanner {
            regset: Some(regset),
            pattern_count: sources.len(),
        }))
    }
}

struct OnigScanner {
    /// `None` when there are no patterns, which never matches
    regset: Option<RegSet>,
    pattern_count: usize,
}

impl Scanner for OnigScanner {
    fn find_next_match(&self, text: &str, start: usize) -> Option<(usize, CapturePositions)> {
        let regset = self.regset.as_ref()?;

        // We need to specify pos/text.len() because some regex might do lookbehind
        let (pattern_index, captures) = regset.captures_with_options(
            text,
            start,
            text.len(),
            onig::RegSetLead::Position,
            SearchOptions::SEARCH_OPTION_NONE,
        )?;
        captures.pos(0)?;

        let capture_pos = (0..captures.len()).map(|i| captures.pos(i)).collect();
        Some((pattern_index, capture_pos))
    }
}

impl Debug for OnigScanner {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "OnigScanner({} patterns)", self.pattern_count)
    }
}

/// A scanner along with the rule each of its regexes belongs to
#[derive(Debug)]
pub struct CompiledScanner {
    scanner: Box<dyn Scanner>,
    rule_ids: Vec<RuleId>,
}

impl CompiledScanner {
    pub fn find_next_match(&self, text: &str, start: usize) -> Option<(RuleId, CapturePositions)> {
        let (index, captures) = self.scanner.find_next_match(text, start)?;
        let rule_id = *self.rule_ids.get(index)?;
        Some((rule_id, captures))
    }

    pub fn rule_ids(&self) -> &[RuleId] {
        &self.rule_ids
    }
}

/// The regexes a rule can match, in the order they are tried, compiled lazily for each
/// anchor variant that gets used.
#[derive(Debug, Default)]
pub struct RegexSourceList {
    items: Vec<RegexSource>,
    has_anchors: bool,
    /// Indexed by [`AnchorActive::index`], only slot 0 is used without anchors
    cached: [Option<CompiledScanner>; 4],
}

impl RegexSourceList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: RegexSource) {
        self.has_anchors = self.has_anchors || item.has_anchor();
        self.items.push(item);
    }

    pub fn unshift(&mut self, item: RegexSource) {
        self.has_anchors = self.has_anchors || item.has_anchor();
        self.items.insert(0, item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Used for end/while patterns with back references, which change with each begin match.
    pub fn set_source(&mut self, index: usize, source: &str) {
        let Some(item) = self.items.get_mut(index) else {
            return;
        };
        if item.set_source(source) {
            self.cached = Default::default();
        }
    }

    pub fn compile(
        &mut self,
        engine: &dyn RegexEngine,
        anchors: AnchorActive,
    ) -> OcraResult<&CompiledScanner> {
        let index = if self.has_anchors { anchors.index() } else { 0 };

        let scanner = match self.cached[index].take() {
            Some(scanner) => scanner,
            None => {
                let sources: Vec<&str> = self
                    .items
                    .iter()
                    .map(|item| item.resolve_anchors(anchors))
                    .collect();
                CompiledScanner {
                    scanner: engine.create_scanner(&sources)?,
                    rule_ids: self.items.iter().map(|item| item.rule_id()).collect(),
                }
            }
        };

        Ok(self.cached[index].insert(scanner))
    }
}

impl Clone for RegexSourceList {
    /// The clone needs to compile its own scanners
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            has_anchors: self.has_anchors,
            cached: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leftmost_match_wins_then_list_order() {
        let scanner = OnigEngine.create_scanner(&["b+", "a(b)?", "ab"]).unwrap();

        let (index, captures) = scanner.find_next_match("xxabb", 0).unwrap();
        assert_eq!(index, 1);
        assert_eq!(captures, vec![Some((2, 4)), Some((3, 4))]);

        let (index, _) = scanner.find_next_match("xxabb", 4).unwrap();
        assert_eq!(index, 0);
        assert!(scanner.find_next_match("xxx", 0).is_none());

        let empty = OnigEngine.create_scanner(&[]).unwrap();
        assert!(empty.find_next_match("anything", 0).is_none());
    }

    #[test]
    fn test_lookbehind_sees_text_before_start() {
        let scanner = OnigEngine.create_scanner(&["(?<=a)b"]).unwrap();
        let (_, captures) = scanner.find_next_match("ab", 1).unwrap();
        assert_eq!(captures[0], Some((1, 2)));
    }

    #[test]
    fn test_invalid_regex() {
        let err = OnigEngine.create_scanner(&["a", "(unclosed"]).unwrap_err();
        assert!(matches!(err, Error::InvalidRegex { patterns, .. } if patterns.len() == 2));
    }

    #[test]
    fn test_source_list_anchor_variants() {
        let mut list = RegexSourceList::new();
        list.push(RegexSource::new(r"\Gx", RuleId(2)));
        list.unshift(RegexSource::new("y", RuleId(1)));
        assert_eq!(list.len(), 2);

        let text = "ax";
        let with_g = list.compile(&OnigEngine, AnchorActive::G).unwrap();
        assert_eq!(with_g.rule_ids(), &[RuleId(1), RuleId(2)]);
        assert_eq!(
            with_g.find_next_match(text, 1).map(|(id, _)| id),
            Some(RuleId(2))
        );
        let without_g = list.compile(&OnigEngine, AnchorActive::None).unwrap();
        assert_eq!(without_g.find_next_match(text, 1), None);

        list.set_source(0, "a");
        let changed = list.compile(&OnigEngine, AnchorActive::None).unwrap();
        assert_eq!(
            changed.find_next_match(text, 0).map(|(id, _)| id),
            Some(RuleId(1))
        );
    }
}

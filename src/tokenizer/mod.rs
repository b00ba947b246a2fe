//! This file replicates the logic of <https://github.com/microsoft/vscode-textmate>

use std::time::Instant;

use crate::error::OcraResult;
use crate::grammars::{
    CapturePositions, END_RULE_ID, Injection, RegexEngine, Rule, RuleId, Rules, ScannerCache,
    WHILE_RULE_ID,
};
use crate::scope::{AttributedScopeStack, ScopeAttributes};
use crate::selector::Priority;

mod anchors;
mod stack;
mod tokens;

pub use anchors::AnchorActive;
pub use stack::StateStack;
pub use tokens::{BalancedBracketSelectors, Token};
pub(crate) use tokens::{LineTokens, TokenTypeMatcher};

#[derive(Debug)]
struct RuleMatch {
    rule_id: RuleId,
    captures: CapturePositions,
}

impl RuleMatch {
    fn start(&self) -> usize {
        self.captures.first().copied().flatten().map_or(0, |(start, _)| start)
    }

    fn end(&self) -> usize {
        self.captures.first().copied().flatten().map_or(0, |(_, end)| end)
    }
}

struct WhileCheckResult {
    stack: StateStack,
    pos: usize,
    anchor_position: Option<usize>,
    is_first_line: bool,
}

/// Tokenizes lines with the compiled rules of a grammar.
///
/// Only borrows what it needs from the grammar: the scanners are compiled on first use so
/// they need a mutable borrow.
pub(crate) struct Tokenizer<'g> {
    pub rules: &'g Rules,
    pub injections: &'g [Injection],
    pub attributes: &'g ScopeAttributes,
    pub engine: &'g dyn RegexEngine,
    pub scanners: &'g mut ScannerCache,
}

impl Tokenizer<'_> {
    fn match_rule(
        &mut self,
        line: &str,
        is_first_line: bool,
        pos: usize,
        stack: &StateStack,
        anchor_position: Option<usize>,
    ) -> OcraResult<Option<RuleMatch>> {
        let anchors = AnchorActive::new(is_first_line, anchor_position == Some(pos));
        let scanner = self.scanners.compile(
            self.rules,
            self.engine,
            stack.rule_id(),
            stack.end_rule(),
            anchors,
        )?;
        Ok(scanner
            .find_next_match(line, pos)
            .map(|(rule_id, captures)| RuleMatch { rule_id, captures }))
    }

    /// Returns the earliest injection match and its priority.
    /// Injections are sorted by priority so `L:` ones win ties between injections.
    fn match_injections(
        &mut self,
        line: &str,
        is_first_line: bool,
        pos: usize,
        stack: &StateStack,
        anchor_position: Option<usize>,
    ) -> OcraResult<Option<(Priority, RuleMatch)>> {
        let injections = self.injections;
        let scopes = stack.content_name_scopes().scope_names();
        let anchors = AnchorActive::new(is_first_line, anchor_position == Some(pos));
        let mut best_match: Option<(Priority, RuleMatch)> = None;

        for injection in injections {
            if !injection.matches(&scopes) {
                continue;
            }
            let scanner =
                self.scanners
                    .compile(self.rules, self.engine, injection.rule_id, None, anchors)?;
            let Some((rule_id, captures)) = scanner.find_next_match(line, pos) else {
                continue;
            };
            let found = RuleMatch { rule_id, captures };

            if best_match
                .as_ref()
                .is_some_and(|(_, best)| found.start() >= best.start())
            {
                continue;
            }
            let is_done = found.start() == pos;
            best_match = Some((injection.priority, found));
            if is_done {
                break;
            }
        }

        Ok(best_match)
    }

    /// An injection wins if it matches earlier than the rule, or at the same position if
    /// it is a `L:` injection.
    fn match_rule_or_injections(
        &mut self,
        line: &str,
        is_first_line: bool,
        pos: usize,
        stack: &StateStack,
        anchor_position: Option<usize>,
    ) -> OcraResult<Option<RuleMatch>> {
        let regular_match = self.match_rule(line, is_first_line, pos, stack, anchor_position)?;
        if self.injections.is_empty() {
            return Ok(regular_match);
        }

        let injection_match =
            self.match_injections(line, is_first_line, pos, stack, anchor_position)?;

        match (regular_match, injection_match) {
            (regular, None) => Ok(regular),
            (None, Some((_, injection))) => Ok(Some(injection)),
            (Some(regular), Some((priority, injection))) => {
                if injection.start() < regular.start()
                    || (injection.start() == regular.start() && priority == Priority::Left)
                {
                    Ok(Some(injection))
                } else {
                    Ok(Some(regular))
                }
            }
        }
    }

    /// Checks the while conditions of every begin/while rule on the stack, outermost first.
    /// The stack is cut below the first rule whose condition doesn't hold anymore.
    fn check_while_conditions(
        &mut self,
        line: &str,
        mut is_first_line: bool,
        mut pos: usize,
        stack: StateStack,
        tokens: &mut LineTokens<'_>,
    ) -> OcraResult<WhileCheckResult> {
        let rules = self.rules;
        let mut anchor_position = if stack.begin_rule_captured_eol() {
            Some(0)
        } else {
            None
        };

        let mut while_stacks = Vec::new();
        let mut node = Some(stack.clone());
        while let Some(current) = node {
            if let Some(Rule::BeginWhile(_)) = rules.get(current.rule_id()) {
                while_stacks.push(current.clone());
            }
            node = current.pop();
        }

        let mut stack = stack;
        while let Some(while_stack) = while_stacks.pop() {
            let Some(Rule::BeginWhile(rule)) = rules.get(while_stack.rule_id()) else {
                continue;
            };
            let anchors = AnchorActive::new(is_first_line, anchor_position == Some(pos));
            let scanner = self.scanners.compile_while(
                rules,
                self.engine,
                while_stack.rule_id(),
                while_stack.end_rule(),
                anchors,
            )?;

            let Some((rule_id, captures)) = scanner.find_next_match(line, pos) else {
                #[cfg(feature = "debug")]
                log::debug!(
                    "[check_while_conditions] while condition of rule {} failed, popping",
                    while_stack.rule_id().0
                );
                stack = while_stack.safe_pop();
                break;
            };
            if rule_id != WHILE_RULE_ID {
                stack = while_stack.safe_pop();
                break;
            }

            let Some((start, end)) = captures.first().copied().flatten() else {
                continue;
            };
            tokens.produce(&while_stack, start);
            self.handle_captures(
                line,
                is_first_line,
                &while_stack,
                tokens,
                &rule.while_captures,
                &captures,
            )?;
            tokens.produce(&while_stack, end);
            anchor_position = Some(end);
            if end > pos {
                pos = end;
                is_first_line = false;
            }
        }

        Ok(WhileCheckResult {
            stack,
            pos,
            anchor_position,
            is_first_line,
        })
    }

    /// Produces the tokens of the capture groups of a match.
    /// Captures can be nested, the ones still open are kept in a local stack.
    fn handle_captures(
        &mut self,
        line: &str,
        is_first_line: bool,
        stack: &StateStack,
        tokens: &mut LineTokens<'_>,
        capture_rules: &[Option<RuleId>],
        captures: &[Option<(usize, usize)>],
    ) -> OcraResult<()> {
        if capture_rules.is_empty() {
            return Ok(());
        }
        let Some((_, max_end)) = captures.first().copied().flatten() else {
            return Ok(());
        };

        let rules = self.rules;
        let mut local_stack: Vec<(AttributedScopeStack, usize)> = Vec::with_capacity(2);

        for (capture_rule_id, capture) in capture_rules.iter().zip(captures) {
            let (Some(capture_rule_id), Some((start, end))) = (capture_rule_id, *capture) else {
                continue;
            };
            // Nothing captured
            if start == end {
                continue;
            }
            // Lookaheads can capture after the end of the match
            if start > max_end {
                break;
            }

            while let Some((scopes, end_pos)) = local_stack.last()
                && *end_pos <= start
            {
                tokens.produce_from_scopes(scopes, *end_pos);
                local_stack.pop();
            }

            match local_stack.last() {
                Some((scopes, _)) => tokens.produce_from_scopes(scopes, start),
                None => tokens.produce(stack, start),
            }

            let Some(Rule::Capture(capture_rule)) = rules.get(*capture_rule_id) else {
                continue;
            };

            if let Some(retokenize_with) = capture_rule.retokenize_captured_with {
                let name = capture_rule.name.resolve(line, Some(captures));
                let name_scopes = stack
                    .content_name_scopes()
                    .push_attributed(name.as_deref(), self.attributes);
                let content_name = capture_rule.content_name.resolve(line, Some(captures));
                let content_name_scopes =
                    name_scopes.push_attributed(content_name.as_deref(), self.attributes);
                let retokenization_stack = stack.push(
                    retokenize_with,
                    Some(start),
                    None,
                    false,
                    None,
                    name_scopes,
                    content_name_scopes,
                );

                #[cfg(feature = "debug")]
                log::debug!(
                    "[handle_captures] Retokenizing capture [{start}..{end}]: {:?}",
                    &line[start..end]
                );
                self.tokenize_string(
                    &line[..end],
                    is_first_line && start == 0,
                    start,
                    retokenization_stack,
                    tokens,
                    false,
                    None,
                )?;
                continue;
            }

            if let Some(name) = capture_rule.name.resolve(line, Some(captures)) {
                let base = match local_stack.last() {
                    Some((scopes, _)) => scopes,
                    None => stack.content_name_scopes(),
                };
                let scopes = base.push_attributed(Some(name.as_ref()), self.attributes);
                local_stack.push((scopes, end));
            }
        }

        while let Some((scopes, end_pos)) = local_stack.pop() {
            tokens.produce_from_scopes(&scopes, end_pos);
        }

        Ok(())
    }

    /// Tokenizes `line` from `pos`, returning the stack at the end and whether the deadline
    /// was reached before the end of the line.
    ///
    /// Grammars that push/pop rules without advancing would loop forever: when that
    /// happens, the rest of the line becomes a single token.
    #[allow(clippy::too_many_arguments)]
    pub fn tokenize_string(
        &mut self,
        line: &str,
        mut is_first_line: bool,
        mut pos: usize,
        mut stack: StateStack,
        tokens: &mut LineTokens<'_>,
        check_while_conditions: bool,
        deadline: Option<Instant>,
    ) -> OcraResult<(StateStack, bool)> {
        let line_len = line.len();
        let mut anchor_position = None;

        // 1. We check if the while patterns are still truthy
        if check_while_conditions {
            let result = self.check_while_conditions(line, is_first_line, pos, stack, tokens)?;
            stack = result.stack;
            pos = result.pos;
            anchor_position = result.anchor_position;
            is_first_line = result.is_first_line;
        }

        // 2. We look for matches until the end of the line
        loop {
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                #[cfg(feature = "debug")]
                log::debug!("[tokenize_string] time limit reached at {pos}");
                return Ok((stack, true));
            }

            #[cfg(feature = "debug")]
            log::trace!("[tokenize_string] Scanning {pos}: |{:?}|", &line[pos..]);

            let Some(m) =
                self.match_rule_or_injections(line, is_first_line, pos, &stack, anchor_position)?
            else {
                #[cfg(feature = "debug")]
                log::debug!("[tokenize_string] no more matches");
                tokens.produce(&stack, line_len);
                break;
            };

            let (start, end) = (m.start(), m.end());
            let has_advanced = end > pos;
            let rules = self.rules;

            if m.rule_id == END_RULE_ID {
                let end_captures: &[Option<RuleId>] = match rules.get(stack.rule_id()) {
                    Some(Rule::BeginEnd(rule)) => &rule.end_captures,
                    _ => &[],
                };

                tokens.produce(&stack, start);
                stack = stack.with_content_name_scopes(stack.name_scopes().clone());
                self.handle_captures(line, is_first_line, &stack, tokens, end_captures, &m.captures)?;
                tokens.produce(&stack, end);

                let popped = stack;
                #[cfg(feature = "debug")]
                log::debug!("[tokenize_string] End rule matched, popping rule {}", popped.rule_id().0);
                stack = popped.safe_pop();
                anchor_position = popped.anchor_position();

                // Grammar pushed & popped a rule without advancing.
                // See https://github.com/Microsoft/vscode-textmate/issues/12
                // Like vscode-textmate, we assume the grammar author meant to stay in that rule.
                if !has_advanced && popped.enter_position() == Some(pos) {
                    #[cfg(feature = "debug")]
                    log::debug!("[tokenize_string] rule popped without advancing, restoring it");
                    stack = popped;
                    tokens.produce(&stack, line_len);
                    break;
                }
            } else {
                let Some(rule) = rules.get(m.rule_id) else {
                    tokens.produce(&stack, line_len);
                    break;
                };

                tokens.produce(&stack, start);
                let before_push = stack.clone();
                let name = rule.name().resolve(line, Some(m.captures.as_slice()));
                let name_scopes = stack
                    .content_name_scopes()
                    .push_attributed(name.as_deref(), self.attributes);
                stack = stack.push(
                    m.rule_id,
                    Some(pos),
                    anchor_position,
                    end == line_len,
                    None,
                    name_scopes.clone(),
                    name_scopes.clone(),
                );

                let begin = match rule {
                    Rule::BeginEnd(r) => Some((
                        &r.begin_captures,
                        &r.content_name,
                        r.end_has_back_references.then_some(&r.end),
                    )),
                    Rule::BeginWhile(r) => Some((
                        &r.begin_captures,
                        &r.content_name,
                        r.while_has_back_references.then_some(&r.while_),
                    )),
                    _ => None,
                };

                if let Some((begin_captures, content_name, end_with_back_references)) = begin {
                    #[cfg(feature = "debug")]
                    log::debug!(
                        "[tokenize_string] Pushing begin rule {} ({:?})",
                        m.rule_id.0,
                        rule.name().raw()
                    );
                    self.handle_captures(
                        line,
                        is_first_line,
                        &stack,
                        tokens,
                        begin_captures,
                        &m.captures,
                    )?;
                    tokens.produce(&stack, end);
                    anchor_position = Some(end);

                    let content_name = content_name.resolve(line, Some(m.captures.as_slice()));
                    let content_name_scopes =
                        name_scopes.push_attributed(content_name.as_deref(), self.attributes);
                    stack = stack.with_content_name_scopes(content_name_scopes);
                    if let Some(source) = end_with_back_references {
                        stack = stack.with_end_rule(source.resolve_back_references(line, &m.captures));
                    }

                    // Grammar pushed the same rule without advancing
                    if !has_advanced && before_push.has_same_rule_as(&stack) {
                        #[cfg(feature = "debug")]
                        log::debug!("[tokenize_string] rule pushed again without advancing, stopping");
                        stack = stack.safe_pop();
                        tokens.produce(&stack, line_len);
                        break;
                    }
                } else if let Rule::Match(r) = rule {
                    #[cfg(feature = "debug")]
                    log::debug!("[tokenize_string] Matched rule {} ({:?})", m.rule_id.0, r.name.raw());
                    self.handle_captures(line, is_first_line, &stack, tokens, &r.captures, &m.captures)?;
                    tokens.produce(&stack, end);
                    // Match rules are popped immediately
                    stack = stack.safe_pop();

                    // Grammar is not advancing, nor is it pushing/popping
                    if !has_advanced {
                        #[cfg(feature = "debug")]
                        log::warn!("Match rule didn't advance, safe_pop and stop");
                        stack = stack.safe_pop();
                        tokens.produce(&stack, line_len);
                        break;
                    }
                } else {
                    // Include only and capture rules are never part of a scanner
                    stack = stack.safe_pop();
                    tokens.produce(&stack, line_len);
                    break;
                }
            }

            if has_advanced {
                pos = end;
                is_first_line = false;
            }
        }

        Ok((stack, false))
    }
}

use std::fmt;
use std::sync::Arc;

use crate::grammars::RuleId;
use crate::scope::AttributedScopeStack;

struct StackFrame {
    parent: Option<StateStack>,
    /// Number of frames up to the root, which has a depth of 1
    depth: usize,
    /// The rule that created this frame
    rule_id: RuleId,
    /// Where the rule was entered during the current line, used to detect rules pushed and
    /// popped without advancing. `None` on a new line.
    enter_position: Option<usize>,
    /// Where `\G` is allowed to match during the current line. `None` on a new line.
    anchor_position: Option<usize>,
    /// The begin match of this rule included the `\n` at the end of the line
    begin_rule_captured_eol: bool,
    /// The end/while pattern with its back references resolved
    end_rule: Option<String>,
    /// Scopes of the begin/end delimiters
    name_scopes: AttributedScopeStack,
    /// Scopes of what is between the delimiters
    content_name_scopes: AttributedScopeStack,
}

/// The state of the tokenizer at the end of a line, to pass when tokenizing the next one.
///
/// Frames are never modified once created: pushing allocates a new frame pointing at its
/// parent so a stack returned for an earlier line stays valid.
#[derive(Clone)]
pub struct StateStack(Arc<StackFrame>);

impl StateStack {
    pub(crate) fn new(rule_id: RuleId, scopes: AttributedScopeStack) -> Self {
        Self(Arc::new(StackFrame {
            parent: None,
            depth: 1,
            rule_id,
            enter_position: None,
            anchor_position: None,
            begin_rule_captured_eol: false,
            end_rule: None,
            name_scopes: scopes.clone(),
            content_name_scopes: scopes,
        }))
    }

    /// Called when entering a rule: when a begin pattern matches, when a match rule matches
    /// and when retokenizing a capture.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub(crate) fn push(
        &self,
        rule_id: RuleId,
        enter_position: Option<usize>,
        anchor_position: Option<usize>,
        begin_rule_captured_eol: bool,
        end_rule: Option<String>,
        name_scopes: AttributedScopeStack,
        content_name_scopes: AttributedScopeStack,
    ) -> Self {
        Self(Arc::new(StackFrame {
            parent: Some(self.clone()),
            depth: self.0.depth + 1,
            rule_id,
            enter_position,
            anchor_position,
            begin_rule_captured_eol,
            end_rule,
            name_scopes,
            content_name_scopes,
        }))
    }

    /// The parent state, `None` for the root
    pub fn pop(&self) -> Option<StateStack> {
        self.0.parent.clone()
    }

    /// Pops but never goes below the root
    #[must_use]
    pub fn safe_pop(&self) -> StateStack {
        self.pop().unwrap_or_else(|| self.clone())
    }

    fn with_frame(&self, f: impl FnOnce(&mut StackFrame)) -> StateStack {
        let mut frame = StackFrame {
            parent: self.0.parent.clone(),
            depth: self.0.depth,
            rule_id: self.0.rule_id,
            enter_position: self.0.enter_position,
            anchor_position: self.0.anchor_position,
            begin_rule_captured_eol: self.0.begin_rule_captured_eol,
            end_rule: self.0.end_rule.clone(),
            name_scopes: self.0.name_scopes.clone(),
            content_name_scopes: self.0.content_name_scopes.clone(),
        };
        f(&mut frame);
        StateStack(Arc::new(frame))
    }

    #[must_use]
    pub(crate) fn with_content_name_scopes(&self, scopes: AttributedScopeStack) -> StateStack {
        if self.0.content_name_scopes == scopes {
            return self.clone();
        }
        self.with_frame(|frame| frame.content_name_scopes = scopes)
    }

    #[must_use]
    pub(crate) fn with_end_rule(&self, end_rule: String) -> StateStack {
        if self.0.end_rule.as_deref() == Some(end_rule.as_str()) {
            return self.clone();
        }
        self.with_frame(|frame| frame.end_rule = Some(end_rule))
    }

    /// Forgets the positions of the previous line.
    /// Frames that have nothing to forget are shared with `self`.
    #[must_use]
    pub(crate) fn reset(&self) -> StateStack {
        let parent = self.0.parent.as_ref().map(StateStack::reset);
        let same_parent = match (&parent, &self.0.parent) {
            (Some(new), Some(old)) => Arc::ptr_eq(&new.0, &old.0),
            _ => true,
        };
        if same_parent && self.0.enter_position.is_none() && self.0.anchor_position.is_none() {
            return self.clone();
        }

        self.with_frame(|frame| {
            frame.parent = parent;
            frame.enter_position = None;
            frame.anchor_position = None;
        })
    }

    /// Whether a frame entered at the same position as `other` already has its rule,
    /// ie a rule was pushed again without advancing.
    pub(crate) fn has_same_rule_as(&self, other: &StateStack) -> bool {
        let mut item = Some(self);
        while let Some(stack) = item
            && stack.0.enter_position == other.0.enter_position
        {
            if stack.0.rule_id == other.0.rule_id {
                return true;
            }
            item = stack.0.parent.as_ref();
        }
        false
    }

    pub fn parent(&self) -> Option<&StateStack> {
        self.0.parent.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.0.depth
    }

    pub fn rule_id(&self) -> RuleId {
        self.0.rule_id
    }

    pub fn enter_position(&self) -> Option<usize> {
        self.0.enter_position
    }

    pub fn anchor_position(&self) -> Option<usize> {
        self.0.anchor_position
    }

    pub fn begin_rule_captured_eol(&self) -> bool {
        self.0.begin_rule_captured_eol
    }

    pub fn end_rule(&self) -> Option<&str> {
        self.0.end_rule.as_deref()
    }

    pub fn name_scopes(&self) -> &AttributedScopeStack {
        &self.0.name_scopes
    }

    pub fn content_name_scopes(&self) -> &AttributedScopeStack {
        &self.0.content_name_scopes
    }

    /// Same rules, end rules and depth all the way to the root
    fn structural_equals(&self, other: &StateStack) -> bool {
        let mut a = Some(self);
        let mut b = Some(other);
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if Arc::ptr_eq(&x.0, &y.0) {
                        return true;
                    }
                    if x.0.depth != y.0.depth
                        || x.0.rule_id != y.0.rule_id
                        || x.0.end_rule != y.0.end_rule
                    {
                        return false;
                    }
                    a = x.parent();
                    b = y.parent();
                }
                _ => return false,
            }
        }
    }
}

impl PartialEq for StateStack {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.structural_equals(other) && self.0.content_name_scopes == other.0.content_name_scopes
    }
}

impl Eq for StateStack {}

impl fmt::Debug for StateStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut frames = Vec::with_capacity(self.0.depth);
        let mut item = Some(self);
        while let Some(stack) = item {
            frames.push(stack);
            item = stack.parent();
        }

        writeln!(f, "StateStack:")?;
        for (depth, stack) in frames.iter().rev().enumerate() {
            let frame = &stack.0;
            write!(
                f,
                "{}rule={} content=[{}]",
                "  ".repeat(depth),
                frame.rule_id.0,
                frame.content_name_scopes.scope_path()
            )?;
            if let Some(end_rule) = &frame.end_rule {
                write!(f, ", end_rule={end_rule:?}")?;
            }
            if let Some(pos) = frame.enter_position {
                write!(f, ", enter_pos={pos}")?;
            }
            if let Some(pos) = frame.anchor_position {
                write!(f, ", anchor_pos={pos}")?;
            }
            if frame.begin_rule_captured_eol {
                write!(f, ", captured_eol")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

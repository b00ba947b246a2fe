use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use crate::error::OcraResult;
use crate::scope::ScopeStack;
use crate::selector::scopes_are_matching;
use crate::themes::FontStyle;
use crate::themes::color::ColorMap;
use crate::themes::raw::{ParsedThemeRule, RawTheme, parse_theme};

/// The style a theme gives to a scope. Colors are ids in the theme color map,
/// 0 and `None` meaning "not set by this rule".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleAttributes {
    pub font_style: Option<FontStyle>,
    pub foreground_id: u32,
    pub background_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ThemeTrieElementRule {
    scope_depth: usize,
    /// Closest ancestor first, can contain `>` for direct parents
    parent_scopes: Vec<String>,
    font_style: Option<FontStyle>,
    foreground: u32,
    background: u32,
}

impl ThemeTrieElementRule {
    fn accept_overwrite(
        &mut self,
        scope_depth: usize,
        font_style: Option<FontStyle>,
        foreground: u32,
        background: u32,
    ) {
        if self.scope_depth <= scope_depth {
            self.scope_depth = scope_depth;
        }
        if font_style.is_some() {
            self.font_style = font_style;
        }
        if foreground != 0 {
            self.foreground = foreground;
        }
        if background != 0 {
            self.background = background;
        }
    }

    fn style(&self) -> StyleAttributes {
        StyleAttributes {
            font_style: self.font_style,
            foreground_id: self.foreground,
            background_id: self.background,
        }
    }
}

/// Deeper rules first, then the ones with longer parent scopes, then the ones with more
/// parent scopes.
fn cmp_by_specificity(a: &ThemeTrieElementRule, b: &ThemeTrieElementRule) -> Ordering {
    if a.scope_depth != b.scope_depth {
        return b.scope_depth.cmp(&a.scope_depth);
    }

    let mut a_index = 0;
    let mut b_index = 0;
    loop {
        if a.parent_scopes.get(a_index).is_some_and(|s| s == ">") {
            a_index += 1;
        }
        if b.parent_scopes.get(b_index).is_some_and(|s| s == ">") {
            b_index += 1;
        }
        let (Some(a_scope), Some(b_scope)) =
            (a.parent_scopes.get(a_index), b.parent_scopes.get(b_index))
        else {
            break;
        };
        let diff = b_scope.len().cmp(&a_scope.len());
        if diff != Ordering::Equal {
            return diff;
        }
        a_index += 1;
        b_index += 1;
    }

    b.parent_scopes.len().cmp(&a.parent_scopes.len())
}

/// One node per dotted segment: `string.quoted` lives at `string` -> `quoted`.
#[derive(Debug, Clone)]
pub(crate) struct ThemeTrieElement {
    main_rule: ThemeTrieElementRule,
    rules_with_parent_scopes: Vec<ThemeTrieElementRule>,
    children: HashMap<String, ThemeTrieElement>,
}

impl ThemeTrieElement {
    fn new(main_rule: ThemeTrieElementRule, rules_with_parent_scopes: Vec<ThemeTrieElementRule>) -> Self {
        Self {
            main_rule,
            rules_with_parent_scopes,
            children: HashMap::new(),
        }
    }

    /// All the rules that can apply to `scope`, most specific first
    pub fn match_scope(&self, scope: &str) -> Vec<ThemeTrieElementRule> {
        if !scope.is_empty() {
            let (head, tail) = scope.split_once('.').unwrap_or((scope, ""));
            if let Some(child) = self.children.get(head) {
                return child.match_scope(tail);
            }
        }

        let mut rules = self.rules_with_parent_scopes.clone();
        rules.push(self.main_rule.clone());
        // stable, equally specific rules keep their insertion order
        rules.sort_by(cmp_by_specificity);
        rules
    }

    pub fn insert(
        &mut self,
        scope_depth: usize,
        scope: &str,
        parent_scopes: &[String],
        font_style: Option<FontStyle>,
        foreground: u32,
        background: u32,
    ) {
        if scope.is_empty() {
            self.insert_here(scope_depth, parent_scopes, font_style, foreground, background);
            return;
        }

        let (head, tail) = scope.split_once('.').unwrap_or((scope, ""));
        // A new child starts as a copy of its parent: styles are inherited once, when the
        // child is created
        let child = self.children.entry(head.to_owned()).or_insert_with(|| {
            ThemeTrieElement::new(
                self.main_rule.clone(),
                self.rules_with_parent_scopes.clone(),
            )
        });
        child.insert(
            scope_depth + 1,
            tail,
            parent_scopes,
            font_style,
            foreground,
            background,
        );
    }

    fn insert_here(
        &mut self,
        scope_depth: usize,
        parent_scopes: &[String],
        mut font_style: Option<FontStyle>,
        mut foreground: u32,
        mut background: u32,
    ) {
        if parent_scopes.is_empty() {
            self.main_rule
                .accept_overwrite(scope_depth, font_style, foreground, background);
            return;
        }

        if let Some(rule) = self
            .rules_with_parent_scopes
            .iter_mut()
            .find(|r| r.parent_scopes == parent_scopes)
        {
            rule.accept_overwrite(scope_depth, font_style, foreground, background);
            return;
        }

        if font_style.is_none() {
            font_style = self.main_rule.font_style;
        }
        if foreground == 0 {
            foreground = self.main_rule.foreground;
        }
        if background == 0 {
            background = self.main_rule.background;
        }
        self.rules_with_parent_scopes.push(ThemeTrieElementRule {
            scope_depth,
            parent_scopes: parent_scopes.to_vec(),
            font_style,
            foreground,
            background,
        });
    }
}

fn scope_path_matches_parent_scopes(
    mut scope_path: Option<&ScopeStack>,
    parent_scopes: &[String],
) -> bool {
    let mut index = 0;
    while index < parent_scopes.len() {
        let mut scope_pattern = parent_scopes[index].as_str();
        let mut must_match = false;

        if scope_pattern == ">" {
            if index == parent_scopes.len() - 1 {
                return false;
            }
            index += 1;
            scope_pattern = parent_scopes[index].as_str();
            must_match = true;
        }

        loop {
            let Some(path) = scope_path else {
                return false;
            };
            if scopes_are_matching(path.scope_name(), scope_pattern) {
                break;
            }
            if must_match {
                return false;
            }
            scope_path = path.parent();
        }

        scope_path = scope_path.and_then(|p| p.parent());
        index += 1;
    }

    true
}

fn strs_cmp(a: &[String], b: &[String]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// A theme compiled into a trie of scope segments
pub struct Theme {
    color_map: ColorMap,
    defaults: StyleAttributes,
    root: ThemeTrieElement,
    /// Rules matching a given scope name, most specific first
    cache: papaya::HashMap<String, Vec<ThemeTrieElementRule>>,
}

impl Theme {
    /// Compiles a theme. Passing a color map freezes the color ids: any color of the
    /// theme missing from it is an error.
    pub fn from_raw(raw: &RawTheme, color_map: Option<&[String]>) -> OcraResult<Self> {
        let color_map = match color_map {
            Some(colors) => ColorMap::frozen(colors),
            None => ColorMap::new(),
        };
        Self::from_parsed_rules(parse_theme(raw), color_map)
    }

    fn from_parsed_rules(
        mut rules: Vec<ParsedThemeRule>,
        mut color_map: ColorMap,
    ) -> OcraResult<Self> {
        let empty = Vec::new();
        rules.sort_by(|a, b| {
            a.scope
                .cmp(&b.scope)
                .then_with(|| {
                    strs_cmp(
                        a.parent_scopes.as_ref().unwrap_or(&empty),
                        b.parent_scopes.as_ref().unwrap_or(&empty),
                    )
                })
                .then_with(|| a.index.cmp(&b.index))
        });

        let mut default_font_style = FontStyle::empty();
        let mut default_foreground = "#000000".to_string();
        let mut default_background = "#ffffff".to_string();
        let first_scoped = rules.iter().take_while(|r| r.scope.is_empty()).count();
        for incoming in rules.drain(..first_scoped) {
            if let Some(font_style) = incoming.font_style {
                default_font_style = font_style;
            }
            if let Some(foreground) = incoming.foreground {
                default_foreground = foreground;
            }
            if let Some(background) = incoming.background {
                default_background = background;
            }
        }

        let defaults = StyleAttributes {
            font_style: Some(default_font_style),
            foreground_id: color_map.get_id(Some(default_foreground.as_str()))?,
            background_id: color_map.get_id(Some(default_background.as_str()))?,
        };

        let mut root = ThemeTrieElement::new(
            ThemeTrieElementRule {
                scope_depth: 0,
                parent_scopes: Vec::new(),
                font_style: None,
                foreground: 0,
                background: 0,
            },
            Vec::new(),
        );
        for rule in rules {
            let foreground = color_map.get_id(rule.foreground.as_deref())?;
            let background = color_map.get_id(rule.background.as_deref())?;
            root.insert(
                0,
                &rule.scope,
                rule.parent_scopes.as_deref().unwrap_or(&empty),
                rule.font_style,
                foreground,
                background,
            );
        }

        Ok(Self {
            color_map,
            defaults,
            root,
            cache: papaya::HashMap::new(),
        })
    }

    /// Style of the root of every scope stack
    pub fn defaults(&self) -> StyleAttributes {
        self.defaults
    }

    /// Colors indexed by the ids used in token attributes, index 0 is unused
    pub fn color_map(&self) -> &[String] {
        self.color_map.colors()
    }

    /// The style of the innermost scope of `scope_path`, taking its ancestors into account
    /// for rules like `source.js string`.
    pub fn match_path(&self, scope_path: &ScopeStack) -> Option<StyleAttributes> {
        let scope_name = scope_path.scope_name();
        let cache = self.cache.pin();
        let rules = match cache.get(scope_name) {
            Some(rules) => rules,
            None => cache.get_or_insert_with(scope_name.to_owned(), || {
                self.root.match_scope(scope_name)
            }),
        };

        rules
            .iter()
            .find(|r| scope_path_matches_parent_scopes(scope_path.parent(), &r.parent_scopes))
            .map(ThemeTrieElementRule::style)
    }
}

impl Default for Theme {
    /// Black on white, no rules
    fn default() -> Self {
        let mut color_map = ColorMap::new();
        let foreground_id = color_map.allocate("#000000".to_string());
        let background_id = color_map.allocate("#FFFFFF".to_string());
        Self {
            color_map,
            defaults: StyleAttributes {
                font_style: Some(FontStyle::empty()),
                foreground_id,
                background_id,
            },
            root: ThemeTrieElement::new(
                ThemeTrieElementRule {
                    scope_depth: 0,
                    parent_scopes: Vec::new(),
                    font_style: None,
                    foreground: 0,
                    background: 0,
                },
                Vec::new(),
            ),
            cache: papaya::HashMap::new(),
        }
    }
}

impl fmt::Debug for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Theme")
            .field("color_map", &self.color_map.colors())
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

//! Persistent scope stacks.
//!
//! Every push allocates a new node pointing at its parent, so stacks handed out for a
//! previous line stay valid while later lines keep pushing.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use onig::Regex;

use crate::metadata::{EncodedTokenAttributes, StandardTokenType};
use crate::selector::scopes_are_matching;
use crate::themes::{StyleAttributes, Theme};

static STANDARD_TOKEN_TYPE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(comment|string|regex|meta\.embedded)\b").expect("Invalid token type regex")
});

/// A stack of plain scope names, eg `source.js meta.function.js string.quoted.js`
#[derive(Clone)]
pub struct ScopeStack(Arc<ScopeStackNode>);

struct ScopeStackNode {
    parent: Option<ScopeStack>,
    scope_name: String,
    /// Space separated names from the root to this node
    path: String,
}

impl ScopeStack {
    pub fn new(scope_name: &str) -> Self {
        Self(Arc::new(ScopeStackNode {
            parent: None,
            scope_name: scope_name.to_owned(),
            path: scope_name.to_owned(),
        }))
    }

    /// Builds a stack from its names, outermost first.
    pub fn from_segments<S: AsRef<str>>(segments: &[S]) -> Option<Self> {
        let (first, rest) = segments.split_first()?;
        let mut stack = Self::new(first.as_ref());
        for segment in rest {
            stack = stack.push(segment.as_ref());
        }
        Some(stack)
    }

    #[must_use]
    pub fn push(&self, scope_name: &str) -> Self {
        Self(Arc::new(ScopeStackNode {
            parent: Some(self.clone()),
            scope_name: scope_name.to_owned(),
            path: format!("{} {scope_name}", self.0.path),
        }))
    }

    pub fn parent(&self) -> Option<&ScopeStack> {
        self.0.parent.as_ref()
    }

    pub fn scope_name(&self) -> &str {
        &self.0.scope_name
    }

    pub fn path(&self) -> &str {
        &self.0.path
    }

    /// The scope names, outermost first
    pub fn segments(&self) -> Vec<String> {
        let mut res = Vec::new();
        let mut item = Some(self);
        while let Some(stack) = item {
            res.push(stack.0.scope_name.clone());
            item = stack.parent();
        }
        res.reverse();
        res
    }

    /// Whether `other` is this very stack or one of its ancestors
    pub fn extends(&self, other: &ScopeStack) -> bool {
        let mut item = Some(self);
        while let Some(stack) = item {
            if Arc::ptr_eq(&stack.0, &other.0) {
                return true;
            }
            item = stack.parent();
        }
        false
    }
}

impl PartialEq for ScopeStack {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.path == other.0.path
    }
}

impl Eq for ScopeStack {}

impl fmt::Display for ScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.path)
    }
}

impl fmt::Debug for ScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeStack({})", self.0.path)
    }
}

/// What we know about a scope without looking at the theme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BasicScopeAttributes {
    pub language_id: u8,
    pub token_type: Option<StandardTokenType>,
}

/// Finds the embedded language and standard token type of scopes
pub(crate) struct BasicScopeAttributesProvider {
    default_attributes: BasicScopeAttributes,
    /// Sorted so that longer scopes come before their prefixes
    embedded_languages: Vec<(String, u8)>,
    cache: papaya::HashMap<String, BasicScopeAttributes>,
}

impl BasicScopeAttributesProvider {
    pub fn new(initial_language: u8, embedded_languages: &HashMap<String, u8>) -> Self {
        let mut embedded_languages: Vec<_> = embedded_languages
            .iter()
            .map(|(scope, language)| (scope.clone(), *language))
            .collect();
        embedded_languages.sort_by(|a, b| b.0.cmp(&a.0));

        Self {
            default_attributes: BasicScopeAttributes {
                language_id: initial_language,
                token_type: None,
            },
            embedded_languages,
            cache: papaya::HashMap::new(),
        }
    }

    pub fn default_attributes(&self) -> BasicScopeAttributes {
        self.default_attributes
    }

    pub fn get(&self, scope_name: &str) -> BasicScopeAttributes {
        let cache = self.cache.pin();
        if let Some(attrs) = cache.get(scope_name) {
            return *attrs;
        }

        let attrs = BasicScopeAttributes {
            language_id: self.scope_to_language(scope_name),
            token_type: to_standard_token_type(scope_name),
        };
        cache.insert(scope_name.to_owned(), attrs);
        attrs
    }

    fn scope_to_language(&self, scope_name: &str) -> u8 {
        self.embedded_languages
            .iter()
            .find(|(scope, _)| scopes_are_matching(scope_name, scope))
            .map(|(_, language)| *language)
            .unwrap_or(0)
    }
}

impl fmt::Debug for BasicScopeAttributesProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicScopeAttributesProvider")
            .field("default_attributes", &self.default_attributes)
            .field("embedded_languages", &self.embedded_languages)
            .finish()
    }
}

fn to_standard_token_type(scope_name: &str) -> Option<StandardTokenType> {
    let captures = STANDARD_TOKEN_TYPE_REGEX.captures(scope_name)?;
    match captures.at(1)? {
        "comment" => Some(StandardTokenType::Comment),
        "string" => Some(StandardTokenType::String),
        "regex" => Some(StandardTokenType::RegEx),
        "meta.embedded" => Some(StandardTokenType::Other),
        _ => None,
    }
}

/// Everything needed to compute the attributes of a scope when pushing it:
/// the grammar level basic attributes and the theme.
#[derive(Debug)]
pub(crate) struct ScopeAttributes {
    pub basic: BasicScopeAttributesProvider,
    pub theme: Arc<Theme>,
}

impl ScopeAttributes {
    /// Attributes of the root of every stack, before looking at any scope
    pub fn default_token_attributes(&self) -> EncodedTokenAttributes {
        let basic = self.basic.default_attributes();
        let style = self.theme.defaults();
        EncodedTokenAttributes::default().set(
            basic.language_id,
            basic.token_type,
            None,
            style.font_style,
            style.foreground_id,
            style.background_id,
        )
    }
}

/// A [`ScopeStack`] where every node also carries the token attributes resolved for it.
#[derive(Clone)]
pub struct AttributedScopeStack(Arc<AttributedScopeStackNode>);

struct AttributedScopeStackNode {
    parent: Option<AttributedScopeStack>,
    scope_path: ScopeStack,
    token_attributes: EncodedTokenAttributes,
}

impl AttributedScopeStack {
    pub fn create_root(scope_name: &str, token_attributes: EncodedTokenAttributes) -> Self {
        Self(Arc::new(AttributedScopeStackNode {
            parent: None,
            scope_path: ScopeStack::new(scope_name),
            token_attributes,
        }))
    }

    pub(crate) fn create_root_and_look_up_scope_name(
        scope_name: &str,
        token_attributes: EncodedTokenAttributes,
        attributes: &ScopeAttributes,
    ) -> Self {
        let basic = attributes.basic.get(scope_name);
        let scope_path = ScopeStack::new(scope_name);
        let style = attributes.theme.match_path(&scope_path);
        Self(Arc::new(AttributedScopeStackNode {
            parent: None,
            token_attributes: merge_attributes(token_attributes, basic, style),
            scope_path,
        }))
    }

    pub fn parent(&self) -> Option<&AttributedScopeStack> {
        self.0.parent.as_ref()
    }

    pub fn scope_name(&self) -> &str {
        self.0.scope_path.scope_name()
    }

    pub fn scope_path(&self) -> &ScopeStack {
        &self.0.scope_path
    }

    pub fn token_attributes(&self) -> EncodedTokenAttributes {
        self.0.token_attributes
    }

    /// The scope names, outermost first
    pub fn scope_names(&self) -> Vec<String> {
        self.0.scope_path.segments()
    }

    /// Pushes a single scope with already computed attributes
    #[must_use]
    pub fn push(&self, scope_name: &str, token_attributes: EncodedTokenAttributes) -> Self {
        Self(Arc::new(AttributedScopeStackNode {
            parent: Some(self.clone()),
            scope_path: self.0.scope_path.push(scope_name),
            token_attributes,
        }))
    }

    /// Pushes a scope name, or several if it contains spaces.
    /// Returns the same stack if there is nothing to push.
    #[must_use]
    pub(crate) fn push_attributed(
        &self,
        scope_path: Option<&str>,
        attributes: &ScopeAttributes,
    ) -> Self {
        let Some(scope_path) = scope_path else {
            return self.clone();
        };

        if !scope_path.contains(' ') {
            return self.push_one(scope_path, attributes);
        }

        let mut res = self.clone();
        for scope in scope_path.split(' ') {
            res = res.push_one(scope, attributes);
        }
        res
    }

    fn push_one(&self, scope_name: &str, attributes: &ScopeAttributes) -> Self {
        let basic = attributes.basic.get(scope_name);
        let new_path = self.0.scope_path.push(scope_name);
        let style = attributes.theme.match_path(&new_path);
        Self(Arc::new(AttributedScopeStackNode {
            parent: Some(self.clone()),
            token_attributes: merge_attributes(self.0.token_attributes, basic, style),
            scope_path: new_path,
        }))
    }
}

fn merge_attributes(
    existing: EncodedTokenAttributes,
    basic: BasicScopeAttributes,
    style: Option<StyleAttributes>,
) -> EncodedTokenAttributes {
    let (font_style, foreground, background) = match style {
        Some(s) => (s.font_style, s.foreground_id, s.background_id),
        None => (None, 0, 0),
    };
    existing.set(
        basic.language_id,
        basic.token_type,
        None,
        font_style,
        foreground,
        background,
    )
}

impl PartialEq for AttributedScopeStack {
    fn eq(&self, other: &Self) -> bool {
        let mut a = Some(self);
        let mut b = Some(other);
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if Arc::ptr_eq(&x.0, &y.0) {
                        return true;
                    }
                    if x.scope_name() != y.scope_name()
                        || x.0.token_attributes != y.0.token_attributes
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

impl Eq for AttributedScopeStack {}

impl fmt::Debug for AttributedScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributedScopeStack({})", self.0.scope_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::themes::{RawTheme, Theme};

    fn attributes(theme_json: &str, embedded: &[(&str, u8)]) -> ScopeAttributes {
        let raw = RawTheme::from_json(theme_json).unwrap();
        let embedded = embedded
            .iter()
            .map(|(scope, id)| (scope.to_string(), *id))
            .collect();
        ScopeAttributes {
            basic: BasicScopeAttributesProvider::new(1, &embedded),
            theme: Arc::new(Theme::from_raw(&raw, None).unwrap()),
        }
    }

    #[test]
    fn test_scope_stack_shares_parents() {
        let root = ScopeStack::new("source.js");
        let a = root.push("meta.function.js");
        let b = root.push("string.quoted.js");

        assert_eq!(a.path(), "source.js meta.function.js");
        assert_eq!(b.segments(), vec!["source.js", "string.quoted.js"]);
        assert!(a.extends(&root));
        assert!(!a.extends(&b));
        assert_eq!(a.parent(), Some(&root));
        assert_eq!(
            ScopeStack::from_segments(&["source.js", "meta.function.js"]),
            Some(a)
        );
        assert_eq!(ScopeStack::from_segments::<&str>(&[]), None);
    }

    #[test]
    fn test_standard_token_types() {
        let test_cases = vec![
            ("comment.line.double-slash", Some(StandardTokenType::Comment)),
            ("string.quoted.double", Some(StandardTokenType::String)),
            ("string.regexp", Some(StandardTokenType::String)),
            ("constant.regex.js", Some(StandardTokenType::RegEx)),
            ("meta.embedded.block.css", Some(StandardTokenType::Other)),
            ("punctuation.definition.comment", Some(StandardTokenType::Comment)),
            ("keyword.control", None),
            ("commentary", None),
        ];

        for (scope, expected) in test_cases {
            assert_eq!(to_standard_token_type(scope), expected, "scope {scope}");
        }
    }

    #[test]
    fn test_embedded_languages_prefer_longest_scope() {
        let attrs = attributes(
            r#"{"settings": []}"#,
            &[("source.js", 2), ("source.js.regexp", 3), ("source.css", 4)],
        );
        assert_eq!(attrs.basic.get("source.js").language_id, 2);
        assert_eq!(attrs.basic.get("source.js.embedded").language_id, 2);
        assert_eq!(attrs.basic.get("source.js.regexp.inner").language_id, 3);
        assert_eq!(attrs.basic.get("source.jsx").language_id, 0);
        assert_eq!(attrs.basic.get("source.css").language_id, 4);
        assert_eq!(attrs.basic.default_attributes().language_id, 1);
    }

    #[test]
    fn test_push_attributed_merges_theme_and_basic_attributes() {
        let attrs = attributes(
            r##"{"settings": [
                {"scope": "string", "settings": {"foreground": "#ff0000"}},
                {"scope": "string.quoted", "settings": {"fontStyle": "italic"}}
            ]}"##,
            &[],
        );
        let root = AttributedScopeStack::create_root_and_look_up_scope_name(
            "source.js",
            attrs.default_token_attributes(),
            &attrs,
        );
        assert_eq!(root.token_attributes().language_id(), 1);

        let pushed = root.push_attributed(Some("string.quoted.double punctuation"), &attrs);
        assert_eq!(
            pushed.scope_names(),
            vec!["source.js", "string.quoted.double", "punctuation"]
        );
        let string_attrs = pushed.parent().unwrap().token_attributes();
        assert_eq!(string_attrs.token_type(), StandardTokenType::String);
        assert_eq!(
            attrs.theme.color_map()[string_attrs.foreground() as usize],
            "#FF0000"
        );
        assert_eq!(string_attrs.font_style(), crate::themes::FontStyle::ITALIC);
        // the child has no rule of its own and inherits everything
        assert_eq!(pushed.token_attributes(), string_attrs);

        assert_eq!(root.push_attributed(None, &attrs), root);
        assert_ne!(pushed, root);
        assert_eq!(
            pushed,
            root.push_attributed(Some("string.quoted.double"), &attrs)
                .push_attributed(Some("punctuation"), &attrs)
        );
    }
}

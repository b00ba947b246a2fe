use serde::Deserialize;

use crate::error::OcraResult;
use crate::themes::FontStyle;
use crate::themes::color::is_valid_hex_color;

/// The `scope` of a theme setting: either a comma separated string or a list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawScope {
    One(String),
    Many(Vec<String>),
}

/// Style part of a theme setting, as found in the theme JSON
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawStyleSettings {
    #[serde(default)]
    pub font_style: Option<String>,
    #[serde(default)]
    pub foreground: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
}

/// A single theme rule
///
/// # Examples
/// ```json
/// {
///   "name": "Strings",
///   "scope": "string, source.js meta.template string",
///   "settings": { "foreground": "#a31515", "fontStyle": "italic" }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawThemeSetting {
    #[serde(default)]
    pub name: Option<String>,
    /// No scope at all means this rule sets the defaults
    #[serde(default)]
    pub scope: Option<RawScope>,
    #[serde(default)]
    pub settings: Option<RawStyleSettings>,
}

/// An already parsed theme: only the rule list matters for tokenization
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawTheme {
    #[serde(default)]
    pub name: Option<String>,
    /// VSCode themes call it `tokenColors`
    #[serde(default, alias = "tokenColors")]
    pub settings: Vec<RawThemeSetting>,
}

impl RawTheme {
    pub fn from_json(json: &str) -> OcraResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// One rule per scope of a theme setting, eg `"a, b c"` gives 2 rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedThemeRule {
    /// The scope the rule applies to, empty for the defaults
    pub scope: String,
    /// Ancestors required for the rule to apply, closest first
    pub parent_scopes: Option<Vec<String>>,
    /// Position of the setting in the theme, later settings override earlier ones
    pub index: usize,
    pub font_style: Option<FontStyle>,
    pub foreground: Option<String>,
    pub background: Option<String>,
}

fn valid_color(color: Option<&String>) -> Option<String> {
    color.filter(|c| is_valid_hex_color(c)).cloned()
}

/// Flattens the theme settings into one rule per scope
pub(crate) fn parse_theme(theme: &RawTheme) -> Vec<ParsedThemeRule> {
    let mut res = Vec::new();

    for (index, entry) in theme.settings.iter().enumerate() {
        let Some(settings) = &entry.settings else {
            continue;
        };

        let scopes: Vec<&str> = match &entry.scope {
            Some(RawScope::One(scope)) => scope
                .trim_start_matches(',')
                .trim_end_matches(',')
                .split(',')
                .collect(),
            Some(RawScope::Many(scopes)) => scopes.iter().map(String::as_str).collect(),
            None => vec![""],
        };

        let font_style = settings.font_style.as_deref().map(FontStyle::parse);
        let foreground = valid_color(settings.foreground.as_ref());
        let background = valid_color(settings.background.as_ref());

        for scope in scopes {
            let segments: Vec<&str> = scope.trim().split(' ').collect();
            let (last, ancestors) = segments
                .split_last()
                .map(|(last, ancestors)| (*last, ancestors))
                .unwrap_or(("", &[]));
            let parent_scopes = if ancestors.is_empty() {
                None
            } else {
                Some(ancestors.iter().rev().map(|s| s.to_string()).collect())
            };

            res.push(ParsedThemeRule {
                scope: last.to_owned(),
                parent_scopes,
                index,
                font_style,
                foreground: foreground.clone(),
                background: background.clone(),
            });
        }
    }

    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_theme_flattens_scopes() {
        let raw = RawTheme::from_json(
            r##"{
                "name": "test",
                "tokenColors": [
                    {"settings": {"foreground": "#F8F8F2", "background": "#272822"}},
                    {"scope": ",comment, string.quoted,", "settings": {"fontStyle": "italic"}},
                    {"scope": ["source.js meta.function > entity", "constant"], "settings": {"foreground": "red"}},
                    {"scope": "ignored"},
                    {"scope": "markup.bold", "settings": {"fontStyle": ""}}
                ]
            }"##,
        )
        .unwrap();

        let rules = parse_theme(&raw);
        let summary: Vec<_> = rules
            .iter()
            .map(|r| {
                (
                    r.scope.as_str(),
                    r.parent_scopes.clone(),
                    r.index,
                    r.font_style,
                    r.foreground.as_deref(),
                )
            })
            .collect();

        assert_eq!(
            summary,
            vec![
                ("", None, 0, None, Some("#F8F8F2")),
                ("comment", None, 1, Some(FontStyle::ITALIC), None),
                ("string.quoted", None, 1, Some(FontStyle::ITALIC), None),
                (
                    "entity",
                    Some(vec![
                        ">".to_string(),
                        "meta.function".to_string(),
                        "source.js".to_string()
                    ]),
                    2,
                    None,
                    // not a hex color
                    None
                ),
                ("constant", None, 2, None, None),
                ("markup.bold", None, 4, Some(FontStyle::empty()), None),
            ]
        );
        assert_eq!(rules[0].background.as_deref(), Some("#272822"));
    }
}

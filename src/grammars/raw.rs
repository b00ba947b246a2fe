use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Deserializer};

use crate::error::OcraResult;

/// Capture groups of a `match`, `begin`, `end` or `while` regex, keyed by group index.
///
/// # Examples
/// ```json
/// {
///   "1": { "name": "entity.name.function.js" },
///   "2": {
///     "name": "meta.parameters.js",
///     "patterns": [{ "include": "#parameters" }]
///   }
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Captures(pub BTreeMap<usize, RawRule>);

impl Captures {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &usize> {
        self.0.keys()
    }

    pub fn get(&self, index: usize) -> Option<&RawRule> {
        self.0.get(&index)
    }
}

impl<'de> Deserialize<'de> for Captures {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Some grammars use an array instead of an object with numeric keys
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawCaptures {
            Map(HashMap<String, RawRule>),
            List(Vec<RawRule>),
        }

        let captures = match RawCaptures::deserialize(deserializer)? {
            RawCaptures::Map(map) => map
                .into_iter()
                // keys that are not group numbers can't match anything
                .filter_map(|(key, rule)| key.parse::<usize>().ok().map(|k| (k, rule)))
                .collect(),
            RawCaptures::List(list) => list.into_iter().enumerate().collect(),
        };
        Ok(Captures(captures))
    }
}

fn deserialize_apply_end_pattern_last<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    // set to 1 or true
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(i64),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Number(n)) => n != 0,
        None => false,
    })
}

/// Repository entries are normally rules but some grammars write a bare list of patterns
fn deserialize_repository<'de, D>(deserializer: D) -> Result<HashMap<String, RawRule>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RepositoryEntry {
        Patterns(Vec<RawRule>),
        Rule(RawRule),
    }

    let entries = Option::<HashMap<String, RepositoryEntry>>::deserialize(deserializer)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .map(|(name, entry)| {
            let rule = match entry {
                RepositoryEntry::Patterns(patterns) => RawRule {
                    patterns: Some(patterns),
                    ..Default::default()
                },
                RepositoryEntry::Rule(rule) => rule,
            };
            (name, rule)
        })
        .collect())
}

/// Any rule of a TextMate grammar. What kind of rule it is depends on which keys are present:
///
/// - `match`: a single regex applied to one line
/// - `begin` and `while`: a region continuing as long as every line matches `while`
/// - `begin`: a region closed by `end`
/// - otherwise a container of `patterns`, or a single `include`
///
/// # Examples
/// ```json
/// {
///   "name": "string.quoted.double.js",
///   "begin": "\"",
///   "end": "\"",
///   "beginCaptures": {
///     "0": { "name": "punctuation.definition.string.begin.js" }
///   },
///   "patterns": [
///     { "match": "\\\\.", "name": "constant.character.escape.js" }
///   ]
/// }
/// ```
///
/// ```json
/// { "include": "source.js#expressions" }
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawRule {
    /// - "#name": repository entry visible from this rule
    /// - "source.lang": root patterns of another grammar
    /// - "source.lang#name": repository entry of another grammar
    /// - "$self": root patterns of the current grammar
    /// - "$base": root patterns of the grammar tokenization started with
    #[serde(default)]
    pub include: Option<String>,
    /// Can reference captures with `$1` or `${1:/downcase}`
    #[serde(default)]
    pub name: Option<String>,
    /// Scope of the text between begin and end, not including them
    #[serde(default)]
    pub content_name: Option<String>,
    #[serde(default, rename(deserialize = "match"))]
    pub match_: Option<String>,
    /// Fallback for the begin, end and while captures
    #[serde(default)]
    pub captures: Option<Captures>,
    #[serde(default)]
    pub begin: Option<String>,
    #[serde(default)]
    pub begin_captures: Option<Captures>,
    /// Can reference captures of `begin` with `\1`
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub end_captures: Option<Captures>,
    #[serde(default, rename(deserialize = "while"))]
    pub while_: Option<String>,
    #[serde(default)]
    pub while_captures: Option<Captures>,
    /// An empty list is not the same as no list: it still turns a capture into a
    /// retokenized region and still hides `include`
    #[serde(default)]
    pub patterns: Option<Vec<RawRule>>,
    #[serde(default, deserialize_with = "deserialize_repository")]
    pub repository: HashMap<String, RawRule>,
    /// Try the end pattern after the nested patterns instead of before
    #[serde(default, deserialize_with = "deserialize_apply_end_pattern_last")]
    pub apply_end_pattern_last: bool,
}

/// Top-level structure of a TextMate grammar
///
/// # Examples
/// ```json
/// {
///   "name": "JavaScript",
///   "scopeName": "source.js",
///   "fileTypes": ["js", "mjs"],
///   "patterns": [
///     { "include": "#statements" }
///   ],
///   "repository": {
///     "statements": {
///       "patterns": [{ "include": "#keywords" }]
///     },
///     "keywords": [
///       { "match": "\\bif\\b", "name": "keyword.control.if.js" }
///     ]
///   },
///   "injections": {
///     "L:comment.block.js": {
///       "patterns": [{ "match": "TODO", "name": "keyword.todo" }]
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawGrammar {
    /// Unique identifier for this grammar's scope
    /// Example: "source.js", "text.html.markdown"
    pub scope_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub first_line_match: Option<String>,
    #[serde(default)]
    pub patterns: Vec<RawRule>,
    #[serde(default, deserialize_with = "deserialize_repository")]
    pub repository: HashMap<String, RawRule>,
    /// Rules injected into this grammar wherever the selector key matches
    #[serde(default, deserialize_with = "deserialize_repository")]
    pub injections: HashMap<String, RawRule>,
    /// Where this grammar injects itself when it's listed as an injection of another one
    #[serde(default)]
    pub injection_selector: Option<String>,
    /// Scope names of the grammars this one should be injected into
    #[serde(default)]
    pub inject_to: Vec<String>,
}

impl RawGrammar {
    pub fn from_json(json: &str) -> OcraResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

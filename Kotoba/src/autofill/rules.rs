//! Autofill rule definitions
//!
//! Rules are data: they are read from the `[[autofill]]` tables of the
//! settings file and checked once by [`Rule::prepare`] before any of them
//! runs.
//!
//! ```toml
//! [[autofill]]
//! kind = "template"
//! name = "pieces"
//! target = { asset = "table/piece", column = "name" }
//! template = "{0} Piece"
//! dependencies = [{ asset = "table/chara", column = "name", key = { prefix = 4 } }]
//!
//! [[autofill]]
//! kind = "pattern"
//! name = "birthdays"
//! target = { asset = "table/text_data", key_prefix = "157:" }
//! regex = '^(?P<month>[0-9０-９]+)月(?P<day>[0-9０-９]+)日$'
//! template = "{month} {day}"
//! map = { month = { "1" = "January", "2" = "February" } }
//! ```

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::workspace::{AssetId, Entry, split_table_field};

/// A set of entries a rule reads from or writes to
///
/// Field paths are split at their last `/` into a key and a column, so for
/// table assets `key_prefix` and `column` refer to the row key and column.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Scope {
    /// Asset id, or a prefix of one ending in `*`
    pub asset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

impl Scope {
    /// Every entry of one asset
    pub fn asset(asset: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            ..Self::default()
        }
    }

    /// Whether an entry falls inside this scope
    #[must_use]
    pub fn matches(&self, entry: &Entry) -> bool {
        if !self.matches_asset(&entry.asset_id) {
            return false;
        }
        let (key, column) = split_table_field(&entry.field_path).unwrap_or(("", &entry.field_path));
        self.key_prefix.as_deref().is_none_or(|p| key.starts_with(p))
            && self.column.as_deref().is_none_or(|c| c == column)
    }

    fn matches_asset(&self, id: &AssetId) -> bool {
        match self.asset.strip_suffix('*') {
            Some(prefix) => id.to_string().starts_with(prefix),
            None => id.to_string() == self.asset,
        }
    }

    fn validate(&self, rule: &str) -> Result<()> {
        if self.asset.is_empty() {
            return Err(invalid(rule, "scope has an empty asset"));
        }
        if !self.asset.ends_with('*') {
            self.asset
                .parse::<AssetId>()
                .map_err(|e| invalid(rule, &e.to_string()))?;
        }
        Ok(())
    }
}

/// How a target row key maps to a dependency row key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMap {
    /// The dependency has the same key
    #[default]
    Same,
    /// The dependency key is the first `n` characters of the target key
    Prefix(usize),
}

impl KeyMap {
    /// Apply the mapping; `None` when the key is too short
    #[must_use]
    pub fn map<'k>(&self, key: &'k str) -> Option<&'k str> {
        match *self {
            Self::Same => Some(key),
            Self::Prefix(n) => key.char_indices().nth(n).map_or(
                (key.chars().count() == n).then_some(key),
                |(end, _)| Some(&key[..end]),
            ),
        }
    }
}

/// An entry a template reads, located relative to the target's key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub asset: AssetId,
    pub column: String,
    #[serde(default)]
    pub key: KeyMap,
}

impl Dependency {
    /// Field path of the dependency for a target key
    #[must_use]
    pub fn field_path(&self, target_key: &str) -> Option<String> {
        let key = self.key.map(target_key)?;
        Some(format!("{key}/{}", self.column))
    }
}

/// A pattern capture resolved by source text in another scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lookup {
    pub capture: String,
    pub scope: Scope,
}

/// One autofill rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    /// Untranslated entries reuse the translation of an entry with the same source text
    Duplicates {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Restrict donors and targets; the whole workspace when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<Scope>,
    },
    /// Targets reuse translations from another scope with the same source text
    CrossReference {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        source: Scope,
        target: Scope,
    },
    /// Targets are built from a template over dependency translations
    Template {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        target: Scope,
        /// `{0}`, `{1}`... name dependencies by position
        template: String,
        dependencies: Vec<Dependency>,
    },
    /// Targets whose source matches a regex, rebuilt from its captures
    Pattern {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        target: Scope,
        regex: String,
        template: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        lookup: Vec<Lookup>,
        /// Fixed replacements per capture, keyed by the folded capture text
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        map: BTreeMap<String, BTreeMap<String, String>>,
    },
}

impl Rule {
    /// Rule kind as written in the settings file
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Duplicates { .. } => "duplicates",
            Self::CrossReference { .. } => "cross_reference",
            Self::Template { .. } => "template",
            Self::Pattern { .. } => "pattern",
        }
    }

    /// Configured name, falling back to the kind
    #[must_use]
    pub fn label(&self) -> &str {
        let name = match self {
            Self::Duplicates { name, .. }
            | Self::CrossReference { name, .. }
            | Self::Template { name, .. }
            | Self::Pattern { name, .. } => name.as_deref(),
        };
        name.unwrap_or_else(|| self.kind())
    }

    /// Validate the rule and compile its regex
    ///
    /// # Errors
    /// Returns [`Error::InvalidRule`] describing the first problem found.
    pub fn prepare(&self) -> Result<Prepared<'_>> {
        let label = self.label();
        let regex = match self {
            Self::Duplicates { scope, .. } => {
                if let Some(scope) = scope {
                    scope.validate(label)?;
                }
                None
            }
            Self::CrossReference { source, target, .. } => {
                source.validate(label)?;
                target.validate(label)?;
                None
            }
            Self::Template {
                target,
                template,
                dependencies,
                ..
            } => {
                target.validate(label)?;
                if dependencies.is_empty() {
                    return Err(invalid(label, "template rule needs at least one dependency"));
                }
                if dependencies.iter().any(|d| d.key == KeyMap::Prefix(0)) {
                    return Err(invalid(label, "key prefix must be at least 1"));
                }
                for placeholder in placeholders(template).map_err(|m| invalid(label, &m))? {
                    let index: usize = placeholder.parse().map_err(|_| {
                        invalid(label, &format!("placeholder {{{placeholder}}} is not a dependency index"))
                    })?;
                    if index >= dependencies.len() {
                        return Err(invalid(
                            label,
                            &format!("placeholder {{{index}}} has no dependency"),
                        ));
                    }
                }
                None
            }
            Self::Pattern {
                target,
                regex,
                template,
                lookup,
                map,
                ..
            } => {
                target.validate(label)?;
                let regex = Regex::new(regex).map_err(|e| invalid(label, &e.to_string()))?;
                let known = |name: &str| {
                    name.parse::<usize>().map_or_else(
                        |_| regex.capture_names().flatten().any(|n| n == name),
                        |i| i < regex.captures_len(),
                    )
                };
                for placeholder in placeholders(template).map_err(|m| invalid(label, &m))? {
                    if !known(placeholder) {
                        return Err(invalid(
                            label,
                            &format!("placeholder {{{placeholder}}} names no capture"),
                        ));
                    }
                }
                for name in lookup.iter().map(|l| l.capture.as_str()).chain(map.keys().map(String::as_str)) {
                    if !known(name) {
                        return Err(invalid(label, &format!("capture '{name}' does not exist")));
                    }
                }
                for l in lookup {
                    l.scope.validate(label)?;
                }
                Some(regex)
            }
        };
        Ok(Prepared { rule: self, regex })
    }
}

/// A validated rule, ready to run
#[derive(Debug)]
pub struct Prepared<'r> {
    pub rule: &'r Rule,
    pub regex: Option<Regex>,
}

fn invalid(rule: &str, message: &str) -> Error {
    Error::InvalidRule {
        rule: rule.to_string(),
        message: message.to_string(),
    }
}

/// Placeholder names of a template; `{{` and `}}` are literal braces
///
/// # Errors
/// Returns a message for unbalanced braces or empty placeholders.
pub fn placeholders(template: &str) -> std::result::Result<Vec<&str>, String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(pos) = rest.find(['{', '}']) {
        let (brace, after) = (rest.as_bytes()[pos], &rest[pos + 1..]);
        if after.as_bytes().first() == Some(&brace) {
            rest = &after[1..];
            continue;
        }
        if brace == b'}' {
            return Err(format!("unmatched '}}' in \"{template}\""));
        }
        let end = after
            .find('}')
            .ok_or_else(|| format!("unclosed '{{' in \"{template}\""))?;
        let name = &after[..end];
        if name.is_empty() || name.contains('{') {
            return Err(format!("bad placeholder in \"{template}\""));
        }
        names.push(name);
        rest = &after[end + 1..];
    }
    Ok(names)
}

/// Fill a template; `None` when `resolve` cannot supply a placeholder
pub fn render(template: &str, mut resolve: impl FnMut(&str) -> Option<String>) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let (brace, after) = (rest.as_bytes()[pos], &rest[pos + 1..]);
        if after.as_bytes().first() == Some(&brace) {
            out.push(brace as char);
            rest = &after[1..];
            continue;
        }
        let end = after.find('}')?;
        out.push_str(&resolve(&after[..end])?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Some(out)
}

/// Fold full-width digits (`０`-`９`) to ASCII
#[must_use]
pub fn fold_fullwidth_digits(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rules_from_toml() {
        #[derive(Deserialize)]
        struct Doc {
            autofill: Vec<Rule>,
        }
        let doc: Doc = toml::from_str(
            r#"
            [[autofill]]
            kind = "duplicates"

            [[autofill]]
            kind = "template"
            name = "pieces"
            target = { asset = "table/piece", column = "name" }
            template = "{0} Piece"
            dependencies = [{ asset = "table/chara", column = "name", key = { prefix = 4 } }]
            "#,
        )
        .unwrap();
        assert_eq!(doc.autofill.len(), 2);
        assert_eq!(doc.autofill[0].label(), "duplicates");
        assert_eq!(doc.autofill[1].label(), "pieces");
        let Rule::Template { dependencies, .. } = &doc.autofill[1] else {
            panic!("expected a template rule");
        };
        assert_eq!(dependencies[0].key, KeyMap::Prefix(4));
        assert!(doc.autofill.iter().all(|r| r.prepare().is_ok()));
    }

    #[test]
    fn test_prepare_rejects_bad_rules() {
        let target = Scope::asset("table/text");
        let bad_index = Rule::Template {
            name: None,
            target: target.clone(),
            template: "{1}".into(),
            dependencies: vec![Dependency {
                asset: AssetId::table("chara"),
                column: "name".into(),
                key: KeyMap::Same,
            }],
        };
        assert!(matches!(bad_index.prepare(), Err(Error::InvalidRule { .. })));

        let bad_capture = Rule::Pattern {
            name: Some("p".into()),
            target,
            regex: "(?P<a>.+)".into(),
            template: "{b}".into(),
            lookup: vec![],
            map: BTreeMap::new(),
        };
        assert!(matches!(bad_capture.prepare(), Err(Error::InvalidRule { rule, .. }) if rule == "p"));
    }

    #[test]
    fn test_scope_matching() {
        let entry = Entry::new(AssetId::table("text_data"), "113:10010/text", "x");
        let scope = Scope {
            asset: "table/*".into(),
            key_prefix: Some("113:".into()),
            column: Some("text".into()),
        };
        assert!(scope.matches(&entry));
        assert!(!Scope {
            column: Some("name".into()),
            ..scope
        }
        .matches(&entry));
    }

    #[test]
    fn test_templates_and_folding() {
        assert_eq!(placeholders("{a} and {{literal}} {0}").unwrap(), vec!["a", "0"]);
        assert!(placeholders("{open").is_err());
        assert_eq!(
            render("{0} Piece {{x}}", |n| (n == "0").then(|| "Special Week".to_string())),
            Some("Special Week Piece {x}".to_string())
        );
        assert_eq!(render("{missing}", |_| None), None);
        assert_eq!(fold_fullwidth_digits("１２月３日"), "12月3日");
        assert_eq!(KeyMap::Prefix(4).map("1001:2"), Some("1001"));
        assert_eq!(KeyMap::Prefix(4).map("1001"), Some("1001"));
        assert_eq!(KeyMap::Prefix(4).map("10"), None);
    }
}

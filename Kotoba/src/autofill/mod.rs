//! Autofill: deriving translations for repetitive entries
//!
//! SPDX-FileCopyrightText: 2025 `CyberDeco`
//!
//! SPDX-License-Identifier: MIT
//!
//! Many entries are assembled from smaller ones (a character's name plus
//! "Piece", a date, a title inside a fixed commentary line). Once those
//! atoms are translated by a person, the rules in [`rules`] fill the
//! composites.
//!
//! Guarantees:
//! - only `untranslated` entries with no text are written, and they become
//!   `machine_filled`
//! - a fill is derived only from `manual` or `reviewed` translations; a
//!   target with any other dependency is skipped whole
//! - running the same rules twice fills nothing the second time

pub mod rules;

use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use serde::Serialize;

pub use rules::{Dependency, KeyMap, Lookup, Prepared, Rule, Scope, fold_fullwidth_digits};

use crate::error::Result;
use crate::pipeline::CancelToken;
use crate::workspace::{
    Applied, AssetId, Entry, Fill, Mutation, State, Status, Workspace, split_table_field,
};

/// Outcome of one rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleReport {
    pub rule: String,
    pub filled: usize,
    /// Targets left alone because a dependency was not settled
    pub skipped_dependencies: usize,
}

/// Outcome of an autofill run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutofillReport {
    pub filled: usize,
    pub skipped_dependencies: usize,
    pub rules: Vec<RuleReport>,
}

/// Run rules in order against the workspace
///
/// Every rule is validated before the first one runs. Each rule plans its
/// fills from a consistent read of the workspace and applies them one asset
/// at a time; the store re-checks every fill, so entries edited in between
/// are never overwritten.
///
/// # Errors
/// Returns [`Error::InvalidRule`](crate::Error::InvalidRule) for a bad rule,
/// [`Error::Cancelled`](crate::Error::Cancelled), or an error if a workspace
/// file cannot be written.
pub fn autofill(workspace: &Workspace, rules: &[Rule], cancel: &CancelToken) -> Result<AutofillReport> {
    let prepared = rules.iter().map(Rule::prepare).collect::<Result<Vec<_>>>()?;
    let mut report = AutofillReport::default();

    for rule in &prepared {
        cancel.check()?;
        let plan = workspace.read(|state| plan_rule(rule, state));

        let mut filled = 0;
        for (asset, fills) in plan.fills {
            cancel.check()?;
            if let Applied::Filled(n) = workspace.apply(Mutation::Fill { asset, fills })? {
                filled += n;
            }
        }

        tracing::info!(
            "Autofill '{}': {} filled, {} skipped on unsettled dependencies",
            rule.rule.label(),
            filled,
            plan.skipped_dependencies
        );
        report.filled += filled;
        report.skipped_dependencies += plan.skipped_dependencies;
        report.rules.push(RuleReport {
            rule: rule.rule.label().to_string(),
            filled,
            skipped_dependencies: plan.skipped_dependencies,
        });
    }

    Ok(report)
}

/// Fills one rule would make, grouped by asset
#[derive(Debug, Default)]
struct RulePlan {
    fills: BTreeMap<AssetId, Vec<Fill>>,
    skipped_dependencies: usize,
}

impl RulePlan {
    fn push(&mut self, target: &Entry, text: String) {
        if text.is_empty() {
            return;
        }
        self.fills
            .entry(target.asset_id.clone())
            .or_default()
            .push(Fill {
                field: target.field_path.clone(),
                source_text: target.source_text.clone(),
                text,
            });
    }
}

/// What a dependency currently offers
enum Resolved<'s> {
    Ready(&'s str),
    /// Translated, but not by a person yet
    Pending,
    Missing,
}

fn fillable(entry: &Entry) -> bool {
    !entry.orphaned && entry.status == Status::Untranslated && entry.translated_text.is_empty()
}

fn resolve(entry: Option<&Entry>) -> Resolved<'_> {
    match entry {
        None => Resolved::Missing,
        Some(e) if e.orphaned => Resolved::Missing,
        Some(e) if e.status.is_settled() && !e.translated_text.is_empty() => {
            Resolved::Ready(&e.translated_text)
        }
        Some(_) => Resolved::Pending,
    }
}

fn plan_rule(prepared: &Prepared<'_>, state: &State) -> RulePlan {
    match prepared.rule {
        Rule::Duplicates { scope, .. } => {
            let in_scope = |e: &Entry| scope.as_ref().is_none_or(|s| s.matches(e));
            reuse(state, in_scope, in_scope)
        }
        Rule::CrossReference { source, target, .. } => {
            reuse(state, |e| source.matches(e), |e| target.matches(e))
        }
        Rule::Template {
            target,
            template,
            dependencies,
            ..
        } => plan_template(state, target, template, dependencies),
        Rule::Pattern {
            target,
            template,
            lookup,
            map,
            ..
        } => match &prepared.regex {
            Some(regex) => plan_pattern(state, target, regex, template, lookup, map),
            None => RulePlan::default(),
        },
    }
}

/// Source text → best translation among entries in scope
///
/// Reviewed translations win over manual ones; among equals the first in
/// workspace order wins.
fn donors<'s>(state: &'s State, in_scope: impl Fn(&Entry) -> bool) -> HashMap<&'s str, Resolved<'s>> {
    let mut donors: HashMap<&str, (Resolved<'_>, bool)> = HashMap::new();
    for entry in state.entries() {
        if entry.orphaned || entry.translated_text.is_empty() || !in_scope(entry) {
            continue;
        }
        let reviewed = entry.status == Status::Reviewed;
        let candidate = resolve(Some(entry));
        let ready = matches!(candidate, Resolved::Ready(_));
        let replace = match donors.get(entry.source_text.as_str()) {
            None => true,
            Some((Resolved::Ready(_), held_reviewed)) => ready && reviewed && !held_reviewed,
            Some(_) => ready,
        };
        if replace {
            donors.insert(&entry.source_text, (candidate, reviewed));
        }
    }
    donors.into_iter().map(|(k, (v, _))| (k, v)).collect()
}

fn reuse(
    state: &State,
    source: impl Fn(&Entry) -> bool,
    target: impl Fn(&Entry) -> bool,
) -> RulePlan {
    let donors = donors(state, source);
    let mut plan = RulePlan::default();
    for entry in state.entries().filter(|e| fillable(e) && target(e)) {
        match donors.get(entry.source_text.as_str()) {
            Some(Resolved::Ready(text)) => plan.push(entry, (*text).to_string()),
            Some(Resolved::Pending) => plan.skipped_dependencies += 1,
            Some(Resolved::Missing) | None => {}
        }
    }
    plan
}

fn plan_template(
    state: &State,
    target: &Scope,
    template: &str,
    dependencies: &[Dependency],
) -> RulePlan {
    let mut plan = RulePlan::default();
    'targets: for entry in state.entries().filter(|e| fillable(e) && target.matches(e)) {
        let Some((key, _)) = split_table_field(&entry.field_path) else {
            continue;
        };
        let mut values = Vec::with_capacity(dependencies.len());
        let mut pending = false;
        for dependency in dependencies {
            let found = dependency
                .field_path(key)
                .and_then(|path| state.entry(&dependency.asset, &path));
            match resolve(found) {
                Resolved::Ready(text) => values.push(text),
                Resolved::Pending => pending = true,
                Resolved::Missing => continue 'targets,
            }
        }
        if pending {
            plan.skipped_dependencies += 1;
            continue;
        }
        let rendered = rules::render(template, |p| {
            p.parse::<usize>()
                .ok()
                .and_then(|i| values.get(i))
                .map(|v| (*v).to_string())
        });
        if let Some(text) = rendered {
            plan.push(entry, text);
        }
    }
    plan
}

fn plan_pattern(
    state: &State,
    target: &Scope,
    regex: &Regex,
    template: &str,
    lookup: &[Lookup],
    map: &BTreeMap<String, BTreeMap<String, String>>,
) -> RulePlan {
    let lookups: HashMap<&str, HashMap<&str, Resolved<'_>>> = lookup
        .iter()
        .map(|l| (l.capture.as_str(), donors(state, |e| l.scope.matches(e))))
        .collect();

    let mut plan = RulePlan::default();
    for entry in state.entries().filter(|e| fillable(e) && target.matches(e)) {
        let Some(caps) = regex.captures(&entry.source_text) else {
            continue;
        };
        let mut pending = false;
        let rendered = rules::render(template, |name| {
            let capture = name
                .parse::<usize>()
                .map_or_else(|_| caps.name(name), |i| caps.get(i));
            let raw = capture.map_or("", |m| m.as_str());

            if let Some(donors) = lookups.get(name) {
                return match donors.get(raw) {
                    Some(Resolved::Ready(text)) => Some((*text).to_string()),
                    Some(Resolved::Pending) => {
                        pending = true;
                        None
                    }
                    Some(Resolved::Missing) | None => None,
                };
            }
            let folded = fold_fullwidth_digits(raw);
            match map.get(name) {
                Some(values) => values
                    .get(&folded)
                    .cloned()
                    .or_else(|| capture.is_none().then(String::new)),
                None => Some(folded),
            }
        });
        match rendered {
            Some(text) => plan.push(entry, text),
            None if pending => plan.skipped_dependencies += 1,
            None => {}
        }
    }
    plan
}

//! Structural diff between two successive outlines.
//!
//! Outlines are treated as flat element sequences; matching is by ref when
//! both sides carry one, by (role, name) otherwise. The report tells the
//! agent loop whether to send nothing, a small delta, or a fresh outline.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::outline::RoleTables;

/// Ratio of touched elements above which the full outline is cheaper than
/// the delta.
const LARGE_DIFF_RATIO: f64 = 0.7;

/// One outline line, flattened. No parent pointers: the differ does not
/// care about structure.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementRecord {
    pub role: String,
    pub name: String,
    pub ref_id: Option<String>,
    pub indent: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone)]
pub struct DiffReport {
    pub stats: DiffStats,
    pub text: String,
    pub diff_ratio: f64,
    pub is_empty: bool,
    pub is_large_diff: bool,
}

/// Parse an outline into element records, skipping lines whose role is
/// outside the known vocabulary.
pub fn parse_elements(outline: &str, tables: &RoleTables) -> Vec<ElementRecord> {
    let line_re = regex::Regex::new(r#"^(\s*)- ([A-Za-z]+)(?: "([^"]*)")?(.*)$"#).unwrap();
    let ref_re = regex::Regex::new(r"\[ref=(e\d+)\]").unwrap();
    let known = tables.known_roles();

    let mut records = Vec::new();
    for line in outline.lines() {
        let caps = match line_re.captures(line) {
            Some(c) => c,
            None => continue,
        };
        let role = caps.get(2).unwrap().as_str();
        if !known.contains(role) {
            debug!(role = role, "skipping unknown role while diffing");
            continue;
        }
        let rest = caps.get(4).map(|m| m.as_str()).unwrap_or("");
        records.push(ElementRecord {
            role: role.to_string(),
            name: caps.get(3).map(|m| m.as_str()).unwrap_or("").to_string(),
            ref_id: ref_re
                .captures(rest)
                .map(|c| c.get(1).unwrap().as_str().to_string()),
            indent: caps.get(1).unwrap().as_str().len(),
        });
    }
    records
}

/// Diff two outlines and render the report.
pub fn diff_outlines(
    previous: &str,
    current: &str,
    previous_url: &str,
    current_url: &str,
    tables: &RoleTables,
) -> DiffReport {
    let prev = parse_elements(previous, tables);
    let cur = parse_elements(current, tables);

    let mut prev_by_ref: HashMap<&str, usize> = HashMap::new();
    let mut prev_by_key: HashMap<(&str, &str), usize> = HashMap::new();
    for (idx, elem) in prev.iter().enumerate() {
        if let Some(reference) = &elem.ref_id {
            prev_by_ref.entry(reference.as_str()).or_insert(idx);
        }
        prev_by_key
            .entry((elem.role.as_str(), elem.name.as_str()))
            .or_insert(idx);
    }

    let mut used_refs: HashSet<&str> = HashSet::new();
    let mut used_keys: HashSet<(&str, &str)> = HashSet::new();
    let mut added: Vec<&ElementRecord> = Vec::new();
    let mut changed: Vec<(&ElementRecord, &ElementRecord)> = Vec::new();
    let mut unchanged = 0usize;

    for elem in &cur {
        let by_ref = elem
            .ref_id
            .as_ref()
            .and_then(|r| prev_by_ref.get(r.as_str()).map(|&idx| (r.as_str(), idx)));
        if let Some((reference, prev_idx)) = by_ref {
            used_refs.insert(reference);
            let old = &prev[prev_idx];
            if old.name != elem.name {
                changed.push((old, elem));
            } else {
                unchanged += 1;
            }
            continue;
        }
        let key = (elem.role.as_str(), elem.name.as_str());
        if prev_by_key.contains_key(&key) {
            used_keys.insert(key);
            unchanged += 1;
        } else {
            added.push(elem);
        }
    }

    let removed: Vec<&ElementRecord> = prev
        .iter()
        .filter(|elem| {
            let ref_used = elem
                .ref_id
                .as_ref()
                .map(|r| used_refs.contains(r.as_str()))
                .unwrap_or(false);
            let key_used = used_keys.contains(&(elem.role.as_str(), elem.name.as_str()));
            !ref_used && !key_used
        })
        .collect();

    // Churn in purely structural roles is noise, not signal.
    let added: Vec<&ElementRecord> = added
        .into_iter()
        .filter(|e| !tables.is_noise(&e.role))
        .collect();
    let removed: Vec<&ElementRecord> = removed
        .into_iter()
        .filter(|e| !tables.is_noise(&e.role))
        .collect();

    let stats = DiffStats {
        added: added.len(),
        removed: removed.len(),
        changed: changed.len(),
        unchanged,
    };
    let touched = stats.added + stats.removed + stats.changed;
    let diff_ratio = if cur.is_empty() {
        if touched > 0 {
            1.0
        } else {
            0.0
        }
    } else {
        touched as f64 / cur.len() as f64
    };

    let text = render(
        &added,
        &removed,
        &changed,
        unchanged,
        previous_url,
        current_url,
        &cur,
    );

    DiffReport {
        stats,
        text,
        diff_ratio,
        is_empty: touched == 0,
        is_large_diff: diff_ratio > LARGE_DIFF_RATIO,
    }
}

fn render(
    added: &[&ElementRecord],
    removed: &[&ElementRecord],
    changed: &[(&ElementRecord, &ElementRecord)],
    unchanged: usize,
    previous_url: &str,
    current_url: &str,
    current: &[ElementRecord],
) -> String {
    let mut out = String::new();
    out.push_str(&format!("URL: {}\n", current_url));
    if previous_url != current_url {
        out.push_str(&format!("CHANGED from {}\n", previous_url));
    }
    if let Some(title) = current.iter().find(|e| e.role == "heading") {
        if !title.name.is_empty() {
            out.push_str(&format!("Title: {}\n", title.name));
        }
    }
    out.push('\n');

    for elem in added {
        out.push_str(&format!("+ {}{}\n", describe(elem), ref_tag(elem)));
    }
    for elem in removed {
        out.push_str(&format!("- {}{}\n", describe(elem), ref_tag(elem)));
    }
    for (old, new) in changed {
        out.push_str(&format!(
            "~ {}{}: \"{}\" \u{2192} \"{}\"\n",
            new.role,
            ref_tag(new),
            old.name,
            new.name
        ));
    }
    if unchanged > 0 {
        out.push_str(&format!("= {} unchanged elements (not shown)\n", unchanged));
    }
    out
}

fn describe(elem: &ElementRecord) -> String {
    if elem.name.is_empty() {
        elem.role.clone()
    } else {
        format!("{} \"{}\"", elem.role, elem.name)
    }
}

fn ref_tag(elem: &ElementRecord) -> String {
    match &elem.ref_id {
        Some(reference) => format!(" [ref={}]", reference),
        None => String::new(),
    }
}

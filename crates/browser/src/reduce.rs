//! The outline reducer pipeline.
//!
//! A reducer is a pure `outline -> outline` transform over the line grammar
//! `<indent>- <role> "<name>"? [ref=e<n>]? <suffix>?`. Each reducer keeps
//! every ref tag it encounters on a kept element, or relocates the ref into
//! a preserved summary line; the composed pipeline is idempotent.
//!
//! Pipeline order is load-bearing: strip-chrome runs before prune-attributes
//! so chrome detection still sees `[url=...]` suffixes, and semantic
//! compression runs before name truncation so compressed names rarely hit
//! the length limit at all.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::outline::RoleTables;

/// Tuning for the pipeline. `viewport_refs` and `interactive_only` switch
/// on the two optional tail reducers.
#[derive(Debug, Clone, Default)]
pub struct ReduceOptions {
    pub max_items: usize,
    pub max_name_len: usize,
    pub viewport_refs: Option<HashSet<String>>,
    pub interactive_only: bool,
}

impl ReduceOptions {
    pub fn standard() -> Self {
        Self {
            max_items: 5,
            max_name_len: 120,
            viewport_refs: None,
            interactive_only: false,
        }
    }
}

static LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(\s*)- (\S+)(?: "([^"]*)")?(.*)$"#).unwrap());
static REF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[ref=(e\d+)\]").unwrap());

/// One parsed outline line. `rest` is everything after the name (ref tag
/// and residual attributes), preserved verbatim on re-render.
#[derive(Debug, Clone)]
struct ParsedLine {
    indent: usize,
    role: String,
    name: Option<String>,
    rest: String,
    ref_id: Option<String>,
}

impl ParsedLine {
    fn parse(line: &str) -> Option<Self> {
        let caps = LINE_RE.captures(line)?;
        let rest = caps.get(4).map(|m| m.as_str()).unwrap_or("").to_string();
        let ref_id = REF_RE
            .captures(&rest)
            .map(|c| c.get(1).unwrap().as_str().to_string());
        Some(Self {
            indent: caps.get(1).unwrap().as_str().len(),
            role: caps.get(2).unwrap().as_str().to_string(),
            name: caps.get(3).map(|m| m.as_str().to_string()),
            rest,
            ref_id,
        })
    }

    fn level(&self) -> usize {
        self.indent / 2
    }

    fn render(&self) -> String {
        let mut out = " ".repeat(self.indent);
        out.push_str("- ");
        out.push_str(&self.role);
        if let Some(name) = &self.name {
            out.push_str(&format!(" \"{}\"", name));
        }
        out.push_str(&self.rest);
        out
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

/// Index one past the last line of the subtree rooted at `start`.
fn subtree_end(lines: &[String], start: usize) -> usize {
    let base = indent_of(&lines[start]);
    let mut j = start + 1;
    let mut end = j;
    while j < lines.len() {
        if lines[j].trim().is_empty() {
            j += 1;
            continue;
        }
        if indent_of(&lines[j]) > base {
            j += 1;
            end = j;
        } else {
            break;
        }
    }
    end
}

fn to_lines(outline: &str) -> Vec<String> {
    outline.lines().map(|l| l.to_string()).collect()
}

fn refs_in(text: &str) -> Vec<String> {
    REF_RE
        .captures_iter(text)
        .map(|c| c.get(1).unwrap().as_str().to_string())
        .collect()
}

/// Run the full default pipeline.
pub fn optimize(outline: &str, tables: &RoleTables, opts: &ReduceOptions) -> String {
    let mut s = strip_chrome(outline, tables);
    s = prune_attributes(&s);
    s = remove_noise(&s);
    s = dedup_links(&s);
    s = collapse_redundant_children(&s, tables);
    s = semantic_compress(&s);
    s = truncate_names(&s, opts.max_name_len);
    s = smart_truncate(&s, opts.max_items);
    if let Some(visible) = &opts.viewport_refs {
        s = viewport_only(&s, visible);
    }
    if opts.interactive_only {
        s = interactive_only(&s);
    }
    tidy(&s)
}

// ── 1. Strip chrome ──────────────────────────────────────────────────

static CHROME_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)skip to|cookie|privacy|terms of service").unwrap());
const AD_PREFIXES: &[&str] = &["Advertisement", "Promoted", "Sponsored"];
const CHROME_GROUP_NAME: &str = "chrome-actions";

/// Drop site-chrome subtrees (banners, footers, top-level navigation,
/// consent walls, ads). Interactive refs found inside are relocated to a
/// synthesized `group "chrome-actions"` block so sign-in, search and the
/// like stay reachable.
pub fn strip_chrome(outline: &str, tables: &RoleTables) -> String {
    let lines = to_lines(outline);
    let mut out: Vec<String> = Vec::new();
    let mut rescued: Vec<String> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = &lines[i];
        if line.trim().is_empty() {
            out.push(line.clone());
            i += 1;
            continue;
        }
        let parsed = match ParsedLine::parse(line) {
            Some(p) => p,
            None => {
                out.push(line.clone());
                i += 1;
                continue;
            }
        };

        // A previously synthesized rescue block is passed through verbatim.
        if parsed.role == "group" && parsed.name.as_deref() == Some(CHROME_GROUP_NAME) {
            let end = subtree_end(&lines, i);
            out.extend(lines[i..end].iter().cloned());
            i = end;
            continue;
        }

        let name = parsed.name.as_deref().unwrap_or("");
        let top_level = parsed.level() <= 1;
        let is_chrome = parsed.role == "banner"
            || parsed.role == "contentinfo"
            || (parsed.role == "navigation" && top_level)
            || (top_level && CHROME_NAME_RE.is_match(name))
            || AD_PREFIXES.iter().any(|p| name.starts_with(p));

        if is_chrome {
            let end = subtree_end(&lines, i);
            for dropped in &lines[i..end] {
                if let Some(p) = ParsedLine::parse(dropped) {
                    if p.ref_id.is_some() && tables.is_interactive(&p.role) {
                        let mut keep = p.clone();
                        keep.indent = 2;
                        rescued.push(keep.render());
                    }
                }
            }
            i = end;
        } else {
            out.push(line.clone());
            i += 1;
        }
    }

    if !rescued.is_empty() {
        out.push(format!("- group \"{}\"", CHROME_GROUP_NAME));
        out.extend(rescued);
    }
    out.join("\n") + "\n"
}

// ── 2. Prune attributes ──────────────────────────────────────────────

static URL_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*- /url:").unwrap());
static BARE_URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://\S+$").unwrap());
static URL_ATTR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r" \[url=[^\]]*\]").unwrap());
static EMPTY_DESC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#" \[description=""\]"#).unwrap());
static LEVEL_ATTR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r" \[level=\d+\]").unwrap());

/// Strip presentation attributes. Every ref tag is first swapped for an
/// opaque placeholder so none of the attribute regexes can touch it.
pub fn prune_attributes(outline: &str) -> String {
    let shielded = REF_RE.replace_all(outline, "\u{1}$1\u{2}");

    let mut out: Vec<String> = Vec::new();
    for line in shielded.lines() {
        if URL_LINE_RE.is_match(line) {
            continue;
        }
        let mut line = line.to_string();
        if let Some(parsed) = ParsedLine::parse(&line) {
            if let Some(name) = &parsed.name {
                if BARE_URL_RE.is_match(name) {
                    let mut shortened = parsed.clone();
                    shortened.name = Some(shorten_url(name));
                    line = shortened.render();
                }
            }
        }
        let line = URL_ATTR_RE.replace_all(&line, "");
        let line = EMPTY_DESC_RE.replace_all(&line, "");
        let line = line.replace(" [focused]", "").replace(" [disabled=false]", "");
        let line = LEVEL_ATTR_RE.replace_all(&line, "");
        out.push(line.to_string());
    }

    let joined = out.join("\n") + "\n";
    joined
        .replace('\u{1}', "[ref=")
        .replace('\u{2}', "]")
}

/// `https://example.com/a/b?q=1#frag` -> `example.com/a/b`
fn shorten_url(url: &str) -> String {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let end = without_scheme
        .find(['?', '#'])
        .unwrap_or(without_scheme.len());
    without_scheme[..end].to_string()
}

// ── 3. Remove noise ──────────────────────────────────────────────────

static PLACEHOLDER_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*- /placeholder:").unwrap());

/// Drop placeholder lines and text lines with nothing to say.
pub fn remove_noise(outline: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in outline.lines() {
        if PLACEHOLDER_LINE_RE.is_match(line) {
            continue;
        }
        if let Some(parsed) = ParsedLine::parse(line) {
            if parsed.role == "text"
                && parsed
                    .name
                    .as_deref()
                    .map(|n| n.trim().is_empty())
                    .unwrap_or(true)
            {
                continue;
            }
        }
        out.push(line.to_string());
    }
    out.join("\n") + "\n"
}

// ── 4. Dedup links ───────────────────────────────────────────────────

/// Within each article subtree, repeated link names are dropped; the first
/// occurrence owns the ref. Unnamed img lines go too.
pub fn dedup_links(outline: &str) -> String {
    let lines = to_lines(outline);
    let mut out: Vec<String> = Vec::new();
    // (article indent, names already emitted in that article)
    let mut articles: Vec<(usize, HashSet<String>)> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = &lines[i];
        let parsed = match ParsedLine::parse(line) {
            Some(p) => p,
            None => {
                out.push(line.clone());
                i += 1;
                continue;
            }
        };

        while articles
            .last()
            .map(|(article_indent, _)| parsed.indent <= *article_indent)
            .unwrap_or(false)
        {
            articles.pop();
        }

        if parsed.role == "img" && parsed.name.is_none() {
            i += 1;
            continue;
        }

        if parsed.role == "link" {
            if let (Some(name), Some((_, seen))) = (&parsed.name, articles.last_mut()) {
                if !seen.insert(name.clone()) {
                    i = subtree_end(&lines, i);
                    continue;
                }
            }
        }

        if parsed.role == "article" {
            articles.push((parsed.indent, HashSet::new()));
        }
        out.push(line.clone());
        i += 1;
    }
    out.join("\n") + "\n"
}

// ── 5. Collapse redundant children ───────────────────────────────────

/// Children of a verbosely named link/button usually restate the name.
/// Drop the whole descendant block when every descendant is
/// non-interactive and echoes the parent; any interactive descendant
/// vetoes the collapse.
pub fn collapse_redundant_children(outline: &str, tables: &RoleTables) -> String {
    let lines = to_lines(outline);
    let mut drop = vec![false; lines.len()];

    for i in 0..lines.len() {
        let parsed = match ParsedLine::parse(&lines[i]) {
            Some(p) => p,
            None => continue,
        };
        if parsed.role != "link" && parsed.role != "button" {
            continue;
        }
        let parent_name = match &parsed.name {
            Some(n) if n.chars().count() > 40 => n.to_lowercase(),
            _ => continue,
        };
        let end = subtree_end(&lines, i);
        if end == i + 1 {
            continue;
        }
        let all_redundant = lines[i + 1..end].iter().all(|child| {
            match ParsedLine::parse(child) {
                Some(c) => {
                    !tables.is_interactive(&c.role) && name_echoes(&c.name, &parent_name)
                }
                None => true,
            }
        });
        if all_redundant {
            for flag in drop.iter_mut().take(end).skip(i + 1) {
                *flag = true;
            }
        }
    }

    let kept: Vec<String> = lines
        .into_iter()
        .zip(drop)
        .filter(|(_, d)| !*d)
        .map(|(l, _)| l)
        .collect();
    kept.join("\n") + "\n"
}

/// At least 60% of the child's >3-letter words appear in the parent name.
fn name_echoes(child_name: &Option<String>, parent_lower: &str) -> bool {
    let name = match child_name {
        Some(n) => n,
        None => return true,
    };
    let words: Vec<String> = name
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.len() > 3)
        .collect();
    if words.is_empty() {
        return true;
    }
    let matched = words.iter().filter(|w| parent_lower.contains(w.as_str())).count();
    matched * 10 >= words.len() * 6
}

// ── 6. Semantic compress ─────────────────────────────────────────────

static FROM_PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"From (\d+(?:,\d{3})*(?:\.\d{2})?) US dollars").unwrap());
static PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:,\d{3})*(?:\.\d{2})?) US dollars").unwrap());
static DEP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Leaves (.*?) at (\d{1,2}:\d{2})\s?(AM|PM)").unwrap());
static ARR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Arrives (.*?) at (\d{1,2}:\d{2})\s?(AM|PM)").unwrap());
static DURATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Total duration (\d+) hr(?: (\d+) min)?").unwrap());
static AIRLINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"US dollars[^.]*\.\s*(.*?)\.\s*Leaves").unwrap());
static STOPS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+|one|two|three) stops?").unwrap());

/// Airport display name fragments to IATA codes. Unknown airports fall
/// back to the first three letters of the name, uppercased.
const AIRPORT_IATA: &[(&str, &str)] = &[
    ("San Francisco International", "SFO"),
    ("John F. Kennedy International", "JFK"),
    ("LaGuardia", "LGA"),
    ("Newark Liberty International", "EWR"),
    ("Los Angeles International", "LAX"),
    ("O'Hare International", "ORD"),
    ("Midway International", "MDW"),
    ("Seattle-Tacoma International", "SEA"),
    ("Logan International", "BOS"),
    ("Denver International", "DEN"),
    ("Dallas/Fort Worth International", "DFW"),
    ("Hartsfield-Jackson Atlanta International", "ATL"),
    ("Miami International", "MIA"),
    ("Phoenix Sky Harbor International", "PHX"),
    ("Orlando International", "MCO"),
    ("Harry Reid International", "LAS"),
    ("Austin-Bergstrom International", "AUS"),
    ("Portland International", "PDX"),
    ("Washington Dulles International", "IAD"),
    ("Ronald Reagan Washington National", "DCA"),
    ("Heathrow", "LHR"),
    ("Charles de Gaulle", "CDG"),
];

/// Rewrite names only. Flight itineraries collapse to one compact token
/// run; otherwise currency and stop-word phrases are normalized and
/// whitespace collapsed.
pub fn semantic_compress(outline: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in outline.lines() {
        match ParsedLine::parse(line) {
            Some(mut parsed) => {
                if let Some(name) = parsed.name.clone() {
                    let rewritten = compress_flight(&name).unwrap_or_else(|| compress_plain(&name));
                    parsed.name = Some(rewritten);
                    out.push(parsed.render());
                } else {
                    out.push(line.to_string());
                }
            }
            None => out.push(line.to_string()),
        }
    }
    out.join("\n") + "\n"
}

fn compress_plain(name: &str) -> String {
    let name = FROM_PRICE_RE.replace_all(name, "$$$1");
    let name = PRICE_RE.replace_all(&name, "$$$1");
    let name = name
        .replace("Nonstop", "nonstop")
        .replace("Round trip", "RT")
        .replace("one stop", "1-stop")
        .replace("two stops", "2-stop");
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A flight itinerary name carries a price, a departure and an arrival.
/// Airline, duration and stop count join the rewrite when present.
fn compress_flight(name: &str) -> Option<String> {
    let price = PRICE_RE.captures(name)?.get(1)?.as_str().to_string();
    let dep = DEP_RE.captures(name)?;
    let arr = ARR_RE.captures(name)?;

    let dep_code = airport_code(dep.get(1)?.as_str());
    let arr_code = airport_code(arr.get(1)?.as_str());
    let dep_time = format!("{}{}", dep.get(2)?.as_str(), dep.get(3)?.as_str());
    let arr_time = format!("{}{}", arr.get(2)?.as_str(), arr.get(3)?.as_str());

    let mut parts: Vec<String> = Vec::new();
    if let Some(airline) = AIRLINE_RE.captures(name).and_then(|c| c.get(1)) {
        parts.push(airline.as_str().trim().to_string());
    }
    parts.push(format!("{} {}\u{2192}{} {}", dep_code, dep_time, arr_code, arr_time));
    if let Some(duration) = DURATION_RE.captures(name) {
        let hours = duration.get(1).map(|m| m.as_str()).unwrap_or("0");
        match duration.get(2) {
            Some(mins) => parts.push(format!("{}h{}", hours, mins.as_str())),
            None => parts.push(format!("{}h", hours)),
        }
    }
    if name.contains("Nonstop") || name.contains("nonstop") {
        parts.push("nonstop".to_string());
    } else if let Some(stops) = STOPS_RE.captures(name) {
        let n = match stops.get(1)?.as_str().to_lowercase().as_str() {
            "one" => "1".to_string(),
            "two" => "2".to_string(),
            "three" => "3".to_string(),
            digits => digits.to_string(),
        };
        parts.push(format!("{}-stop", n));
    }
    parts.push(format!("${}", price));
    Some(parts.join(" "))
}

fn airport_code(airport: &str) -> String {
    let airport = airport.trim();
    for (fragment, code) in AIRPORT_IATA {
        if airport.contains(fragment) {
            return code.to_string();
        }
    }
    airport
        .chars()
        .filter(|c| c.is_alphabetic())
        .take(3)
        .collect::<String>()
        .to_uppercase()
}

// ── 7. Truncate long names ───────────────────────────────────────────

/// Cut names over the limit at a word boundary and mark the cut with
/// `...`. Output names never exceed the limit, so a second pass is a
/// no-op.
pub fn truncate_names(outline: &str, max_name_len: usize) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in outline.lines() {
        match ParsedLine::parse(line) {
            Some(mut parsed) => {
                if let Some(name) = &parsed.name {
                    if name.chars().count() > max_name_len {
                        parsed.name = Some(truncate_at_word(name, max_name_len.saturating_sub(3)));
                    }
                }
                out.push(parsed.render());
            }
            None => out.push(line.to_string()),
        }
    }
    out.join("\n") + "\n"
}

fn truncate_at_word(name: &str, budget: usize) -> String {
    let prefix: String = name.chars().take(budget).collect();
    let cut = prefix.rfind(char::is_whitespace).unwrap_or(prefix.len());
    format!("{}...", prefix[..cut].trim_end())
}

// ── 8. Smart truncate ────────────────────────────────────────────────

const TRUNCATABLE_ROLES: &[&str] = &["listitem", "row", "article"];

/// Long sibling runs of listitems/rows/articles keep only the first K
/// items. The summary line names up to three of the hidden refs but they
/// are informational only: truncation removed them from the page the
/// agent can act on.
pub fn smart_truncate(outline: &str, max_items: usize) -> String {
    let lines = to_lines(outline);
    let mut out: Vec<String> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let parsed = match ParsedLine::parse(&lines[i]) {
            Some(p) => p,
            None => {
                out.push(lines[i].clone());
                i += 1;
                continue;
            }
        };
        if !TRUNCATABLE_ROLES.contains(&parsed.role.as_str()) {
            out.push(lines[i].clone());
            i += 1;
            continue;
        }

        // Collect the full run of same-role siblings at this indent.
        let mut item_starts: Vec<usize> = vec![i];
        let mut j = subtree_end(&lines, i);
        while j < lines.len() {
            match ParsedLine::parse(&lines[j]) {
                Some(next) if next.indent == parsed.indent && next.role == parsed.role => {
                    item_starts.push(j);
                    j = subtree_end(&lines, j);
                }
                _ => break,
            }
        }

        if item_starts.len() <= max_items {
            out.extend(lines[i..j].iter().cloned());
            i = j;
            continue;
        }

        let cutoff = item_starts[max_items];
        out.extend(lines[i..cutoff].iter().cloned());

        let hidden = refs_in(&lines[cutoff..j].join("\n"));
        let skipped = item_starts.len() - max_items;
        let mut summary = format!(
            "{}- text \"... and {} more {}s",
            " ".repeat(parsed.indent),
            skipped,
            parsed.role
        );
        if !hidden.is_empty() {
            let sample: Vec<&str> = hidden.iter().take(3).map(|s| s.as_str()).collect();
            summary.push_str(&format!(
                " ({} refs hidden: {}...)",
                hidden.len(),
                sample.join(",")
            ));
        }
        summary.push('"');
        out.push(summary);
        i = j;
    }
    out.join("\n") + "\n"
}

// ── 9/10. Visibility filters ─────────────────────────────────────────

/// Keep only lines whose ref is in the visible set, plus the structural
/// ancestors that lead to them.
pub fn viewport_only(outline: &str, visible: &HashSet<String>) -> String {
    keep_with_ancestors(outline, |parsed| {
        parsed
            .ref_id
            .as_ref()
            .map(|r| visible.contains(r))
            .unwrap_or(false)
    })
}

/// Keep only ref-carrying lines plus their structural ancestors.
pub fn interactive_only(outline: &str) -> String {
    keep_with_ancestors(outline, |parsed| parsed.ref_id.is_some())
}

fn keep_with_ancestors(outline: &str, pred: impl Fn(&ParsedLine) -> bool) -> String {
    let lines = to_lines(outline);
    let mut keep = vec![false; lines.len()];
    // Ancestor chain: (line index, indent).
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let parsed = match ParsedLine::parse(line) {
            Some(p) => p,
            None => continue,
        };
        while let Some(&(_, indent)) = stack.last() {
            if indent >= parsed.indent {
                stack.pop();
            } else {
                break;
            }
        }
        if pred(&parsed) {
            keep[i] = true;
            for &(ancestor, _) in &stack {
                keep[ancestor] = true;
            }
        }
        stack.push((i, parsed.indent));
    }

    let kept: Vec<String> = lines
        .into_iter()
        .zip(keep)
        .filter(|(_, k)| *k)
        .map(|(l, _)| l)
        .collect();
    kept.join("\n") + "\n"
}

// ── Final tidy ───────────────────────────────────────────────────────

/// Collapse runs of three or more blank lines to two and trim the ends.
pub fn tidy(outline: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut blanks = 0;
    for line in outline.lines() {
        if line.trim().is_empty() {
            blanks += 1;
            if blanks <= 2 {
                out.push("");
            }
        } else {
            blanks = 0;
            out.push(line);
        }
    }
    let joined = out.join("\n");
    let trimmed = joined.trim_matches('\n');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Baseline variant ─────────────────────────────────────────────────

const BASELINE_STRUCTURAL: &[&str] = &["generic", "group", "region", "document", "main", "none"];

/// The no-pipeline entry point: keep the ref tagging, drop unnamed purely
/// structural nodes (promoting their children), then remove any subtree
/// with no reference in it at all.
pub fn baseline(outline: &str) -> String {
    // Pass 1: dissolve unnamed structural lines.
    let mut lines = to_lines(outline);
    loop {
        let mut dissolved = false;
        let mut next: Vec<String> = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let parsed = match ParsedLine::parse(&lines[i]) {
                Some(p) => p,
                None => {
                    next.push(lines[i].clone());
                    i += 1;
                    continue;
                }
            };
            if BASELINE_STRUCTURAL.contains(&parsed.role.as_str())
                && parsed.name.is_none()
                && parsed.ref_id.is_none()
            {
                let end = subtree_end(&lines, i);
                for child in &lines[i + 1..end] {
                    next.push(dedent(child));
                }
                i = end;
                dissolved = true;
            } else {
                next.push(lines[i].clone());
                i += 1;
            }
        }
        lines = next;
        if !dissolved {
            break;
        }
    }

    // Pass 2: prune ref-free subtrees.
    let mut out: Vec<String> = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if lines[i].trim().is_empty() {
            out.push(lines[i].clone());
            i += 1;
            continue;
        }
        let end = subtree_end(&lines, i);
        if refs_in(&lines[i..end].join("\n")).is_empty() {
            i = end;
        } else {
            out.push(lines[i].clone());
            i += 1;
        }
    }
    tidy(&(out.join("\n") + "\n"))
}

fn dedent(line: &str) -> String {
    line.strip_prefix("  ").unwrap_or(line).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> RoleTables {
        RoleTables::default()
    }

    fn opts() -> ReduceOptions {
        ReduceOptions::standard()
    }

    #[test]
    fn strip_chrome_drops_banner_and_rescues_refs() {
        let outline = "\
- banner \"Site header\"
  - link \"Sign in\" [ref=e1]
  - img \"logo\"
- main
  - heading \"Story\" [ref=e2]
- contentinfo \"Footer\"
  - link \"Imprint\" [ref=e3]
";
        let result = strip_chrome(outline, &tables());
        assert!(!result.contains("banner"));
        assert!(!result.contains("contentinfo"));
        assert!(result.contains("- group \"chrome-actions\""));
        assert!(result.contains("  - link \"Sign in\" [ref=e1]"));
        assert!(result.contains("  - link \"Imprint\" [ref=e3]"));
        assert!(result.contains("- heading \"Story\" [ref=e2]"));
    }

    #[test]
    fn strip_chrome_matches_consent_names_only_at_top_level() {
        let outline = "\
- region \"Cookie consent\"
  - button \"Accept all\" [ref=e1]
- main
  - article \"Recipe\"
    - region \"How to bake cookie dough\"
      - text \"Use real butter.\"
";
        let result = strip_chrome(outline, &tables());
        assert!(!result.contains("Cookie consent"));
        // Deeper than indent 1: kept even though the name says cookie.
        assert!(result.contains("How to bake cookie dough"));
        assert!(result.contains("chrome-actions"));
        assert!(result.contains("[ref=e1]"));
    }

    #[test]
    fn strip_chrome_moves_ads_out_of_content_at_any_depth() {
        let outline = "\
- main
  - region
    - link \"Sponsored: buy things\" [ref=e1]
  - text \"content\"
";
        let result = strip_chrome(outline, &tables());
        // The ad subtree is gone from the content; its ref survives only
        // in the rescue block.
        let group_at = result.find("- group \"chrome-actions\"").unwrap();
        let ad_at = result.find("Sponsored").unwrap();
        assert!(ad_at > group_at);
        assert_eq!(result.matches("Sponsored").count(), 1);
        assert!(result.contains("content"));
    }

    #[test]
    fn strip_chrome_is_idempotent() {
        let outline = "\
- banner
  - link \"Cookie settings\" [ref=e1]
- main
  - text \"body\"
";
        let once = strip_chrome(outline, &tables());
        let twice = strip_chrome(&once, &tables());
        assert_eq!(once, twice);
    }

    #[test]
    fn prune_attributes_strips_noise_but_not_refs() {
        let outline = "\
- heading \"Title\" [ref=e1] [level=2]
- link \"Go\" [ref=e2] [url=https://example.com/x] [focused] [disabled=false]
- /url: https://example.com/x
";
        let result = prune_attributes(outline);
        assert_eq!(
            result,
            "- heading \"Title\" [ref=e1]\n- link \"Go\" [ref=e2]\n"
        );
    }

    #[test]
    fn prune_attributes_shortens_bare_url_names() {
        let outline = "- link \"https://news.example.com/story/1?utm=x#top\" [ref=e1]\n";
        let result = prune_attributes(outline);
        assert_eq!(result, "- link \"news.example.com/story/1\" [ref=e1]\n");
    }

    #[test]
    fn remove_noise_drops_empty_text_and_placeholders() {
        let outline = "\
- text \"  \"
- text
- /placeholder: Search
- text \"real content\"
";
        let result = remove_noise(outline);
        assert_eq!(result, "- text \"real content\"\n");
    }

    #[test]
    fn dedup_links_inside_articles() {
        let outline = "\
- article \"Story\"
  - link \"Read more\" [ref=e1]
  - text \"summary\"
  - link \"Read more\" [ref=e2]
- link \"Read more\" [ref=e3]
";
        let result = dedup_links(outline);
        assert!(result.contains("[ref=e1]"));
        assert!(!result.contains("[ref=e2]"));
        // Outside any article: kept.
        assert!(result.contains("[ref=e3]"));
    }

    #[test]
    fn dedup_drops_unnamed_images() {
        let outline = "- img\n- img \"Chart of results\"\n";
        let result = dedup_links(outline);
        assert_eq!(result, "- img \"Chart of results\"\n");
    }

    #[test]
    fn collapse_drops_children_that_echo_the_parent() {
        let outline = "\
- link \"Weather forecast for San Francisco this weekend\" [ref=e1]
  - text \"Weather forecast\"
  - text \"San Francisco weekend\"
";
        let result = collapse_redundant_children(outline, &tables());
        assert_eq!(
            result,
            "- link \"Weather forecast for San Francisco this weekend\" [ref=e1]\n"
        );
    }

    #[test]
    fn collapse_vetoed_by_interactive_descendant() {
        let outline = "\
- link \"Weather forecast for San Francisco this weekend\" [ref=e1]
  - text \"Weather forecast\"
  - button \"forecast\" [ref=e2]
";
        let result = collapse_redundant_children(outline, &tables());
        assert!(result.contains("[ref=e2]"));
        assert!(result.contains("- text \"Weather forecast\""));
    }

    #[test]
    fn collapse_keeps_children_with_novel_words() {
        let outline = "\
- link \"Weather forecast for San Francisco this weekend\" [ref=e1]
  - text \"Severe thunderstorm warning issued\"
";
        let result = collapse_redundant_children(outline, &tables());
        assert!(result.contains("thunderstorm"));
    }

    #[test]
    fn semantic_compress_rewrites_currency_and_stopwords() {
        let outline = "- link \"From 320 US dollars Round trip Nonstop\" [ref=e1]\n";
        let result = semantic_compress(outline);
        assert_eq!(result, "- link \"$320 RT nonstop\" [ref=e1]\n");
    }

    #[test]
    fn flight_itinerary_compresses_to_one_token_run() {
        let name = "From 320 US dollars round trip. United. Leaves San Francisco International at 7:15 AM. Arrives John F. Kennedy International at 3:40 PM. Total duration 5 hr 25 min. Nonstop";
        let outline = format!("- link \"{}\" [ref=e7]\n", name);
        let result = semantic_compress(&outline);
        assert_eq!(
            result,
            "- link \"United SFO 7:15AM\u{2192}JFK 3:40PM 5h25 nonstop $320\" [ref=e7]\n"
        );
    }

    #[test]
    fn flight_with_unknown_airport_falls_back_to_three_letters() {
        let name = "From 99 US dollars one way. Acme Air. Leaves Springfield Regional at 9:05 AM. Arrives Shelbyville Municipal at 10:10 AM. Total duration 1 hr 5 min. 1 stop";
        let outline = format!("- link \"{}\" [ref=e1]\n", name);
        let result = semantic_compress(&outline);
        assert_eq!(
            result,
            "- link \"Acme Air SPR 9:05AM\u{2192}SHE 10:10AM 1h5 1-stop $99\" [ref=e1]\n"
        );
    }

    #[test]
    fn semantic_compress_is_idempotent_on_flight_output() {
        let outline = "- link \"United SFO 7:15AM\u{2192}JFK 3:40PM 5h25 nonstop $320\" [ref=e7]\n";
        assert_eq!(semantic_compress(outline), outline);
    }

    #[test]
    fn truncate_cuts_at_word_boundary_and_keeps_ref() {
        let name = "word ".repeat(40);
        let outline = format!("- link \"{}\" [ref=e1] [level=3]\n", name.trim_end());
        let result = truncate_names(&outline, 120);
        let parsed = ParsedLine::parse(result.lines().next().unwrap()).unwrap();
        let truncated = parsed.name.unwrap();
        assert!(truncated.ends_with("..."));
        assert!(truncated.chars().count() <= 120);
        assert!(!truncated.contains("wor..."), "cut mid-word: {truncated}");
        assert_eq!(parsed.ref_id.as_deref(), Some("e1"));
        assert!(parsed.rest.contains("[level=3]"));
    }

    #[test]
    fn truncate_is_idempotent() {
        let name = "x".repeat(300);
        let outline = format!("- text \"{}\"\n", name);
        let once = truncate_names(&outline, 120);
        assert_eq!(truncate_names(&once, 120), once);
    }

    #[test]
    fn smart_truncate_matches_the_documented_shape() {
        let mut outline = String::from("- list \"results\"\n");
        for n in 1..=20 {
            outline.push_str(&format!("  - listitem \"Item {}\" [ref=e{}]\n", n, n));
        }
        let result = smart_truncate(&outline, 5);
        let lines: Vec<&str> = result.lines().collect();
        assert_eq!(lines.len(), 7);
        assert!(lines[5].contains("Item 5"));
        let summary_re = Regex::new(
            r#"^\s*- text "\.\.\. and 15 more listitems( \(\d+ refs hidden: e\d+(,e\d+){0,2}\.\.\.\))?"$"#,
        )
        .unwrap();
        assert!(summary_re.is_match(lines[6]), "summary was: {}", lines[6]);
        assert!(lines[6].contains("15 refs hidden: e6,e7,e8..."));
    }

    #[test]
    fn smart_truncate_short_runs_untouched() {
        let outline = "\
- list
  - listitem \"a\" [ref=e1]
  - listitem \"b\" [ref=e2]
";
        assert_eq!(smart_truncate(outline, 5), outline);
    }

    #[test]
    fn smart_truncate_counts_items_with_subtrees() {
        let mut outline = String::from("- table\n");
        for n in 1..=8 {
            outline.push_str(&format!("  - row \"r{}\"\n", n));
            outline.push_str(&format!("    - cell \"c{}\" [ref=e{}]\n", n, n));
        }
        let result = smart_truncate(&outline, 5);
        assert!(result.contains("... and 3 more rows"));
        assert!(result.contains("3 refs hidden: e6,e7,e8..."));
        // Kept items retain their subtrees.
        assert!(result.contains("- cell \"c5\" [ref=e5]"));
        assert!(!result.contains("\"r6\""));
    }

    #[test]
    fn viewport_only_keeps_visible_refs_and_ancestors() {
        let outline = "\
- main
  - list
    - listitem \"a\"
      - link \"first\" [ref=e1]
    - listitem \"b\"
      - link \"second\" [ref=e2]
";
        let visible: HashSet<String> = ["e2".to_string()].into();
        let result = viewport_only(outline, &visible);
        assert_eq!(
            result,
            "- main\n  - list\n    - listitem \"b\"\n      - link \"second\" [ref=e2]\n"
        );
    }

    #[test]
    fn interactive_only_keeps_ref_lines_and_ancestors() {
        let outline = "\
- main
  - text \"prose\"
  - group
    - button \"Go\" [ref=e1]
";
        let result = interactive_only(outline);
        assert_eq!(result, "- main\n  - group\n    - button \"Go\" [ref=e1]\n");
    }

    #[test]
    fn tidy_collapses_blank_runs() {
        let outline = "- text \"a\"\n\n\n\n\n- text \"b\"\n";
        assert_eq!(tidy(outline), "- text \"a\"\n\n\n- text \"b\"\n");
    }

    #[test]
    fn baseline_drops_structural_wrappers_and_ref_free_subtrees() {
        let outline = "\
- generic
  - group
    - link \"Go\" [ref=e1]
- region \"decor\"
  - text \"nothing interactive\"
- heading \"Title\" [ref=e2]
";
        let result = baseline(outline);
        assert_eq!(result, "- link \"Go\" [ref=e1]\n- heading \"Title\" [ref=e2]\n");
    }

    #[test]
    fn optimize_preserves_refs_outside_lossy_paths() {
        let outline = "\
- main
  - heading \"Results\" [ref=e1] [level=1]
  - link \"https://example.com/one?x=1\" [ref=e2]
  - button \"Search\" [ref=e3] [focused]
  - textbox \"Query\" [ref=e4]
";
        let result = optimize(outline, &tables(), &opts());
        for reference in ["e1", "e2", "e3", "e4"] {
            assert!(
                result.contains(&format!("[ref={}]", reference)),
                "lost {} in:\n{}",
                reference,
                result
            );
        }
    }

    #[test]
    fn optimize_is_idempotent() {
        let mut outline = String::from(
            "\
- banner \"top\"
  - link \"Sign in\" [ref=e1]
- main
  - heading \"Flights\" [ref=e2] [level=1]
  - link \"From 320 US dollars round trip. United. Leaves San Francisco International at 7:15 AM. Arrives John F. Kennedy International at 3:40 PM. Total duration 5 hr 25 min. Nonstop\" [ref=e3]
  - list
",
        );
        for n in 0..12 {
            outline.push_str(&format!("    - listitem \"Option {}\" [ref=e{}]\n", n, n + 4));
        }
        let once = optimize(&outline, &tables(), &opts());
        let twice = optimize(&once, &tables(), &opts());
        assert_eq!(once, twice);
    }

    #[test]
    fn optimize_indentation_stays_well_formed() {
        let outline = "\
- main
  - region
    - list
      - listitem \"x\"
        - link \"deep\" [ref=e1]
";
        let result = optimize(outline, &tables(), &opts());
        for line in result.lines().filter(|l| !l.trim().is_empty()) {
            assert_eq!(indent_of(line) % 2, 0, "odd indent in {line:?}");
        }
    }
}

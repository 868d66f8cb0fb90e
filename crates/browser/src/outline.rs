//! Accessibility-tree outline builder.
//!
//! Converts the flat node list from `Accessibility.getFullAXTree` into an
//! indented textual outline with deterministic element refs (e1, e2, ...)
//! and a ref → backend-DOM-node handle map.

use pagelens_core::SnapshotConfig;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// One node of the accessibility tree, as the builder consumes it.
#[derive(Debug, Clone, Default)]
pub struct AxNode {
    pub node_id: String,
    pub parent_id: Option<String>,
    pub role: String,
    pub name: Option<String>,
    pub backend_node_id: Option<i64>,
    pub ignored: bool,
    pub level: Option<i64>,
    pub focused: bool,
    pub disabled: Option<bool>,
    pub url: Option<String>,
    pub description: Option<String>,
}

/// Mapping from ref token to the browser's backend DOM node id. Replaced
/// wholesale on every snapshot, never mutated in place.
pub type HandleMap = BTreeMap<String, i64>;

/// An outline plus the handle map minted alongside it.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub outline: String,
    pub handles: HandleMap,
}

/// Roles dropped outright, without descending.
const DROP_ROLES: &[&str] = &["InlineTextBox", "LineBreak"];

/// Roles that contribute no line of their own; children are emitted at the
/// same depth.
const TRANSPARENT_ROLES: &[&str] = &["none", "presentation", "StaticText", "RootWebArea", "ignored"];

/// Raw Chrome role → ARIA role. Roles absent from this table are treated
/// as transparent.
const ROLE_MAP: &[(&str, &str)] = &[
    ("TextField", "textbox"),
    ("textField", "textbox"),
    ("WebArea", "document"),
    ("paragraph", "text"),
    ("Section", "region"),
    ("image", "img"),
    ("search", "searchbox"),
    ("complementary", "region"),
    ("form", "group"),
    ("GenericContainer", "generic"),
    ("genericContainer", "generic"),
    // Identity entries for the standard vocabulary.
    ("alert", "alert"),
    ("article", "article"),
    ("banner", "banner"),
    ("button", "button"),
    ("cell", "cell"),
    ("checkbox", "checkbox"),
    ("code", "code"),
    ("columnheader", "columnheader"),
    ("combobox", "combobox"),
    ("contentinfo", "contentinfo"),
    ("dialog", "dialog"),
    ("document", "document"),
    ("emphasis", "emphasis"),
    ("figure", "figure"),
    ("generic", "generic"),
    ("grid", "grid"),
    ("gridcell", "gridcell"),
    ("group", "group"),
    ("heading", "heading"),
    ("img", "img"),
    ("link", "link"),
    ("list", "list"),
    ("listbox", "listbox"),
    ("listitem", "listitem"),
    ("main", "main"),
    ("mark", "mark"),
    ("menu", "menu"),
    ("menubar", "menubar"),
    ("menuitem", "menuitem"),
    ("menuitemcheckbox", "menuitemcheckbox"),
    ("menuitemradio", "menuitemradio"),
    ("navigation", "navigation"),
    ("option", "option"),
    ("progressbar", "progressbar"),
    ("radio", "radio"),
    ("radiogroup", "radiogroup"),
    ("region", "region"),
    ("row", "row"),
    ("rowgroup", "rowgroup"),
    ("rowheader", "rowheader"),
    ("searchbox", "searchbox"),
    ("separator", "separator"),
    ("slider", "slider"),
    ("spinbutton", "spinbutton"),
    ("status", "status"),
    ("strong", "strong"),
    ("switch", "switch"),
    ("tab", "tab"),
    ("table", "table"),
    ("tablist", "tablist"),
    ("tabpanel", "tabpanel"),
    ("text", "text"),
    ("textbox", "textbox"),
    ("toolbar", "toolbar"),
    ("tree", "tree"),
    ("treeitem", "treeitem"),
];

/// ARIA roles that always earn a ref.
const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "textbox", "checkbox", "radio", "combobox", "listbox",
    "menuitem", "menuitemcheckbox", "menuitemradio", "option", "searchbox",
    "slider", "spinbutton", "switch", "tab", "treeitem",
];

/// Roles the differ drops from its added/removed lists.
const NOISE_ROLES: &[&str] = &[
    "generic", "group", "list", "table", "row", "document", "text", "strong", "emphasis", "mark",
];

/// The role vocabulary as plain data. Built once per session from the
/// built-in tables plus any config extensions.
#[derive(Debug, Clone)]
pub struct RoleTables {
    role_map: HashMap<String, String>,
    interactive: HashSet<String>,
    noise: HashSet<String>,
}

impl RoleTables {
    pub fn new(config: &SnapshotConfig) -> Self {
        let mut role_map: HashMap<String, String> = ROLE_MAP
            .iter()
            .map(|(raw, aria)| (raw.to_string(), aria.to_string()))
            .collect();
        for (raw, aria) in &config.extra_role_map {
            role_map.insert(raw.clone(), aria.clone());
        }

        let mut interactive: HashSet<String> =
            INTERACTIVE_ROLES.iter().map(|r| r.to_string()).collect();
        interactive.extend(config.extra_interactive_roles.iter().cloned());

        let mut noise: HashSet<String> = NOISE_ROLES.iter().map(|r| r.to_string()).collect();
        noise.extend(config.extra_noise_roles.iter().cloned());

        Self {
            role_map,
            interactive,
            noise,
        }
    }

    pub fn map_role(&self, raw: &str) -> Option<&str> {
        self.role_map.get(raw).map(|s| s.as_str())
    }

    pub fn is_interactive(&self, aria_role: &str) -> bool {
        self.interactive.contains(aria_role)
    }

    pub fn is_noise(&self, aria_role: &str) -> bool {
        self.noise.contains(aria_role)
    }

    /// Every ARIA role the outline grammar can carry.
    pub fn known_roles(&self) -> HashSet<&str> {
        self.role_map.values().map(|s| s.as_str()).collect()
    }
}

impl Default for RoleTables {
    fn default() -> Self {
        Self::new(&SnapshotConfig::default())
    }
}

/// Parse the `Accessibility.getFullAXTree` response into builder nodes.
pub fn parse_ax_nodes(cdp_response: &Value) -> Vec<AxNode> {
    let nodes = match cdp_response.get("nodes").and_then(|v| v.as_array()) {
        Some(arr) => arr,
        None => return Vec::new(),
    };

    nodes
        .iter()
        .map(|node| {
            let mut parsed = AxNode {
                node_id: str_field(node, "nodeId"),
                parent_id: node
                    .get("parentId")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                role: ax_value(node, "role"),
                name: non_empty(ax_value(node, "name")),
                backend_node_id: node.get("backendDOMNodeId").and_then(|v| v.as_i64()),
                ignored: node.get("ignored").and_then(|v| v.as_bool()).unwrap_or(false),
                description: non_empty(ax_value(node, "description")),
                ..Default::default()
            };
            if let Some(props) = node.get("properties").and_then(|v| v.as_array()) {
                for prop in props {
                    let prop_name = prop.get("name").and_then(|v| v.as_str()).unwrap_or("");
                    let prop_value = prop.get("value").and_then(|v| v.get("value"));
                    match prop_name {
                        "level" => parsed.level = prop_value.and_then(|v| v.as_i64()),
                        "focused" => {
                            parsed.focused = prop_value.and_then(|v| v.as_bool()).unwrap_or(false)
                        }
                        "disabled" => parsed.disabled = prop_value.and_then(|v| v.as_bool()),
                        "url" => {
                            parsed.url =
                                prop_value.and_then(|v| v.as_str()).map(|s| s.to_string())
                        }
                        _ => {}
                    }
                }
            }
            parsed
        })
        .collect()
}

fn str_field(node: &Value, field: &str) -> String {
    node.get(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

/// CDP wraps role/name/description as `{type, value}`.
fn ax_value(node: &Value, field: &str) -> String {
    node.get(field)
        .and_then(|v| v.get("value").and_then(|val| val.as_str()).or_else(|| v.as_str()))
        .unwrap_or("")
        .to_string()
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Builds outlines from flat node lists. Deterministic: identical input
/// yields a bit-identical outline and handle map.
pub struct OutlineBuilder<'a> {
    tables: &'a RoleTables,
}

impl<'a> OutlineBuilder<'a> {
    pub fn new(tables: &'a RoleTables) -> Self {
        Self { tables }
    }

    pub fn build(&self, nodes: &[AxNode]) -> Snapshot {
        let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            if let Some(parent) = &node.parent_id {
                children.entry(parent.as_str()).or_default().push(idx);
            }
        }

        let root = nodes
            .iter()
            .position(|n| n.parent_id.is_none())
            .unwrap_or(0);

        let mut out = String::new();
        let mut handles = HandleMap::new();
        let mut next_ref = 1u32;

        if let Some(node) = nodes.get(root) {
            for &child in children.get(node.node_id.as_str()).into_iter().flatten() {
                self.emit(nodes, &children, child, 0, &mut out, &mut handles, &mut next_ref);
            }
        }

        Snapshot {
            outline: out,
            handles,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        nodes: &[AxNode],
        children: &HashMap<&str, Vec<usize>>,
        idx: usize,
        depth: usize,
        out: &mut String,
        handles: &mut HandleMap,
        next_ref: &mut u32,
    ) {
        let node = &nodes[idx];
        let child_indices = children.get(node.node_id.as_str());

        if DROP_ROLES.contains(&node.role.as_str()) {
            return;
        }

        let mapped = self.tables.map_role(&node.role);
        let transparent = TRANSPARENT_ROLES.contains(&node.role.as_str()) || mapped.is_none();
        if transparent {
            for &child in child_indices.into_iter().flatten() {
                self.emit(nodes, children, child, depth, out, handles, next_ref);
            }
            return;
        }

        let has_children = child_indices.map(|c| !c.is_empty()).unwrap_or(false);
        if node.ignored && !has_children {
            return;
        }

        let role = mapped.unwrap_or(node.role.as_str());
        let name = node.name.as_deref().unwrap_or("");

        let wants_ref = self.tables.is_interactive(role)
            || (!name.is_empty() && role != "generic" && role != "text");

        out.push_str(&"  ".repeat(depth));
        out.push('-');
        out.push(' ');
        out.push_str(role);
        if !name.is_empty() {
            // Names come from the accessibility tree and are assumed free
            // of embedded double quotes; they are not escaped here.
            out.push_str(&format!(" \"{}\"", name));
        }
        if wants_ref {
            let reference = format!("e{}", next_ref);
            *next_ref += 1;
            out.push_str(&format!(" [ref={}]", reference));
            if let Some(backend) = node.backend_node_id {
                handles.insert(reference, backend);
            }
        }
        self.push_suffix(node, out);
        out.push('\n');

        for &child in child_indices.into_iter().flatten() {
            self.emit(nodes, children, child, depth + 1, out, handles, next_ref);
        }
    }

    /// Residual attributes, in a fixed order so output stays deterministic.
    fn push_suffix(&self, node: &AxNode, out: &mut String) {
        if let Some(url) = &node.url {
            out.push_str(&format!(" [url={}]", url));
        }
        if let Some(description) = &node.description {
            out.push_str(&format!(" [description=\"{}\"]", description));
        }
        if let Some(level) = node.level {
            out.push_str(&format!(" [level={}]", level));
        }
        if node.focused {
            out.push_str(" [focused]");
        }
        if let Some(disabled) = node.disabled {
            out.push_str(&format!(" [disabled={}]", disabled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, parent: Option<&str>, role: &str, name: Option<&str>) -> AxNode {
        AxNode {
            node_id: id.to_string(),
            parent_id: parent.map(|s| s.to_string()),
            role: role.to_string(),
            name: name.map(|s| s.to_string()),
            backend_node_id: Some(id.parse::<i64>().unwrap_or(0) + 100),
            ..Default::default()
        }
    }

    fn build(nodes: &[AxNode]) -> Snapshot {
        let tables = RoleTables::default();
        OutlineBuilder::new(&tables).build(nodes)
    }

    #[test]
    fn example_page_outline() {
        let nodes = vec![
            node("1", None, "RootWebArea", Some("Example Domain")),
            node("2", Some("1"), "heading", Some("Example Domain")),
            node("3", Some("1"), "paragraph", Some("This domain is for use in examples.")),
            node("4", Some("1"), "link", Some("More information...")),
        ];
        let snap = build(&nodes);
        assert_eq!(
            snap.outline,
            "- heading \"Example Domain\" [ref=e1]\n\
             - text \"This domain is for use in examples.\"\n\
             - link \"More information...\" [ref=e2]\n"
        );
        assert_eq!(snap.handles.get("e1"), Some(&102));
        assert_eq!(snap.handles.get("e2"), Some(&104));
    }

    #[test]
    fn refs_are_a_contiguous_prefix_in_emission_order() {
        let nodes = vec![
            node("1", None, "RootWebArea", None),
            node("2", Some("1"), "button", Some("One")),
            node("3", Some("1"), "generic", Some("skipped name on generic")),
            node("4", Some("1"), "button", Some("Two")),
            node("5", Some("1"), "heading", Some("Three")),
        ];
        let snap = build(&nodes);
        let refs: Vec<&str> = snap
            .outline
            .lines()
            .filter_map(|l| l.split("[ref=").nth(1))
            .map(|l| l.split(']').next().unwrap())
            .collect();
        assert_eq!(refs, vec!["e1", "e2", "e3"]);
    }

    #[test]
    fn transparent_roles_do_not_indent() {
        let nodes = vec![
            node("1", None, "RootWebArea", None),
            node("2", Some("1"), "GenericContainer", None),
            node("3", Some("2"), "none", None),
            node("4", Some("3"), "button", Some("Deep")),
        ];
        let snap = build(&nodes);
        // generic has no name: emitted un-reffed; none is transparent so
        // the button sits one level under generic, not three down.
        assert_eq!(snap.outline, "- generic\n  - button \"Deep\" [ref=e1]\n");
    }

    #[test]
    fn unknown_roles_are_transparent() {
        let nodes = vec![
            node("1", None, "RootWebArea", None),
            node("2", Some("1"), "DisclosureTriangle", Some("mystery")),
            node("3", Some("2"), "link", Some("inside")),
        ];
        let snap = build(&nodes);
        assert_eq!(snap.outline, "- link \"inside\" [ref=e1]\n");
    }

    #[test]
    fn inline_text_boxes_are_dropped_with_their_subtree() {
        let mut leaf = node("3", Some("2"), "link", Some("never"));
        leaf.parent_id = Some("2".to_string());
        let nodes = vec![
            node("1", None, "RootWebArea", None),
            node("2", Some("1"), "InlineTextBox", Some("raw text")),
            leaf,
        ];
        let snap = build(&nodes);
        assert_eq!(snap.outline, "");
        assert!(snap.handles.is_empty());
    }

    #[test]
    fn ignored_leaf_is_dropped_but_ignored_parent_keeps_children() {
        let mut ignored_leaf = node("2", Some("1"), "img", None);
        ignored_leaf.ignored = true;
        let mut ignored_parent = node("3", Some("1"), "region", Some("wrap"));
        ignored_parent.ignored = true;
        let nodes = vec![
            node("1", None, "RootWebArea", None),
            ignored_leaf,
            ignored_parent,
            node("4", Some("3"), "button", Some("Go")),
        ];
        let snap = build(&nodes);
        assert!(!snap.outline.contains("img"));
        assert!(snap.outline.contains("- region \"wrap\" [ref=e1]"));
        assert!(snap.outline.contains("  - button \"Go\" [ref=e2]"));
    }

    #[test]
    fn role_mapping_applies() {
        let nodes = vec![
            node("1", None, "RootWebArea", None),
            node("2", Some("1"), "TextField", Some("Search")),
            node("3", Some("1"), "Section", Some("Sidebar")),
            node("4", Some("1"), "image", Some("Logo")),
        ];
        let snap = build(&nodes);
        assert!(snap.outline.contains("- textbox \"Search\" [ref=e1]"));
        assert!(snap.outline.contains("- region \"Sidebar\" [ref=e2]"));
        assert!(snap.outline.contains("- img \"Logo\" [ref=e3]"));
    }

    #[test]
    fn handle_map_only_contains_backend_backed_refs() {
        let mut no_backend = node("2", Some("1"), "button", Some("Ghost"));
        no_backend.backend_node_id = None;
        let nodes = vec![
            node("1", None, "RootWebArea", None),
            no_backend,
            node("3", Some("1"), "button", Some("Real")),
        ];
        let snap = build(&nodes);
        assert!(snap.outline.contains("\"Ghost\" [ref=e1]"));
        assert!(!snap.handles.contains_key("e1"));
        assert_eq!(snap.handles.get("e2"), Some(&103));
    }

    #[test]
    fn suffix_attributes_are_emitted() {
        let mut heading = node("2", Some("1"), "heading", Some("Title"));
        heading.level = Some(2);
        let mut link = node("3", Some("1"), "link", Some("Go"));
        link.url = Some("https://example.com/a".to_string());
        link.focused = true;
        let nodes = vec![node("1", None, "RootWebArea", None), heading, link];
        let snap = build(&nodes);
        assert!(snap.outline.contains("- heading \"Title\" [ref=e1] [level=2]"));
        assert!(snap
            .outline
            .contains("- link \"Go\" [ref=e2] [url=https://example.com/a] [focused]"));
    }

    #[test]
    fn build_is_deterministic() {
        let nodes = vec![
            node("1", None, "RootWebArea", None),
            node("2", Some("1"), "button", Some("A")),
            node("3", Some("1"), "link", Some("B")),
        ];
        let first = build(&nodes);
        let second = build(&nodes);
        assert_eq!(first.outline, second.outline);
        assert_eq!(first.handles, second.handles);
    }

    #[test]
    fn parse_ax_nodes_reads_cdp_shapes() {
        let raw = serde_json::json!({
            "nodes": [
                {
                    "nodeId": "1",
                    "ignored": false,
                    "role": {"type": "role", "value": "RootWebArea"},
                    "name": {"type": "computedString", "value": "Page"},
                    "backendDOMNodeId": 10,
                    "childIds": ["2"]
                },
                {
                    "nodeId": "2",
                    "parentId": "1",
                    "ignored": false,
                    "role": {"type": "role", "value": "heading"},
                    "name": {"type": "computedString", "value": "Hi"},
                    "backendDOMNodeId": 11,
                    "properties": [
                        {"name": "level", "value": {"type": "integer", "value": 2}},
                        {"name": "focused", "value": {"type": "boolean", "value": true}}
                    ]
                }
            ]
        });
        let nodes = parse_ax_nodes(&raw);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].role, "heading");
        assert_eq!(nodes[1].parent_id.as_deref(), Some("1"));
        assert_eq!(nodes[1].level, Some(2));
        assert!(nodes[1].focused);
    }
}

//! Frontmatter codec and wikilink extraction.
//!
//! Every Markdown file in the vault opens with a frontmatter header between
//! `---` fences. The header carries all structured metadata; the body below
//! the closing fence is human prose. The codec here speaks a restricted
//! YAML subset: scalar strings, bools, ints, floats, flat lists of scalars,
//! and one-level maps of scalar lists (the `links` table). Anything richer
//! is rejected on read with `InvalidFormat` and is never produced on write.
//!
//! Keys are emitted in a prescribed canonical order so that rewriting a file
//! is deterministic and diffs stay minimal.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, VaultError};
use crate::ident::ContentKind;

/// Canonical key order enforced on every write.
const KEY_ORDER: &[&str] = &[
    "id",
    "type",
    "subtype",
    "title",
    "status",
    "maturity",
    "topic",
    "tags",
    "aliases",
    "url",
    "priority",
    "impact",
    "effort",
    "archived",
    "superseded_by",
    "supersedes",
    "session",
    "created",
    "modified",
];

static WIKILINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\[\]\n]+)\]\]").unwrap());

/// A scalar or flat-list value carried by a non-canonical frontmatter key.
///
/// Custom content models (extensions) and advisory fields such as
/// `key_points` live here; the codec preserves them across rewrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtraValue {
    Scalar(String),
    List(Vec<String>),
}

/// Parsed frontmatter for one content file.
///
/// `id`, `kind` and `created` are immutable once the file exists; the
/// pipelines enforce that, not the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frontmatter {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub subtype: Option<String>,
    pub title: String,
    pub status: Option<String>,
    pub maturity: Option<String>,
    pub topic: Option<String>,
    pub tags: Vec<String>,
    pub aliases: Vec<String>,
    pub url: Option<String>,
    pub priority: Option<i64>,
    pub impact: Option<i64>,
    pub effort: Option<i64>,
    pub archived: bool,
    pub superseded_by: Option<String>,
    pub supersedes: Option<String>,
    pub session: Option<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// Outgoing explicit links, keyed by kind (`relates`, `supersedes`,
    /// `derived_from`). Values are target IDs.
    pub links: BTreeMap<String, Vec<String>>,
    /// Non-canonical keys preserved verbatim, emitted after the canonical
    /// block in sorted order.
    pub extra: BTreeMap<String, ExtraValue>,
}

impl Frontmatter {
    /// Minimal frontmatter for a freshly created item.
    pub fn new(kind: ContentKind, id: &str, title: &str, now: DateTime<Utc>) -> Self {
        Frontmatter {
            id: id.to_string(),
            kind,
            subtype: None,
            title: title.to_string(),
            status: None,
            maturity: None,
            topic: None,
            tags: Vec::new(),
            aliases: Vec::new(),
            url: None,
            priority: None,
            impact: None,
            effort: None,
            archived: false,
            superseded_by: None,
            supersedes: None,
            session: None,
            created: now,
            modified: now,
            links: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    /// All explicit outgoing link targets as `(edge_type, target_id)` pairs.
    ///
    /// The `relates` kind maps to the default edge type; other kinds carry
    /// their own name.
    pub fn link_targets(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (kind, targets) in &self.links {
            for target in targets {
                out.push((kind.clone(), target.clone()));
            }
        }
        out
    }

    /// Append a target to a link kind, skipping duplicates.
    pub fn add_link(&mut self, kind: &str, target: &str) -> bool {
        let list = self.links.entry(kind.to_string()).or_default();
        if list.iter().any(|t| t == target) {
            return false;
        }
        list.push(target.to_string());
        true
    }

    /// Remove a target from a link kind; drops the kind when emptied.
    pub fn remove_link(&mut self, kind: &str, target: &str) -> bool {
        let Some(list) = self.links.get_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|t| t != target);
        let removed = list.len() != before;
        if list.is_empty() {
            self.links.remove(kind);
        }
        removed
    }
}

/// Extract `[[Title]]` wikilink titles from a Markdown body, in document
/// order, deduplicated.
pub fn extract_wikilinks(body: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in WIKILINK_RE.captures_iter(body) {
        let title = cap[1].trim().to_string();
        if !title.is_empty() && !seen.contains(&title) {
            seen.push(title);
        }
    }
    seen
}

/// Split a document into frontmatter and body, parsing the header.
pub fn parse_document(text: &str) -> Result<(Frontmatter, String)> {
    let rest = text
        .strip_prefix("---\n")
        .ok_or_else(|| VaultError::InvalidFormat("missing opening frontmatter fence".into()))?;
    let end = rest
        .find("\n---\n")
        .or_else(|| rest.strip_suffix("\n---").map(|head| head.len()))
        .ok_or_else(|| VaultError::InvalidFormat("missing closing frontmatter fence".into()))?;
    let header = &rest[..end];
    let body = rest
        .get(end + 5..)
        .map(|b| b.to_string())
        .unwrap_or_default();
    Ok((parse_header(header)?, body))
}

/// Render frontmatter plus body into a complete document.
pub fn compose_document(fm: &Frontmatter, body: &str) -> String {
    let mut out = String::from("---\n");
    out.push_str(&emit_header(fm));
    out.push_str("---\n");
    out.push_str(body);
    if !body.ends_with('\n') && !body.is_empty() {
        out.push('\n');
    }
    out
}

fn parse_header(header: &str) -> Result<Frontmatter> {
    let mut scalars: BTreeMap<String, String> = BTreeMap::new();
    let mut lists: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut links: BTreeMap<String, Vec<String>> = BTreeMap::new();

    let lines: Vec<&str> = header.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            i += 1;
            continue;
        }
        if line.starts_with(' ') {
            return Err(VaultError::InvalidFormat(format!(
                "unexpected indentation in frontmatter: `{line}`"
            )));
        }
        let (key, value) = split_key(line)?;
        if key == "links" {
            if !value.is_empty() {
                return Err(VaultError::InvalidFormat(
                    "`links` must be a map of link kinds".into(),
                ));
            }
            i += 1;
            while i < lines.len() && lines[i].starts_with("  ") && !lines[i].trim().is_empty() {
                let sub = lines[i].trim_start();
                if sub.starts_with('-') {
                    return Err(VaultError::InvalidFormat(
                        "`links` entries must be keyed by kind".into(),
                    ));
                }
                let (kind, sub_value) = split_key(sub)?;
                if sub_value.is_empty() {
                    // Block list under the kind, indented deeper.
                    let mut items = Vec::new();
                    i += 1;
                    while i < lines.len() && lines[i].trim_start().starts_with("- ") {
                        items.push(unquote(lines[i].trim_start()[2..].trim()));
                        i += 1;
                    }
                    links.insert(kind, items);
                } else {
                    links.insert(kind, parse_inline_list(&sub_value)?);
                    i += 1;
                }
            }
            continue;
        }
        if value.is_empty() {
            // Block list for a top-level key.
            let mut items = Vec::new();
            i += 1;
            while i < lines.len() && lines[i].trim_start().starts_with("- ") {
                items.push(unquote(lines[i].trim_start()[2..].trim()));
                i += 1;
            }
            if items.is_empty() {
                // Bare `key:` with no items is an empty scalar.
                scalars.insert(key, String::new());
            } else {
                lists.insert(key, items);
            }
            continue;
        }
        if value.starts_with('[') {
            lists.insert(key, parse_inline_list(&value)?);
        } else if value.starts_with('{') {
            return Err(VaultError::InvalidFormat(format!(
                "inline maps are not supported (key `{key}`)"
            )));
        } else {
            scalars.insert(key, unquote(&value));
        }
        i += 1;
    }

    let take = |map: &mut BTreeMap<String, String>, key: &str| map.remove(key);
    let id = take(&mut scalars, "id")
        .ok_or_else(|| VaultError::InvalidFormat("frontmatter missing `id`".into()))?;
    let kind: ContentKind = take(&mut scalars, "type")
        .ok_or_else(|| VaultError::InvalidFormat("frontmatter missing `type`".into()))?
        .parse()
        .map_err(VaultError::InvalidFormat)?;
    let title = take(&mut scalars, "title")
        .ok_or_else(|| VaultError::InvalidFormat("frontmatter missing `title`".into()))?;
    let created = parse_datetime(
        &take(&mut scalars, "created")
            .ok_or_else(|| VaultError::InvalidFormat("frontmatter missing `created`".into()))?,
    )?;
    let modified = match take(&mut scalars, "modified") {
        Some(v) => parse_datetime(&v)?,
        None => created,
    };

    let parse_int = |map: &mut BTreeMap<String, String>, key: &str| -> Result<Option<i64>> {
        match map.remove(key) {
            Some(v) if !v.is_empty() => v.parse::<i64>().map(Some).map_err(|_| {
                VaultError::InvalidFormat(format!("`{key}` must be an integer, got `{v}`"))
            }),
            _ => Ok(None),
        }
    };

    let priority = parse_int(&mut scalars, "priority")?;
    let impact = parse_int(&mut scalars, "impact")?;
    let effort = parse_int(&mut scalars, "effort")?;
    let archived = match scalars.remove("archived") {
        Some(v) => parse_bool(&v)?,
        None => false,
    };

    let mut fm = Frontmatter {
        id,
        kind,
        subtype: non_empty(scalars.remove("subtype")),
        title,
        status: non_empty(scalars.remove("status")),
        maturity: non_empty(scalars.remove("maturity")),
        topic: non_empty(scalars.remove("topic")),
        tags: lists.remove("tags").unwrap_or_default(),
        aliases: lists.remove("aliases").unwrap_or_default(),
        url: non_empty(scalars.remove("url")),
        priority,
        impact,
        effort,
        archived,
        superseded_by: non_empty(scalars.remove("superseded_by")),
        supersedes: non_empty(scalars.remove("supersedes")),
        session: non_empty(scalars.remove("session")),
        created,
        modified,
        links,
        extra: BTreeMap::new(),
    };

    // Everything left over is an extension key, preserved as-is.
    for (key, value) in scalars {
        fm.extra.insert(key, ExtraValue::Scalar(value));
    }
    for (key, value) in lists {
        fm.extra.insert(key, ExtraValue::List(value));
    }
    Ok(fm)
}

fn emit_header(fm: &Frontmatter) -> String {
    let mut out = String::new();
    for &key in KEY_ORDER {
        match key {
            "id" => push_scalar(&mut out, "id", &fm.id),
            "type" => push_scalar(&mut out, "type", fm.kind.as_str()),
            "subtype" => push_opt(&mut out, "subtype", fm.subtype.as_deref()),
            "title" => push_scalar(&mut out, "title", &fm.title),
            "status" => push_opt(&mut out, "status", fm.status.as_deref()),
            "maturity" => push_opt(&mut out, "maturity", fm.maturity.as_deref()),
            "topic" => push_opt(&mut out, "topic", fm.topic.as_deref()),
            "tags" => push_list(&mut out, "tags", &fm.tags),
            "aliases" => push_list(&mut out, "aliases", &fm.aliases),
            "url" => push_opt(&mut out, "url", fm.url.as_deref()),
            "priority" => push_int(&mut out, "priority", fm.priority),
            "impact" => push_int(&mut out, "impact", fm.impact),
            "effort" => push_int(&mut out, "effort", fm.effort),
            "archived" => {
                if fm.archived {
                    out.push_str("archived: true\n");
                }
            }
            "superseded_by" => push_opt(&mut out, "superseded_by", fm.superseded_by.as_deref()),
            "supersedes" => push_opt(&mut out, "supersedes", fm.supersedes.as_deref()),
            "session" => push_opt(&mut out, "session", fm.session.as_deref()),
            "created" => push_scalar(&mut out, "created", &format_datetime(fm.created)),
            "modified" => push_scalar(&mut out, "modified", &format_datetime(fm.modified)),
            _ => unreachable!(),
        }
    }
    for (key, value) in &fm.extra {
        match value {
            ExtraValue::Scalar(s) => push_scalar(&mut out, key, s),
            ExtraValue::List(items) => push_list(&mut out, key, items),
        }
    }
    if !fm.links.is_empty() {
        out.push_str("links:\n");
        for (kind, targets) in &fm.links {
            out.push_str(&format!("  {kind}: [{}]\n", targets.join(", ")));
        }
    }
    out
}

fn split_key(line: &str) -> Result<(String, String)> {
    let idx = line
        .find(':')
        .ok_or_else(|| VaultError::InvalidFormat(format!("expected `key: value`, got `{line}`")))?;
    let key = line[..idx].trim();
    if key.is_empty() {
        return Err(VaultError::InvalidFormat(format!("empty key in `{line}`")));
    }
    Ok((key.to_string(), line[idx + 1..].trim().to_string()))
}

fn parse_inline_list(value: &str) -> Result<Vec<String>> {
    let inner = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .ok_or_else(|| VaultError::InvalidFormat(format!("malformed inline list: `{value}`")))?;
    if inner.contains('[') || inner.contains('{') {
        return Err(VaultError::InvalidFormat(
            "nested collections are not supported in frontmatter".into(),
        ));
    }
    Ok(inner
        .split(',')
        .map(|item| unquote(item.trim()))
        .filter(|item| !item.is_empty())
        .collect())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(VaultError::InvalidFormat(format!(
            "expected bool, got `{other}`"
        ))),
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc());
        }
    }
    Err(VaultError::InvalidFormat(format!(
        "unparseable timestamp: `{value}`"
    )))
}

fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || value.contains(": ")
        || value.ends_with(':')
        || value.starts_with(['#', '[', '{', '\'', '"', '-', '&', '*', '?', '|', '>'])
        || value.trim() != value
        || matches!(value, "true" | "false" | "null" | "~")
}

fn quote(value: &str) -> String {
    if needs_quoting(value) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn unquote(value: &str) -> String {
    let v = value.trim();
    if v.len() >= 2 {
        if (v.starts_with('"') && v.ends_with('"')) || (v.starts_with('\'') && v.ends_with('\'')) {
            return v[1..v.len() - 1]
                .replace("\\\"", "\"")
                .replace("\\\\", "\\");
        }
    }
    v.to_string()
}

fn push_scalar(out: &mut String, key: &str, value: &str) {
    out.push_str(&format!("{key}: {}\n", quote(value)));
}

fn push_opt(out: &mut String, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        push_scalar(out, key, value);
    }
}

fn push_int(out: &mut String, key: &str, value: Option<i64>) {
    if let Some(value) = value {
        out.push_str(&format!("{key}: {value}\n"));
    }
}

fn push_list(out: &mut String, key: &str, items: &[String]) {
    if !items.is_empty() {
        let rendered: Vec<String> = items.iter().map(|i| quote(i)).collect();
        out.push_str(&format!("{key}: [{}]\n", rendered.join(", ")));
    }
}

//! The directory-listing wire format.
//!
//! rolloutd serves its step directory as an HTML table titled "Rolloutd File
//! Listing" whose header row names the columns. The agent also understands
//! the listings produced by stock Apache and Nginx autoindex pages, so a
//! plain web server can stand in for rolloutd.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Marker string identifying the native listing format.
pub const NATIVE_MARKER: &str = "Rolloutd File Listing";

/// Columns every native listing carries, in render order. Servers may add
/// more; unknown columns are preserved verbatim in [`ListingEntry::extra`].
pub const NATIVE_COLUMNS: &[&str] = &["filename", "type", "size", "mtime", "checksum"];

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("unrecognized directory listing format")]
    Unrecognized,

    #[error("malformed native listing: {0}")]
    Malformed(String),
}

/// Kind of a listed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry of a directory listing.
///
/// For non-native listings `size`, `mtime` and `checksum` are zero/empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub filename: String,
    pub kind: EntryKind,
    pub size: u64,
    pub mtime: u64,
    /// Hex SHA-256 of the file contents, when the server provides one.
    pub checksum: String,
    /// Columns beyond [`NATIVE_COLUMNS`], preserved verbatim.
    pub extra: BTreeMap<String, String>,
}

impl ListingEntry {
    /// A plain file entry with no metadata, as parsed from foreign listings.
    pub fn file(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            kind: EntryKind::File,
            size: 0,
            mtime: 0,
            checksum: String::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn directory(filename: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Directory,
            ..Self::file(filename)
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

fn row_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?si)<tr[^>]*>(.*?)</tr>").expect("static regex"))
}

fn cell_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?si)<t[hd][^>]*>(.*?)</t[hd]>").expect("static regex"))
}

fn apache_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<img[^>]*>\s*<a\s+href="([^"]+)""#).expect("static regex"))
}

fn nginx_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<a\s+href="([^"]+)">"#).expect("static regex"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("static regex"))
}

fn strip_tags(cell: &str) -> String {
    tag_re().replace_all(cell, "").trim().to_string()
}

/// Whether a raw href should appear in the result at all.
fn keep(name: &str) -> bool {
    !name.is_empty() && name != "../" && name != ".." && !name.contains('?')
}

/// Parse a directory listing in any understood format.
///
/// Tries the native rolloutd table first, then Apache, then Nginx.
///
/// # Errors
///
/// Returns [`ListingError::Unrecognized`] when no format matches, and
/// [`ListingError::Malformed`] for a native listing with a broken table.
pub fn parse_listing(html: &str) -> Result<Vec<ListingEntry>, ListingError> {
    if html.contains(NATIVE_MARKER) {
        return parse_native(html);
    }
    if apache_re().is_match(html) {
        return Ok(parse_hrefs(apache_re(), html));
    }
    if nginx_re().is_match(html) {
        return Ok(parse_hrefs(nginx_re(), html));
    }
    Err(ListingError::Unrecognized)
}

fn parse_hrefs(re: &Regex, html: &str) -> Vec<ListingEntry> {
    re.captures_iter(html)
        .map(|cap| cap[1].to_string())
        .filter(|name| keep(name))
        .map(|name| match name.strip_suffix('/') {
            Some(dir) => ListingEntry::directory(dir),
            None => ListingEntry::file(name),
        })
        .collect()
}

fn parse_native(html: &str) -> Result<Vec<ListingEntry>, ListingError> {
    let mut rows = row_re().captures_iter(html);
    let header = rows
        .next()
        .ok_or_else(|| ListingError::Malformed("no header row".into()))?;
    let columns: Vec<String> = cell_re()
        .captures_iter(&header[1])
        .map(|cap| strip_tags(&cap[1]).to_lowercase())
        .collect();
    if !columns.iter().any(|c| c == "filename") {
        return Err(ListingError::Malformed("header row has no filename column".into()));
    }

    let mut entries = Vec::new();
    for row in rows {
        let cells: Vec<String> = cell_re()
            .captures_iter(&row[1])
            .map(|cap| strip_tags(&cap[1]))
            .collect();
        if cells.is_empty() {
            continue;
        }
        let mut entry = ListingEntry::file("");
        for (column, cell) in columns.iter().zip(cells) {
            match column.as_str() {
                "filename" => entry.filename = cell,
                "type" => {
                    entry.kind = if cell.eq_ignore_ascii_case("dir") {
                        EntryKind::Directory
                    } else {
                        EntryKind::File
                    };
                }
                "size" => entry.size = cell.parse().unwrap_or(0),
                "mtime" => entry.mtime = cell.parse().unwrap_or(0),
                "checksum" => entry.checksum = cell,
                _ => {
                    entry.extra.insert(column.clone(), cell);
                }
            }
        }
        if let Some(dir) = entry.filename.strip_suffix('/') {
            entry.filename = dir.to_string();
            entry.kind = EntryKind::Directory;
        }
        if keep(&entry.filename) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Render entries as a native listing page.
///
/// This is what rolloutd emits; the agent uses it in tests to prove the
/// format round-trips.
pub fn render_listing(entries: &[ListingEntry]) -> String {
    let mut columns: Vec<String> = NATIVE_COLUMNS.iter().map(|c| (*c).to_string()).collect();
    let mut extra_columns: Vec<String> = entries
        .iter()
        .flat_map(|e| e.extra.keys().cloned())
        .collect();
    extra_columns.sort();
    extra_columns.dedup();
    columns.extend(extra_columns);

    let mut out = String::new();
    out.push_str("<html><head><title>");
    out.push_str(NATIVE_MARKER);
    out.push_str("</title></head>\n<body>\n<table>\n<tr>");
    for column in &columns {
        out.push_str("<th>");
        out.push_str(column);
        out.push_str("</th>");
    }
    out.push_str("</tr>\n");
    for entry in entries {
        out.push_str("<tr>");
        for column in &columns {
            let cell = match column.as_str() {
                "filename" => match entry.kind {
                    EntryKind::Directory => format!("{}/", entry.filename),
                    EntryKind::File => entry.filename.clone(),
                },
                "type" => match entry.kind {
                    EntryKind::Directory => "dir".to_string(),
                    EntryKind::File => "file".to_string(),
                },
                "size" => entry.size.to_string(),
                "mtime" => entry.mtime.to_string(),
                "checksum" => entry.checksum.clone(),
                other => entry.extra.get(other).cloned().unwrap_or_default(),
            };
            out.push_str("<td>");
            out.push_str(&cell);
            out.push_str("</td>");
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</table>\n</body></html>\n");
    out
}

// ── Unit tests ───────────────────────────────────────────────────────────────

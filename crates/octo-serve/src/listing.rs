//! Directory listings.
//!
//! Listings are rendered from a live read of the directory on every request,
//! either as an HTML page built from the bundled shell or as a JSON array.
//! Both forms share [`collect_entries`], so they always agree on order.

use std::cmp::Ordering;
use std::path::Path;
use std::time::UNIX_EPOCH;

use axum::{
    Json,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::AppState;
use crate::path::RequestPath;
use crate::prefix::Prefix;

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntryView {
    pub name: String,
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Modification time in seconds since the Unix epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
    /// Prefix-qualified browse or download link
    pub link: String,
}

/// Listing representation requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingFormat {
    Html,
    Json,
}

/// Query parameters accepted on content paths.
#[derive(Debug, Default, Deserialize)]
pub struct ContentQuery {
    /// Return the listing as JSON
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub json: bool,
    /// Serve files as attachments instead of inline
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub download: bool,
}

/// A query flag is set by its bare presence (`?json`) or an explicit value.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    match value.to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" => Ok(false),
        _ => Err(serde::de::Error::invalid_value(
            serde::de::Unexpected::Str(&value),
            &"a boolean flag",
        )),
    }
}

impl ListingFormat {
    pub fn negotiate(headers: &HeaderMap, query: &ContentQuery) -> Self {
        if query.json {
            return ListingFormat::Json;
        }

        let wants_json = headers
            .get(header::ACCEPT)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|accept| {
                accept
                    .split(',')
                    .any(|item| item.trim().starts_with("application/json"))
            });

        if wants_json {
            ListingFormat::Json
        } else {
            ListingFormat::Html
        }
    }
}

/// Directories first, then case-insensitive name, then case-sensitive name.
pub fn compare_entries(a: &DirEntryView, b: &DirEntryView) -> Ordering {
    b.is_dir
        .cmp(&a.is_dir)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

/// Build the listing rows for a resolved directory.
///
/// The parent entry comes first for every directory except the root.
/// Children whose metadata cannot be read are skipped.
pub async fn collect_entries(
    dir_path: &Path,
    children: &[String],
    request: &RequestPath,
    prefix: &Prefix,
) -> Vec<DirEntryView> {
    let mut entries = Vec::with_capacity(children.len() + 1);

    for name in children {
        let metadata = match fs::metadata(dir_path.join(name)).await {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!("Skipping unreadable entry {:?}: {}", name, err);
                continue;
            }
        };

        let Ok(child) = request.join(name) else {
            debug!("Skipping entry with unusable name: {:?}", name);
            continue;
        };

        let is_dir = metadata.is_dir();
        entries.push(DirEntryView {
            name: name.clone(),
            is_dir,
            size: if is_dir { None } else { Some(metadata.len()) },
            modified: metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs()),
            link: prefix.link(&child, is_dir),
        });
    }

    entries.sort_by(compare_entries);

    if let Some(parent) = request.parent() {
        entries.insert(
            0,
            DirEntryView {
                name: "..".to_string(),
                is_dir: true,
                size: None,
                modified: None,
                link: prefix.link(&parent, true),
            },
        );
    }

    entries
}

/// Render a listing in the requested format.
pub async fn render(
    state: &AppState,
    dir_path: &Path,
    children: &[String],
    request: &RequestPath,
    format: ListingFormat,
) -> Response {
    let entries = collect_entries(dir_path, children, request, &state.prefix).await;

    debug!(
        "Listing {} ({} entries, {:?})",
        request,
        entries.len(),
        format
    );

    match format {
        ListingFormat::Json => Json(entries).into_response(),
        ListingFormat::Html => {
            let page = render_html(state, request, &entries);
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/html; charset=utf-8"),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                page,
            )
                .into_response()
        }
    }
}

fn render_html(state: &AppState, request: &RequestPath, entries: &[DirEntryView]) -> String {
    let config = &state.config;
    let prefix = &state.prefix;

    let mut rows = String::new();
    rows.push_str("<table class=\"listing\"><thead><tr>");
    rows.push_str("<th>Name</th><th>Size</th><th>Modified</th><th></th>");
    rows.push_str("</tr></thead><tbody>");

    for entry in entries {
        let class = if entry.is_dir { "dir" } else { "file" };
        let suffix = if entry.is_dir && entry.name != ".." {
            "/"
        } else {
            ""
        };
        let link = html_escape(&entry.link);

        rows.push_str(&format!(
            "<tr class=\"{}\"><td class=\"name\"><a href=\"{}\">{}{}</a></td>",
            class,
            link,
            html_escape(&entry.name),
            suffix
        ));
        rows.push_str(&format!(
            "<td class=\"size\">{}</td>",
            entry.size.map(format_size).unwrap_or_else(|| "-".to_string())
        ));
        match entry.modified {
            Some(ts) => rows.push_str(&format!(
                "<td class=\"modified\" data-ts=\"{}\">{}</td>",
                ts, ts
            )),
            None => rows.push_str("<td class=\"modified\"></td>"),
        }
        if entry.name == ".." {
            rows.push_str("<td></td>");
        } else {
            rows.push_str(&format!(
                "<td><button class=\"delete\" data-href=\"{}\" hidden>Delete</button></td>",
                link
            ));
        }
        rows.push_str("</tr>");
    }
    rows.push_str("</tbody></table>");

    let breadcrumbs = render_breadcrumbs(prefix, request);
    let title = html_escape(&config.title);

    fill_template(state.assets.shell(), |key| match key {
        "title" => Some(title.clone()),
        "theme" => Some(html_escape(&config.theme)),
        "prefix" => Some(html_escape(prefix.as_str())),
        "home" => Some(html_escape(&prefix.app_root())),
        "stylesheet" => Some(html_escape(&prefix.asset_url("style.css"))),
        "script" => Some(html_escape(&prefix.asset_url("app.js"))),
        "upload" => Some(config.upload.to_string()),
        "delete" => Some(config.delete.to_string()),
        "breadcrumbs" => Some(breadcrumbs.clone()),
        "listing" => Some(rows.clone()),
        _ => None,
    })
}

fn render_breadcrumbs(prefix: &Prefix, request: &RequestPath) -> String {
    let mut crumbs = format!(
        "<a href=\"{}\">/</a>",
        html_escape(&prefix.app_root())
    );

    let mut current = RequestPath::root();
    for segment in request.segments() {
        let Ok(next) = current.join(segment) else {
            break;
        };
        crumbs.push_str(&format!(
            "<a href=\"{}\">{}</a>",
            html_escape(&prefix.link(&next, true)),
            html_escape(segment)
        ));
        current = next;
    }

    crumbs
}

/// Single-pass `{{key}}` substitution. Unknown keys are left untouched, and
/// substituted values are never scanned again.
fn fill_template(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut output = String::with_capacity(template.len() * 2);
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match lookup(key) {
                    Some(value) => output.push_str(&value),
                    None => output.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                output.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    output.push_str(rest);

    output
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use tempfile::TempDir;

    fn view(name: &str, is_dir: bool) -> DirEntryView {
        DirEntryView {
            name: name.to_string(),
            is_dir,
            size: None,
            modified: None,
            link: String::new(),
        }
    }

    #[test]
    fn test_compare_entries_order() {
        let mut entries = vec![
            view("b.txt", false),
            view("Zeta", true),
            view("a.txt", false),
            view("B.txt", false),
            view("alpha", true),
        ];
        entries.sort_by(compare_entries);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "Zeta", "a.txt", "B.txt", "b.txt"]);
    }

    #[test]
    fn test_negotiate_format() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            ListingFormat::negotiate(&headers, &ContentQuery::default()),
            ListingFormat::Html
        );

        let query = ContentQuery {
            json: true,
            download: false,
        };
        assert_eq!(
            ListingFormat::negotiate(&headers, &query),
            ListingFormat::Json
        );

        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html, application/json;q=0.9"),
        );
        assert_eq!(
            ListingFormat::negotiate(&headers, &ContentQuery::default()),
            ListingFormat::Json
        );
    }

    #[test]
    fn test_content_query_flags() {
        let parse = |uri: &'static str| {
            axum::extract::Query::<ContentQuery>::try_from_uri(&uri.parse().unwrap())
                .map(|query| (query.json, query.download))
        };

        assert_eq!(parse("/").unwrap(), (false, false));
        assert_eq!(parse("/?json").unwrap(), (true, false));
        assert_eq!(parse("/?json=&download").unwrap(), (true, true));
        assert_eq!(parse("/?json=1&download=off").unwrap(), (true, false));
        assert_eq!(parse("/?json=TRUE&download=false").unwrap(), (true, false));
        assert!(parse("/?json=maybe").is_err());
    }

    #[tokio::test]
    async fn test_collect_entries_links_and_parent() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        std::fs::create_dir(dir.join("sub dir")).unwrap();
        std::fs::write(dir.join("notes.txt"), "12345").unwrap();

        let request = RequestPath::parse("/docs").unwrap();
        let prefix = Prefix::new("/files");
        let children = vec!["notes.txt".to_string(), "sub dir".to_string()];

        let entries = collect_entries(dir, &children, &request, &prefix).await;
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].name, "..");
        assert_eq!(entries[0].link, "/files/");

        assert_eq!(entries[1].name, "sub dir");
        assert!(entries[1].is_dir);
        assert_eq!(entries[1].link, "/files/docs/sub%20dir/");
        assert_eq!(entries[1].size, None);

        assert_eq!(entries[2].name, "notes.txt");
        assert_eq!(entries[2].link, "/files/docs/notes.txt");
        assert_eq!(entries[2].size, Some(5));
        assert!(entries[2].modified.is_some());
    }

    #[tokio::test]
    async fn test_collect_entries_root_has_no_parent() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.txt"), "a").unwrap();

        let entries = collect_entries(
            temp_dir.path(),
            &["a.txt".to_string(), "vanished.txt".to_string()],
            &RequestPath::root(),
            &Prefix::default(),
        )
        .await;

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].link, "/a.txt");
    }

    #[test]
    fn test_fill_template_single_pass() {
        let out = fill_template("<h1>{{title}}</h1>{{listing}}{{unknown}}", |key| match key {
            "title" => Some("{{listing}}".to_string()),
            "listing" => Some("rows".to_string()),
            _ => None,
        });
        assert_eq!(out, "<h1>{{listing}}</h1>rows{{unknown}}");

        assert_eq!(fill_template("open {{ end", |_| None), "open {{ end");
    }

    #[test]
    fn test_breadcrumbs() {
        let crumbs = render_breadcrumbs(
            &Prefix::new("/files"),
            &RequestPath::parse("/a b/<c>").unwrap(),
        );
        assert_eq!(
            crumbs,
            "<a href=\"/files/\">/</a><a href=\"/files/a%20b/\">a b</a>\
             <a href=\"/files/a%20b/%3Cc%3E/\">&lt;c&gt;</a>"
        );
    }

    #[test]
    fn test_html_escape_and_size() {
        assert_eq!(
            html_escape("<a href=\"x\">&'"),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;"
        );
        assert_eq!(format_size(10), "10 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
    }
}

//! Page data handed to the renderer, and the built-in maud templates.
//!
//! Custom listing and file-viewer pages are provided by implementing
//! [`Renderer`] and setting it on [`IndexOptions`](crate::IndexOptions).

use maud::{html, Markup, PreEscaped, DOCTYPE};
use serde::Serialize;

use crate::config::{FileSelectAction, SortKey, SortOrder};
use crate::format::{exact_time, human_size, human_time};
use crate::kinds::FileKind;
use crate::scanner::FileEntry;

/// Query value of the internal parameter serving bundled assets.
pub const ASSET_PARAM: &str = "fileIndexAsset";

pub const STYLE_CSS: &str = r#"
:root { color-scheme: light dark; --accent: #2b7de9; --muted: #8a8f98; }
body { font-family: system-ui, sans-serif; margin: 0 auto; max-width: 960px; padding: 16px; }
nav.crumbs a { color: var(--accent); text-decoration: none; }
nav.crumbs span.sep { color: var(--muted); margin: 0 4px; }
.toolbar { display: flex; gap: 8px; flex-wrap: wrap; margin: 12px 0; font-size: 0.9em; }
.toolbar a.active { font-weight: bold; }
table.entries { width: 100%; border-collapse: collapse; }
table.entries td { padding: 6px 8px; border-bottom: 1px solid rgba(128, 128, 128, 0.2); }
table.entries td.icon { width: 1.5em; font-family: 'Material Symbols Outlined', monospace; color: var(--muted); }
table.entries td.size, table.entries td.modified { text-align: right; white-space: nowrap; color: var(--muted); }
table.entries a { color: inherit; text-decoration: none; }
.pages { display: flex; gap: 6px; margin: 12px 0; }
.card { border: 1px solid rgba(128, 128, 128, 0.3); border-radius: 8px; padding: 12px 16px; margin: 16px 0; }
.preview img, .preview video { max-width: 100%; }
.preview pre { overflow-x: auto; }
footer { color: var(--muted); font-size: 0.8em; margin-top: 24px; }
"#;

pub const SCRIPT_JS: &str = r#"
document.addEventListener('click', (e) => {
    const button = e.target.closest('[data-copy]');
    if (!button) return;
    e.preventDefault();
    navigator.clipboard.writeText(new URL(button.dataset.copy, window.location.href).toString());
});
"#;

/// One breadcrumb segment, from the root down.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ancestor {
    pub name: String,
    pub path: String,
    pub path_alias: Option<String>,
}

impl Ancestor {
    pub fn link_path(&self, prefer_alias: bool) -> &str {
        match &self.path_alias {
            Some(alias) if prefer_alias => alias,
            _ => &self.path,
        }
    }
}

/// Everything a directory listing page shows.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    pub server_name: String,
    /// Breadcrumbs above the current directory, root first.
    pub ancestors: Vec<Ancestor>,
    pub dir: Ancestor,
    pub files: Vec<FileEntry>,
    pub sort_type: SortKey,
    pub sort_order: SortOrder,
    pub page: usize,
    pub page_count: usize,
    pub total_entries: usize,
    pub readme_html: Option<String>,
    pub file_time_format: String,
    pub relative_times: bool,
    pub file_select_action: FileSelectAction,
    pub prefer_aliases: bool,
    pub can_download_folders: bool,
    /// Mount prefix prepended to every generated link.
    #[serde(skip)]
    pub base: String,
}

/// How the file viewer previews the file body.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", content = "content", rename_all = "lowercase")]
pub enum Preview {
    Image,
    Video,
    Audio,
    Markdown(String),
    Text(String),
    None,
}

/// Payload of the single-file viewer.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileView {
    pub server_name: String,
    pub ancestors: Vec<Ancestor>,
    pub name: String,
    pub path_true: String,
    pub path_alias: Option<String>,
    pub size: u64,
    pub size_human: String,
    pub modified_at_millis: Option<i64>,
    pub modified_human: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub icon: String,
    pub mime: String,
    pub preview: Preview,
    pub prefer_aliases: bool,
    #[serde(skip)]
    pub base: String,
}

/// Turns page data into HTML.
pub trait Renderer: Send + Sync {
    fn listing(&self, page: &ListingPage) -> Markup;
    fn file(&self, view: &FileView) -> Markup;
    /// `base` is the mount prefix, empty when mounted at the root.
    fn not_found(&self, base: &str, server_name: &str, path: &str) -> Markup;
}

/// Percent-encodes each segment of a root-relative path and prefixes the mount.
pub fn href(base: &str, path: &str, trailing_slash: bool) -> String {
    let encoded: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::encode(s).into_owned())
        .collect();
    let mut out = format!("{}/{}", base, encoded.join("/"));
    if trailing_slash && !encoded.is_empty() {
        out.push('/');
    }
    out
}

/// The bundled templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaudRenderer;

fn layout(title: &str, body: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) }
                link rel="stylesheet" href={"?" (ASSET_PARAM) "=style.css"};
                script src={"?" (ASSET_PARAM) "=index.js"} defer {}
            }
            body { (body) }
        }
    }
}

fn breadcrumbs(base: &str, ancestors: &[Ancestor], current: Option<&Ancestor>, prefer_alias: bool) -> Markup {
    html! {
        nav.crumbs {
            @for ancestor in ancestors {
                a href=(href(base, ancestor.link_path(prefer_alias), true)) { (ancestor.name) }
                span.sep { "/" }
            }
            @if let Some(current) = current {
                strong { (current.name) }
            }
        }
    }
}

fn sort_link(page: &ListingPage, key: SortKey, order: SortOrder, label: &str) -> Markup {
    let active = page.sort_type == key && page.sort_order == order;
    html! {
        a class=[active.then_some("active")]
            href={"?sortType=" (key.as_str()) "&sortOrder=" (order.as_str())} { (label) }
    }
}

fn row_link(page: &ListingPage, entry: &FileEntry) -> String {
    let link = href(&page.base, entry.link_path(page.prefer_aliases), entry.is_directory);
    if !entry.is_directory && page.file_select_action == FileSelectAction::Render {
        format!("{link}?format=render")
    } else {
        link
    }
}

impl Renderer for MaudRenderer {
    fn listing(&self, page: &ListingPage) -> Markup {
        let base = page.base.as_str();
        let prefer = page.prefer_aliases;
        let body = html! {
            header {
                (breadcrumbs(base, &page.ancestors, Some(&page.dir), prefer))
            }
            div.toolbar {
                (sort_link(page, SortKey::Name, SortOrder::Asc, "Name A-Z"))
                (sort_link(page, SortKey::Name, SortOrder::Desc, "Name Z-A"))
                (sort_link(page, SortKey::Modified, SortOrder::Asc, "Oldest"))
                (sort_link(page, SortKey::Modified, SortOrder::Desc, "Newest"))
                (sort_link(page, SortKey::Size, SortOrder::Asc, "Smallest"))
                (sort_link(page, SortKey::Size, SortOrder::Desc, "Largest"))
                @if page.can_download_folders {
                    a href="?format=zip" { "Download as zip" }
                }
                a href="#" data-copy=(href(base, page.dir.link_path(prefer), true)) { "Copy link" }
            }
            table.entries #fileEntries {
                @for entry in &page.files {
                    @let link = row_link(page, entry);
                    @let download = !entry.is_directory && page.file_select_action == FileSelectAction::Download;
                    tr.entry data-type=(entry.kind.as_str()) {
                        td.icon { (entry.icon) }
                        td.name title=(entry.name) {
                            @if download {
                                a href=(link) download=(entry.name) { (entry.name) }
                            } @else {
                                a href=(link) { (entry.name) }
                            }
                        }
                        td.size title=[entry.size.map(|s| format!("{s} bytes"))] {
                            (human_size(entry.size))
                        }
                        td.modified title=(exact_time(entry.modified_at_millis)) {
                            (human_time(entry.modified_at_millis, &page.file_time_format, page.relative_times))
                        }
                    }
                }
            }
            @if page.page_count > 1 {
                div.pages {
                    @for n in 1..=page.page_count {
                        @if n == page.page {
                            strong { (n) }
                        } @else {
                            a href={"?sortType=" (page.sort_type.as_str()) "&sortOrder=" (page.sort_order.as_str()) "&page=" (n)} { (n) }
                        }
                    }
                }
            }
            @if let Some(readme) = &page.readme_html {
                div.card #readme {
                    (PreEscaped(readme))
                }
            }
            footer {
                (page.total_entries) " items · " (page.server_name)
            }
        };
        let title = format!("{} - {}", page.dir.name, page.server_name);
        layout(&title, body)
    }

    fn file(&self, view: &FileView) -> Markup {
        let base = view.base.as_str();
        let raw = href(base, &view.path_true, false);
        let body = html! {
            header {
                (breadcrumbs(base, &view.ancestors, None, view.prefer_aliases))
                h1 { (view.name) }
                p {
                    span title={(view.size) " bytes"} { (view.size_human) }
                    " · "
                    span title=(exact_time(view.modified_at_millis)) { (view.modified_human) }
                    " · " (view.mime)
                }
                div.toolbar {
                    a href=(raw) download=(view.name) { "Download" }
                    a href=(raw) { "Open raw" }
                }
            }
            div.preview {
                @match &view.preview {
                    Preview::Image => {
                        img src=(raw) alt=(view.name);
                    },
                    Preview::Video => {
                        video controls { source src=(raw); }
                    },
                    Preview::Audio => {
                        audio controls { source src=(raw); }
                    },
                    Preview::Markdown(html) => {
                        div.card { (PreEscaped(html)) }
                    },
                    Preview::Text(text) => {
                        div.card { pre { code { (text) } } }
                    },
                    Preview::None => {
                        div.card {
                            p { "This file can't be previewed." }
                            a href=(raw) download=(view.name) { "Download file - " (view.size_human) }
                        }
                    },
                }
            }
        };
        layout(&view.name, body)
    }

    fn not_found(&self, base: &str, server_name: &str, path: &str) -> Markup {
        layout(
            "Not found",
            html! {
                h1 { "404 - Not found" }
                p { "Nothing exists at " code { (path) } " on " (server_name) "." }
                a href=(href(base, "/", true)) { "Back to the root" }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn href_encodes_segments_and_keeps_mount() {
        assert_eq!(href("", "/", true), "/");
        assert_eq!(href("", "/My Docs/a#b.txt", false), "/My%20Docs/a%23b.txt");
        assert_eq!(href("/files", "/music", true), "/files/music/");
    }

    #[test]
    fn not_found_page_links_to_the_mount_root() {
        let page = MaudRenderer.not_found("/files", "demo", "/missing").into_string();
        assert!(page.contains("href=\"/files/\""));
        let page = MaudRenderer.not_found("", "demo", "/missing").into_string();
        assert!(page.contains("href=\"/\""));
    }

    #[test]
    fn preview_serializes_with_kind_tag() {
        let json = serde_json::to_value(Preview::Text("hi".to_string())).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "text", "content": "hi" }));
        let json = serde_json::to_value(Preview::Image).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "image" }));
    }
}

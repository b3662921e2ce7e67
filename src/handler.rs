//! The middleware entry point: resolves a request path and dispatches to file
//! serving, the file viewer, zip download, JSON export or the listing page.

use std::{
    fs::Metadata,
    io,
    path::{Path, PathBuf},
};

use axum::{
    body::Body,
    extract::{OriginalUri, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    middleware::Next,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tokio::fs;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, warn};

use crate::alias::AliasResolver;
use crate::archive::ZipJob;
use crate::config::{IndexOptions, SortKey, SortOrder, LISTING_PAGE_SIZE};
use crate::error::IndexError;
use crate::format::{human_size, human_time, markdown_to_safe_html};
use crate::kinds::extension_of;
use crate::render::{Ancestor, FileView, ListingPage, Preview, SCRIPT_JS, STYLE_CSS};
use crate::scanner::{arrange, join_segments, millis_of, DirectoryScanner, FileEntry};
use crate::FileIndex;

/// Files larger than this are never inlined into a page.
const MAX_INLINE_SIZE: u64 = 1024 * 1024;

const BROWSER_IMAGES: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "svg", "avif", "bmp", "ico"];
const BROWSER_VIDEOS: &[&str] = &["mp4", "webm"];
const BROWSER_AUDIO: &[&str] = &["mp3", "wav", "ogg", "aac", "m4a", "flac"];
const MARKDOWN: &[&str] = &["md", "markdown"];

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct IndexQuery {
    format: Option<String>,
    sort_type: Option<String>,
    sort_order: Option<String>,
    page: Option<String>,
    file_index_asset: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Zip,
    Json,
    Render,
}

impl IndexQuery {
    fn from_uri(uri: &Uri) -> Self {
        Query::<IndexQuery>::try_from_uri(uri)
            .map(|Query(q)| q)
            .unwrap_or_default()
    }

    fn format(&self) -> Option<Format> {
        match self.format.as_deref()? {
            "zip" => Some(Format::Zip),
            "json" => Some(Format::Json),
            "render" => Some(Format::Render),
            _ => None,
        }
    }

    fn sort_key(&self, default: SortKey) -> SortKey {
        self.sort_type
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default)
    }

    fn sort_order(&self, default: SortOrder) -> SortOrder {
        self.sort_order
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default)
    }

    fn page(&self) -> usize {
        self.page
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or(1)
    }
}

/// A decoded request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPath {
    pub segments: Vec<String>,
    pub trailing_slash: bool,
}

impl RequestPath {
    /// Percent-decodes and normalizes a URI path. `.` segments are dropped and
    /// `..` pops the previous segment, so the result never leaves the root.
    /// Returns `None` for paths that do not decode to UTF-8.
    pub fn parse(raw: &str) -> Option<Self> {
        let decoded = urlencoding::decode(raw).ok()?;
        if decoded.contains('\0') {
            return None;
        }
        let mut segments: Vec<String> = Vec::new();
        for part in decoded.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other.to_string()),
            }
        }
        Some(Self {
            trailing_slash: segments.is_empty() || decoded.ends_with('/'),
            segments,
        })
    }
}

/// Prefix under which the index is mounted, recovered from `OriginalUri`.
fn mount_prefix(request: &Request) -> String {
    let inner = request.uri().path();
    let Some(OriginalUri(original)) = request.extensions().get::<OriginalUri>() else {
        return String::new();
    };
    let original = original.path();
    if inner == "/" {
        return original.trim_end_matches('/').to_string();
    }
    original
        .strip_suffix(inner)
        .unwrap_or_default()
        .to_string()
}

fn server_name(options: &IndexOptions, headers: &HeaderMap) -> String {
    options
        .server_name
        .clone()
        .or_else(|| {
            headers
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.split(':').next())
                .filter(|h| !h.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "server".to_string())
}

fn serve_asset(name: &str) -> Response {
    let (content_type, body) = match name {
        "style.css" => ("text/css; charset=utf-8", STYLE_CSS),
        "index.js" => ("text/javascript; charset=utf-8", SCRIPT_JS),
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "public, max-age=86400"),
        ],
        body,
    )
        .into_response()
}

async fn serve_file(path: &Path, request: Request) -> Response {
    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    }
}

fn attachment_header(file_name: &str) -> HeaderValue {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(file_name)
    );
    HeaderValue::from_str(&value)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"download.zip\""))
}

/// Middleware serving the file index. Paths that do not resolve are handed
/// to `next` unless 404 handling is enabled.
///
/// ```no_run
/// # use axum::{Router, middleware};
/// # use file_index::{FileIndex, IndexOptions, serve_index};
/// let index = FileIndex::new(IndexOptions::default()).unwrap();
/// let app: Router = Router::new()
///     .layer(middleware::from_fn_with_state(index, serve_index));
/// ```
pub async fn serve_index(
    State(index): State<FileIndex>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return next.run(request).await;
    }
    let query = IndexQuery::from_uri(request.uri());
    if let Some(asset) = query.file_index_asset.as_deref() {
        return serve_asset(asset);
    }

    let options = index.options();
    let base = mount_prefix(&request);
    let server_name = server_name(options, request.headers());
    let raw_path = request.uri().path().to_string();

    let Some(requested) = RequestPath::parse(&raw_path) else {
        debug!("Undecodable request path: {}", raw_path);
        return not_found(options, &server_name, &raw_path, request, next).await;
    };

    let mut resolver = AliasResolver::new(&options.root_dir);
    let segments = if options.clean_aliases {
        resolver.resolve_alias_to_true_path(&requested.segments).await
    } else {
        Some(requested.segments.clone())
    };
    let Some(segments) = segments else {
        debug!("No file or alias matches {}", raw_path);
        return not_found(options, &server_name, &raw_path, request, next).await;
    };

    let abs = segments.iter().fold(options.root_dir.clone(), |p, s| p.join(s));
    let metadata = match fs::metadata(&abs).await {
        Ok(m) => m,
        Err(e) => {
            debug!("Path not found {}: {}", abs.display(), e);
            return not_found(options, &server_name, &raw_path, request, next).await;
        }
    };
    match fs::canonicalize(&abs).await {
        Ok(canonical) if canonical.starts_with(&options.root_dir) => {}
        Ok(canonical) => {
            warn!(
                "Path '{}' resolved to '{}' which is outside root '{}'",
                raw_path,
                canonical.display(),
                options.root_dir.display()
            );
            return not_found(options, &server_name, &raw_path, request, next).await;
        }
        Err(e) => {
            debug!("Failed to canonicalize {}: {}", abs.display(), e);
            return not_found(options, &server_name, &raw_path, request, next).await;
        }
    }

    let mut ctx = RequestContext {
        options,
        resolver,
        base,
        server_name,
        segments,
        abs,
    };

    if !metadata.is_dir() {
        return match query.format() {
            Some(Format::Render) => {
                let view = ctx.file_view(&metadata).await;
                options.renderer.file(&view).into_response()
            }
            Some(Format::Json) if options.json_export => {
                let view = ctx.file_view(&metadata).await;
                Json(json!({ "data": view })).into_response()
            }
            Some(Format::Json) => IndexError::Disabled("JSON export").into_response(),
            _ => serve_file(&ctx.abs, request).await,
        };
    }

    if !requested.trailing_slash {
        let original = request
            .extensions()
            .get::<OriginalUri>()
            .map(|OriginalUri(uri)| uri.clone())
            .unwrap_or_else(|| request.uri().clone());
        let mut location = format!("{}/", original.path());
        if let Some(q) = original.query() {
            location.push('?');
            location.push_str(q);
        }
        debug!("Redirecting directory {} to {}", raw_path, location);
        return (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response();
    }

    for name in &options.index_files {
        let candidate = ctx.abs.join(name);
        if fs::metadata(&candidate).await.is_ok_and(|m| m.is_file()) {
            debug!("Serving index file {}", candidate.display());
            return serve_file(&candidate, request).await;
        }
    }

    match query.format() {
        Some(Format::Zip) if options.zip_downloads => ctx.zip_response(),
        Some(Format::Zip) => IndexError::Disabled("Zip download").into_response(),
        Some(Format::Json) if !options.json_export => {
            IndexError::Disabled("JSON export").into_response()
        }
        format => match ctx.listing(&query).await {
            Ok(page) if format == Some(Format::Json) => {
                Json(json!({ "data": page })).into_response()
            }
            Ok(page) => options.renderer.listing(&page).into_response(),
            Err(IndexError::NotFound) => {
                not_found(options, &ctx.server_name, &raw_path, request, next).await
            }
            Err(e) => e.into_response(),
        },
    }
}

async fn not_found(
    options: &IndexOptions,
    server_name: &str,
    path: &str,
    request: Request,
    next: Next,
) -> Response {
    if !options.handle_404 {
        return next.run(request).await;
    }
    if let Some(document) = &options.not_found_document {
        match fs::read_to_string(document).await {
            Ok(html) => return (StatusCode::NOT_FOUND, Html(html)).into_response(),
            Err(e) => warn!("Failed to read 404 document {}: {}", document.display(), e),
        }
    }
    let base = mount_prefix(&request);
    (
        StatusCode::NOT_FOUND,
        options.renderer.not_found(&base, server_name, path),
    )
        .into_response()
}

/// State for one resolved request. The alias resolver's cache lives exactly
/// as long as this value.
struct RequestContext<'a> {
    options: &'a IndexOptions,
    resolver: AliasResolver,
    base: String,
    server_name: String,
    segments: Vec<String>,
    abs: PathBuf,
}

impl RequestContext<'_> {
    async fn alias_path(&mut self, segments: &[String]) -> Option<String> {
        if !self.options.clean_aliases {
            return None;
        }
        let alias = self.resolver.compute_alias_for_true_path(segments).await;
        Some(join_segments(&alias))
    }

    /// Root plus one crumb per segment in `segments`.
    async fn ancestors(&mut self, segments: &[String]) -> Vec<Ancestor> {
        let mut crumbs = vec![Ancestor {
            name: self.server_name.clone(),
            path: "/".to_string(),
            path_alias: self.options.clean_aliases.then(|| "/".to_string()),
        }];
        for i in 1..=segments.len() {
            let truth = &segments[..i];
            crumbs.push(Ancestor {
                name: segments[i - 1].clone(),
                path: join_segments(truth),
                path_alias: self.alias_path(truth).await,
            });
        }
        crumbs
    }

    async fn file_view(&mut self, metadata: &Metadata) -> FileView {
        let segments = self.segments.clone();
        let name = segments.last().cloned().unwrap_or_default();
        let ancestors = self.ancestors(&segments[..segments.len().saturating_sub(1)]).await;
        let path_alias = self.alias_path(&segments).await;
        let kind = self.options.type_table.classify(&name, false);
        let modified = millis_of(metadata);
        let size = metadata.len();

        FileView {
            server_name: self.server_name.clone(),
            ancestors,
            path_true: join_segments(&segments),
            path_alias,
            size,
            size_human: human_size(Some(size)),
            modified_at_millis: modified,
            modified_human: human_time(
                modified,
                &self.options.file_time_format,
                self.options.relative_times,
            ),
            kind,
            icon: self.options.type_table.icon(kind).to_string(),
            mime: mime_guess::from_path(&self.abs)
                .first_or_octet_stream()
                .to_string(),
            preview: preview_for(&self.abs, &name, size).await,
            prefer_aliases: self.options.clean_aliases && self.options.force_aliases,
            base: self.base.clone(),
            name,
        }
    }

    async fn listing(&mut self, query: &IndexQuery) -> Result<ListingPage, IndexError> {
        let options = self.options;
        let sort_type = query.sort_key(options.default_sort);
        let sort_order = query.sort_order(options.default_order);

        let scanner = DirectoryScanner {
            root: &options.root_dir,
            type_table: &options.type_table,
            hidden_prefixes: &options.hidden_prefixes,
            deep_stats: options.deep_stats,
        };
        let resolver = options.clean_aliases.then_some(&mut self.resolver);
        let entries = scanner
            .scan(&self.segments, resolver)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => {
                    warn!("Permission denied listing {}: {}", self.abs.display(), e);
                    IndexError::NotFound
                }
                _ => IndexError::Io(e),
            })?;
        let entries = arrange(entries, sort_type, sort_order);

        let readme_html = match entries.iter().find(|e| {
            !e.is_directory
                && e.name.eq_ignore_ascii_case("readme.md")
                && e.size.is_some_and(|s| s < MAX_INLINE_SIZE)
        }) {
            Some(readme) => match fs::read_to_string(self.abs.join(&readme.name)).await {
                Ok(markdown) => Some(markdown_to_safe_html(&markdown)),
                Err(e) => {
                    warn!("Failed to read readme in {}: {}", self.abs.display(), e);
                    None
                }
            },
            None => None,
        };

        let total_entries = entries.len();
        let page_count = total_entries.div_ceil(LISTING_PAGE_SIZE).max(1);
        let page = query.page().clamp(1, page_count);
        let mut files: Vec<FileEntry> = entries
            .into_iter()
            .skip((page - 1) * LISTING_PAGE_SIZE)
            .take(LISTING_PAGE_SIZE)
            .collect();

        let segments = self.segments.clone();
        if let Some((_, parent)) = segments.split_last() {
            let parent_alias = self.alias_path(parent).await;
            files.insert(0, FileEntry::parent(join_segments(parent), parent_alias));
        }

        let mut ancestors = self.ancestors(&segments).await;
        let dir = ancestors.pop().unwrap_or_else(|| Ancestor {
            name: self.server_name.clone(),
            path: "/".to_string(),
            path_alias: None,
        });

        Ok(ListingPage {
            server_name: self.server_name.clone(),
            ancestors,
            dir,
            files,
            sort_type,
            sort_order,
            page,
            page_count,
            total_entries,
            readme_html,
            file_time_format: options.file_time_format.clone(),
            relative_times: options.relative_times,
            file_select_action: options.file_select_action,
            prefer_aliases: options.clean_aliases && options.force_aliases,
            can_download_folders: options.zip_downloads,
            base: self.base.clone(),
        })
    }

    fn zip_response(&self) -> Response {
        let options = self.options;
        let name = self
            .segments
            .last()
            .cloned()
            .unwrap_or_else(|| self.server_name.clone());
        debug!("Streaming {} as zip", self.abs.display());

        let stream = ZipJob::new(
            self.abs.clone(),
            options.hidden_prefixes.clone(),
            options.zip_compression_level,
        )
        .within(options.root_dir.clone())
        .spawn();

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
        headers.insert(
            header::CONTENT_DISPOSITION,
            attachment_header(&format!("{name}.zip")),
        );
        (StatusCode::OK, headers, Body::from_stream(stream.body)).into_response()
    }
}

async fn preview_for(path: &Path, name: &str, size: u64) -> Preview {
    let ext = extension_of(name).unwrap_or_default();
    let ext = ext.as_str();
    if BROWSER_IMAGES.contains(&ext) {
        return Preview::Image;
    }
    if BROWSER_VIDEOS.contains(&ext) {
        return Preview::Video;
    }
    if BROWSER_AUDIO.contains(&ext) {
        return Preview::Audio;
    }
    if size >= MAX_INLINE_SIZE {
        return Preview::None;
    }
    let text = match fs::read(path).await {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) if !text.contains('\0') => text,
            _ => return Preview::None,
        },
        Err(e) => {
            warn!("Failed to read {} for preview: {}", path.display(), e);
            return Preview::None;
        }
    };
    if MARKDOWN.contains(&ext) {
        Preview::Markdown(markdown_to_safe_html(&text))
    } else {
        Preview::Text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn request_path_decodes_and_normalizes() {
        let parsed = RequestPath::parse("/My%20Docs/./a/../b.txt").unwrap();
        assert_eq!(parsed.segments, segs(&["My Docs", "b.txt"]));
        assert!(!parsed.trailing_slash);

        let parsed = RequestPath::parse("/../../etc/").unwrap();
        assert_eq!(parsed.segments, segs(&["etc"]));
        assert!(parsed.trailing_slash);

        let root = RequestPath::parse("/").unwrap();
        assert!(root.segments.is_empty());
        assert!(root.trailing_slash);
    }

    #[test]
    fn request_path_rejects_invalid_utf8() {
        assert_eq!(RequestPath::parse("/%FF%FE"), None);
        assert_eq!(RequestPath::parse("/a%00b"), None);
    }

    #[test]
    fn query_values_fall_back_to_defaults() {
        let uri: Uri = "/x?sortType=bogus&sortOrder=desc&page=abc&format=zip".parse().unwrap();
        let query = IndexQuery::from_uri(&uri);
        assert_eq!(query.sort_key(SortKey::Size), SortKey::Size);
        assert_eq!(query.sort_order(SortOrder::Asc), SortOrder::Desc);
        assert_eq!(query.page(), 1);
        assert_eq!(query.format(), Some(Format::Zip));
    }

    #[test]
    fn attachment_header_keeps_ascii_fallback() {
        let value = attachment_header("Fotos \"2024\" é.zip");
        let text = value.to_str().unwrap();
        assert!(text.starts_with("attachment; filename=\"Fotos _2024_ _.zip\""));
        assert!(text.contains("filename*=UTF-8''Fotos%20%222024%22%20%C3%A9.zip"));
    }

    #[tokio::test]
    async fn markdown_files_preview_as_html() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("notes.md");
        std::fs::write(&path, "# Hi").unwrap();
        let preview = preview_for(&path, "notes.md", 4).await;
        assert_eq!(preview, Preview::Markdown("<h1>Hi</h1>\n".to_string()));

        let bin = tmp.path().join("blob.dat");
        std::fs::write(&bin, [0u8, 159, 146, 150]).unwrap();
        assert_eq!(preview_for(&bin, "blob.dat", 4).await, Preview::None);
        assert_eq!(preview_for(&bin, "photo.PNG", 4).await, Preview::Image);
    }
}

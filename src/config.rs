use std::{fmt, path::PathBuf, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::kinds::TypeTable;
use crate::render::{MaudRenderer, Renderer};

/// Number of entries shown per listing page.
pub const LISTING_PAGE_SIZE: usize = 500;

/// Key a directory listing is sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Name,
    Size,
    Modified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// What clicking a file row in the listing does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FileSelectAction {
    /// Open the file directly in the browser.
    #[default]
    Default,
    /// Download the file.
    Download,
    /// Open the built-in file viewer.
    Render,
}

impl FromStr for SortKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(SortKey::Name),
            "size" => Ok(SortKey::Size),
            "modified" => Ok(SortKey::Modified),
            _ => Err(()),
        }
    }
}

impl FromStr for SortOrder {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(()),
        }
    }
}

impl SortKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::Size => "size",
            SortKey::Modified => "modified",
        }
    }
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl FileSelectAction {
    pub fn as_str(self) -> &'static str {
        match self {
            FileSelectAction::Default => "default",
            FileSelectAction::Download => "download",
            FileSelectAction::Render => "render",
        }
    }
}

/// Options for the file index, passed once at setup.
#[derive(Clone)]
pub struct IndexOptions {
    /// The root directory to serve. Canonicalized when the index is built.
    pub root_dir: PathBuf,
    /// Label of the root breadcrumb. Falls back to the request's host.
    pub server_name: Option<String>,
    /// Names starting with any of these are left out of listings. They stay
    /// reachable by their exact path.
    pub hidden_prefixes: Vec<String>,
    /// Files served in place of a listing when present in a directory.
    pub index_files: Vec<String>,
    /// Aggregate size and modification time of folders recursively.
    pub deep_stats: bool,
    pub default_sort: SortKey,
    pub default_order: SortOrder,
    /// Answer unresolvable paths with a 404 page instead of passing them on.
    pub handle_404: bool,
    /// HTML document served as the 404 page.
    pub not_found_document: Option<PathBuf>,
    pub zip_downloads: bool,
    /// 0 stores entries uncompressed, 1 to 9 deflates them.
    pub zip_compression_level: u8,
    pub json_export: bool,
    /// Accept clean aliases in request paths and compute them for listings.
    pub clean_aliases: bool,
    /// Use alias paths in generated links whenever one is available.
    pub force_aliases: bool,
    pub file_select_action: FileSelectAction,
    /// chrono strftime format for displayed modification times.
    pub file_time_format: String,
    pub relative_times: bool,
    pub renderer: Arc<dyn Renderer>,
    pub type_table: Arc<TypeTable>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            server_name: None,
            hidden_prefixes: vec![".".to_string(), "_".to_string()],
            index_files: vec!["index.html".to_string(), "index.htm".to_string()],
            deep_stats: false,
            default_sort: SortKey::Name,
            default_order: SortOrder::Asc,
            handle_404: true,
            not_found_document: None,
            zip_downloads: true,
            zip_compression_level: 0,
            json_export: false,
            clean_aliases: true,
            force_aliases: false,
            file_select_action: FileSelectAction::Default,
            file_time_format: "%b %-d, %Y".to_string(),
            relative_times: false,
            renderer: Arc::new(MaudRenderer),
            type_table: Arc::new(TypeTable::default()),
        }
    }
}

impl fmt::Debug for IndexOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexOptions")
            .field("root_dir", &self.root_dir)
            .field("server_name", &self.server_name)
            .field("hidden_prefixes", &self.hidden_prefixes)
            .field("index_files", &self.index_files)
            .field("deep_stats", &self.deep_stats)
            .field("default_sort", &self.default_sort)
            .field("default_order", &self.default_order)
            .field("handle_404", &self.handle_404)
            .field("not_found_document", &self.not_found_document)
            .field("zip_downloads", &self.zip_downloads)
            .field("zip_compression_level", &self.zip_compression_level)
            .field("json_export", &self.json_export)
            .field("clean_aliases", &self.clean_aliases)
            .field("force_aliases", &self.force_aliases)
            .field("file_select_action", &self.file_select_action)
            .field("file_time_format", &self.file_time_format)
            .field("relative_times", &self.relative_times)
            .finish_non_exhaustive()
    }
}

impl IndexOptions {
    pub fn is_hidden(&self, name: &str) -> bool {
        is_hidden(&self.hidden_prefixes, name)
    }
}

pub(crate) fn is_hidden(prefixes: &[String], name: &str) -> bool {
    prefixes.iter().any(|p| name.starts_with(p.as_str()))
}

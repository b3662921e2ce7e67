use serde::Serialize;

/// Listing classification of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Folder,
    Text,
    Image,
    Audio,
    Video,
    Compressed,
    Software,
    File,
}

impl FileKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FileKind::Folder => "folder",
            FileKind::Text => "text",
            FileKind::Image => "image",
            FileKind::Audio => "audio",
            FileKind::Video => "video",
            FileKind::Compressed => "compressed",
            FileKind::Software => "software",
            FileKind::File => "file",
        }
    }
}

/// Extension and icon lookup tables used to classify entries.
///
/// Built once when the index is configured and shared read-only by every
/// request. Lookup order matters: the first kind whose extension list contains
/// the extension wins.
#[derive(Debug, Clone)]
pub struct TypeTable {
    extensions: Vec<(FileKind, Vec<String>)>,
    icons: Vec<(FileKind, String)>,
}

/// Icon used for the synthetic parent-directory row.
pub const PARENT_ICON: &str = "drive_folder_upload";

impl TypeTable {
    pub fn new(extensions: Vec<(FileKind, Vec<String>)>, icons: Vec<(FileKind, String)>) -> Self {
        Self { extensions, icons }
    }

    /// Classifies a name. Directories are always [`FileKind::Folder`].
    pub fn classify(&self, name: &str, is_dir: bool) -> FileKind {
        if is_dir {
            return FileKind::Folder;
        }
        let Some(ext) = extension_of(name) else {
            return FileKind::File;
        };
        self.extensions
            .iter()
            .find(|(_, exts)| exts.iter().any(|e| *e == ext))
            .map(|(kind, _)| *kind)
            .unwrap_or(FileKind::File)
    }

    pub fn icon(&self, kind: FileKind) -> &str {
        self.icons
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, icon)| icon.as_str())
            .unwrap_or("draft")
    }
}

/// Lowercased extension without the leading dot. Dotfiles like `.env` have none.
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for TypeTable {
    fn default() -> Self {
        let extensions = vec![
            (
                FileKind::Text,
                owned(&[
                    "txt", "md", "markdown", "rst", "log", "csv", "tsv", "json", "xml", "yaml",
                    "yml", "toml", "ini", "cfg", "conf", "html", "htm", "css", "js", "mjs", "ts",
                    "tsx", "jsx", "rs", "py", "rb", "go", "java", "kt", "c", "h", "cpp", "hpp",
                    "cs", "php", "sh", "bash", "zsh", "ps1", "bat", "sql", "lua", "swift", "vue",
                    "svelte", "tex", "srt", "vtt", "rtf", "pdf", "doc", "docx", "odt",
                ]),
            ),
            (
                FileKind::Image,
                owned(&[
                    "jpg", "jpeg", "png", "gif", "bmp", "svg", "webp", "ico", "tif", "tiff",
                    "heic", "avif", "psd", "raw", "cr2", "nef",
                ]),
            ),
            (
                FileKind::Audio,
                owned(&[
                    "mp3", "wav", "flac", "aac", "ogg", "oga", "opus", "m4a", "wma", "mid", "midi",
                ]),
            ),
            (
                FileKind::Video,
                owned(&[
                    "mp4", "m4v", "mkv", "webm", "mov", "avi", "wmv", "flv", "mpg", "mpeg", "3gp",
                ]),
            ),
            (
                FileKind::Compressed,
                owned(&[
                    "zip", "rar", "7z", "tar", "gz", "tgz", "bz2", "xz", "zst", "lz4", "cab",
                ]),
            ),
            (
                FileKind::Software,
                owned(&[
                    "exe", "msi", "dmg", "pkg", "deb", "rpm", "appimage", "apk", "jar", "app",
                    "iso", "img", "dll", "so", "dylib",
                ]),
            ),
        ];
        let icons = vec![
            (FileKind::File, "draft".to_string()),
            (FileKind::Folder, "folder".to_string()),
            (FileKind::Text, "description".to_string()),
            (FileKind::Image, "image".to_string()),
            (FileKind::Audio, "volume_up".to_string()),
            (FileKind::Video, "movie".to_string()),
            (FileKind::Compressed, "folder_zip".to_string()),
            (FileKind::Software, "wysiwyg".to_string()),
        ];
        Self::new(extensions, icons)
    }
}

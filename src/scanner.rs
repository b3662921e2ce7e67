use std::{
    collections::HashSet,
    fs::Metadata,
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{debug, warn};

use crate::alias::{alias_name, AliasResolver};
use crate::config::{is_hidden, SortKey, SortOrder};
use crate::kinds::{FileKind, TypeTable, PARENT_ICON};

/// One row of a directory listing.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub name_alias: String,
    /// Path from the served root using true names, always starting with `/`.
    pub path_relative: String,
    /// Alias path, when clean aliases are enabled.
    pub path_alias: Option<String>,
    pub is_directory: bool,
    /// `None` when unknown (folders without deep stats).
    pub size: Option<u64>,
    pub modified_at_millis: Option<i64>,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub icon: String,
}

impl FileEntry {
    /// The synthetic `..` row pointing at the parent directory.
    pub fn parent(path_relative: String, path_alias: Option<String>) -> Self {
        Self {
            name: "..".to_string(),
            name_alias: "..".to_string(),
            path_relative,
            path_alias,
            is_directory: true,
            size: None,
            modified_at_millis: None,
            kind: FileKind::Folder,
            icon: PARENT_ICON.to_string(),
        }
    }

    /// Link target: the alias path when preferred and available.
    pub fn link_path(&self, prefer_alias: bool) -> &str {
        match &self.path_alias {
            Some(alias) if prefer_alias => alias,
            _ => &self.path_relative,
        }
    }
}

/// Joins path segments into a root-relative path such as `/a/b`.
pub fn join_segments(segments: &[String]) -> String {
    format!("/{}", segments.join("/"))
}

pub(crate) fn millis_of(metadata: &Metadata) -> Option<i64> {
    metadata.modified().ok().map(|time| {
        let datetime: DateTime<Utc> = time.into();
        datetime.timestamp_millis()
    })
}

/// Enumerates directories under one root into [`FileEntry`] rows.
pub struct DirectoryScanner<'a> {
    pub root: &'a Path,
    pub type_table: &'a TypeTable,
    pub hidden_prefixes: &'a [String],
    pub deep_stats: bool,
}

impl DirectoryScanner<'_> {
    /// Lists the visible children of the directory at `rel`.
    ///
    /// Alias paths are only computed when a resolver is given. Children whose
    /// metadata cannot be read (dangling symlinks) are skipped.
    pub async fn scan(
        &self,
        rel: &[String],
        mut resolver: Option<&mut AliasResolver>,
    ) -> io::Result<Vec<FileEntry>> {
        let dir = rel.iter().fold(self.root.to_path_buf(), |p, s| p.join(s));
        let mut reader = fs::read_dir(&dir).await?;
        let mut entries = Vec::new();

        while let Some(entry) = reader.next_entry().await? {
            let name = match entry.file_name().into_string() {
                Ok(n) => n,
                Err(_) => {
                    debug!("Skipping entry with non-UTF8 filename in {}", dir.display());
                    continue;
                }
            };
            if is_hidden(self.hidden_prefixes, &name) {
                continue;
            }

            let entry_path = entry.path();
            // Follows symlinks, unlike DirEntry::metadata.
            let metadata = match fs::metadata(&entry_path).await {
                Ok(m) => m,
                Err(e) => {
                    warn!("Failed to get metadata for {}: {}", entry_path.display(), e);
                    continue;
                }
            };
            let is_dir = metadata.is_dir();

            let (size, modified) = if !is_dir {
                (Some(metadata.len()), millis_of(&metadata))
            } else if self.deep_stats {
                let (size, modified) = deep_stats(&entry_path, self.root).await;
                (Some(size), modified)
            } else {
                (None, None)
            };

            let mut true_path = rel.to_vec();
            true_path.push(name.clone());
            let path_alias = match resolver.as_deref_mut() {
                Some(resolver) => {
                    let mut alias = resolver.compute_alias_for_true_path(rel).await;
                    alias.push(resolver.alias_segment(rel, &name).await);
                    Some(join_segments(&alias))
                }
                None => None,
            };

            let kind = self.type_table.classify(&name, is_dir);
            entries.push(FileEntry {
                name_alias: alias_name(&name),
                path_relative: join_segments(&true_path),
                path_alias,
                is_directory: is_dir,
                size,
                modified_at_millis: modified,
                icon: self.type_table.icon(kind).to_string(),
                kind,
                name,
            });
        }

        Ok(entries)
    }
}

/// Total size and newest modification time of every file below `dir`.
///
/// Walks with an explicit stack and skips directories already visited through
/// another symlink. Entries resolving outside `root` and unreadable subtrees
/// are left out of the totals.
pub async fn deep_stats(dir: &Path, root: &Path) -> (u64, Option<i64>) {
    let root = fs::canonicalize(root)
        .await
        .unwrap_or_else(|_| root.to_path_buf());
    let mut total = 0u64;
    let mut newest: Option<i64> = None;
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        let Ok(canonical) = fs::canonicalize(&current).await else {
            continue;
        };
        if !canonical.starts_with(&root) {
            warn!("Deep stats skipped {} which resolves outside the root", current.display());
            continue;
        }
        if !visited.insert(canonical.clone()) {
            debug!("Skipping already visited directory {}", current.display());
            continue;
        }
        let mut reader = match fs::read_dir(&canonical).await {
            Ok(reader) => reader,
            Err(e) => {
                debug!("Deep stats skipped {}: {}", current.display(), e);
                continue;
            }
        };
        while let Ok(Some(entry)) = reader.next_entry().await {
            let Ok(resolved) = fs::canonicalize(entry.path()).await else {
                continue;
            };
            if !resolved.starts_with(&root) {
                warn!("Deep stats skipped {} which resolves outside the root", entry.path().display());
                continue;
            }
            let Ok(metadata) = fs::metadata(&resolved).await else {
                continue;
            };
            if metadata.is_dir() {
                stack.push(resolved);
            } else {
                total += metadata.len();
                if let Some(millis) = millis_of(&metadata) {
                    newest = Some(newest.map_or(millis, |n| n.max(millis)));
                }
            }
        }
    }

    (total, newest)
}

/// Sorts by name first (case-insensitive, digit runs by value), then
/// stable-sorts by `key` so that ties keep name order. Descending order
/// reverses the final result.
pub fn sort_entries(entries: &mut [FileEntry], key: SortKey, order: SortOrder) {
    entries.sort_by(|a, b| {
        alphanumeric_sort::compare_str(a.name.to_lowercase(), b.name.to_lowercase())
    });
    match key {
        SortKey::Name => {}
        SortKey::Size => entries.sort_by_key(|e| e.size),
        SortKey::Modified => entries.sort_by_key(|e| e.modified_at_millis),
    }
    if order == SortOrder::Desc {
        entries.reverse();
    }
}

/// Sorts folders and files independently and puts every folder first.
pub fn arrange(entries: Vec<FileEntry>, key: SortKey, order: SortOrder) -> Vec<FileEntry> {
    let (mut dirs, mut files): (Vec<_>, Vec<_>) =
        entries.into_iter().partition(|e| e.is_directory);
    sort_entries(&mut dirs, key, order);
    sort_entries(&mut files, key, order);
    dirs.extend(files);
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;
    use tempfile::tempdir;

    fn file(name: &str, size: u64) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            name_alias: alias_name(name),
            path_relative: format!("/{name}"),
            path_alias: None,
            is_directory: false,
            size: Some(size),
            modified_at_millis: Some(size as i64 * 1000),
            kind: FileKind::File,
            icon: "draft".to_string(),
        }
    }

    fn dir(name: &str) -> FileEntry {
        FileEntry {
            is_directory: true,
            size: None,
            modified_at_millis: None,
            kind: FileKind::Folder,
            icon: "folder".to_string(),
            ..file(name, 0)
        }
    }

    fn names(entries: &[FileEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn natural_order_compares_numbers_by_value() {
        let mut entries = vec![
            file("file10", 1),
            file("File2", 1),
            file("file1", 1),
            file("file2b", 1),
            file("img_10.png", 1),
            file("IMG_9.png", 1),
        ];
        sort_entries(&mut entries, SortKey::Name, SortOrder::Asc);
        assert_eq!(
            names(&entries),
            vec!["file1", "File2", "file2b", "file10", "IMG_9.png", "img_10.png"]
        );
    }

    #[test]
    fn equal_sizes_keep_name_order() {
        let mut entries = vec![file("b.txt", 5), file("a.txt", 5), file("c.txt", 1)];
        sort_entries(&mut entries, SortKey::Size, SortOrder::Asc);
        assert_eq!(names(&entries), vec!["c.txt", "a.txt", "b.txt"]);
    }

    #[test]
    fn descending_reverses_the_stable_result() {
        let mut entries = vec![file("b.txt", 5), file("a.txt", 5), file("c.txt", 1)];
        sort_entries(&mut entries, SortKey::Size, SortOrder::Desc);
        assert_eq!(names(&entries), vec!["b.txt", "a.txt", "c.txt"]);
    }

    #[test]
    fn folders_precede_files_for_every_key() {
        for key in [SortKey::Name, SortKey::Size, SortKey::Modified] {
            for order in [SortOrder::Asc, SortOrder::Desc] {
                let entries = vec![
                    file("a.txt", 900),
                    dir("zeta"),
                    file("z.txt", 1),
                    dir("Alpha"),
                ];
                let arranged = arrange(entries, key, order);
                assert!(arranged[0].is_directory && arranged[1].is_directory);
                assert!(!arranged[2].is_directory && !arranged[3].is_directory);
            }
        }
    }

    #[tokio::test]
    async fn scan_hides_prefixed_names_and_classifies() {
        let tmp = tempdir().unwrap();
        stdfs::create_dir(tmp.path().join("Photos")).unwrap();
        stdfs::write(tmp.path().join("notes.md"), b"hello").unwrap();
        stdfs::write(tmp.path().join(".secret"), b"x").unwrap();
        stdfs::write(tmp.path().join("_draft.txt"), b"x").unwrap();

        let table = TypeTable::default();
        let hidden = vec![".".to_string(), "_".to_string()];
        let scanner = DirectoryScanner {
            root: tmp.path(),
            type_table: &table,
            hidden_prefixes: &hidden,
            deep_stats: false,
        };
        let entries = arrange(scanner.scan(&[], None).await.unwrap(), SortKey::Name, SortOrder::Asc);

        assert_eq!(names(&entries), vec!["Photos", "notes.md"]);
        assert_eq!(entries[0].kind, FileKind::Folder);
        assert_eq!(entries[0].size, None);
        assert_eq!(entries[1].kind, FileKind::Text);
        assert_eq!(entries[1].icon, "description");
        assert_eq!(entries[1].size, Some(5));
        assert_eq!(entries[1].path_relative, "/notes.md");
        assert_eq!(entries[1].path_alias, None);
    }

    #[tokio::test]
    async fn deep_stats_sum_descendant_files() {
        let tmp = tempdir().unwrap();
        stdfs::create_dir_all(tmp.path().join("box/inner/deeper")).unwrap();
        stdfs::write(tmp.path().join("box/a.bin"), vec![0u8; 10]).unwrap();
        stdfs::write(tmp.path().join("box/inner/b.bin"), vec![0u8; 20]).unwrap();
        stdfs::write(tmp.path().join("box/inner/deeper/c.bin"), vec![0u8; 30]).unwrap();
        stdfs::create_dir(tmp.path().join("empty")).unwrap();

        let table = TypeTable::default();
        let scanner = DirectoryScanner {
            root: tmp.path(),
            type_table: &table,
            hidden_prefixes: &[],
            deep_stats: true,
        };
        let entries = arrange(scanner.scan(&[], None).await.unwrap(), SortKey::Name, SortOrder::Asc);

        assert_eq!(entries[0].name, "box");
        assert_eq!(entries[0].size, Some(60));
        assert!(entries[0].modified_at_millis.is_some());
        assert_eq!(entries[1].name, "empty");
        assert_eq!(entries[1].size, Some(0));
        assert_eq!(entries[1].modified_at_millis, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deep_stats_ignore_symlinks_leaving_the_root() {
        let outside = tempdir().unwrap();
        stdfs::write(outside.path().join("big.bin"), vec![0u8; 500]).unwrap();

        let tmp = tempdir().unwrap();
        stdfs::create_dir(tmp.path().join("box")).unwrap();
        stdfs::write(tmp.path().join("box/a.bin"), vec![0u8; 10]).unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("box/escape")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("big.bin"),
            tmp.path().join("box/big.bin"),
        )
        .unwrap();

        let (size, _) = deep_stats(&tmp.path().join("box"), tmp.path()).await;
        assert_eq!(size, 10);

        let (size, modified) = deep_stats(&tmp.path().join("box/escape"), tmp.path()).await;
        assert_eq!(size, 0);
        assert_eq!(modified, None);
    }

    #[tokio::test]
    async fn scan_computes_alias_paths_when_resolver_given() {
        let tmp = tempdir().unwrap();
        stdfs::create_dir_all(tmp.path().join("Big Folder")).unwrap();
        stdfs::write(tmp.path().join("Big Folder/Some File.TXT"), b"x").unwrap();

        let table = TypeTable::default();
        let scanner = DirectoryScanner {
            root: tmp.path(),
            type_table: &table,
            hidden_prefixes: &[],
            deep_stats: false,
        };
        let mut resolver = AliasResolver::new(tmp.path());
        let rel = vec!["Big Folder".to_string()];
        let entries = scanner.scan(&rel, Some(&mut resolver)).await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path_relative, "/Big Folder/Some File.TXT");
        assert_eq!(entries[0].path_alias.as_deref(), Some("/big-folder/some-file.txt"));
        assert_eq!(entries[0].name_alias, "some-file.txt");
    }
}

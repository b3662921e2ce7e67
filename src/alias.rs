//! Clean URL aliases for file and directory names.
//!
//! An alias is the lowercase, dash-separated, URL-safe rendering of a name
//! (`My Photos (2020)` becomes `my-photos-2020`). Requests may use either the
//! true name or the alias for every path segment. Exposing an alias in links is
//! conflict-aware: a real name always beats an alias, and when several siblings
//! share an alias only the first one in scan order gets it.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::debug;

/// Converts a name into its URL-safe alias.
///
/// Lowercases, turns spaces into dashes, then drops every character outside
/// `[a-z0-9-_.]`.
pub fn alias_name(name: &str) -> String {
    name.to_lowercase()
        .replace(' ', "-")
        .chars()
        .filter(|c| matches!(c, 'a'..='z' | '0'..='9' | '-' | '_' | '.'))
        .collect()
}

/// Children of one directory with their aliases, in scan order.
#[derive(Debug)]
struct DirAliases {
    names: Vec<String>,
    aliases: Vec<String>,
    /// Segment to use in an alias path for each child: the alias when it is
    /// safe to expose, otherwise the true name.
    exposed: Vec<String>,
}

impl DirAliases {
    fn new(dir: &Path, names: Vec<String>) -> Self {
        let aliases: Vec<String> = names.iter().map(|n| alias_name(n)).collect();
        let real: HashSet<&str> = names.iter().map(String::as_str).collect();
        let mut first_claim: HashMap<&str, usize> = HashMap::new();
        for (i, alias) in aliases.iter().enumerate() {
            first_claim.entry(alias.as_str()).or_insert(i);
        }

        let exposed = names
            .iter()
            .zip(&aliases)
            .enumerate()
            .map(|(i, (name, alias))| {
                if alias == name || alias.is_empty() {
                    return name.clone();
                }
                if real.contains(alias.as_str()) {
                    debug!(
                        "alias shadowed by real file: '{}' -> '{}' in {}",
                        name,
                        alias,
                        dir.display()
                    );
                    return name.clone();
                }
                if first_claim.get(alias.as_str()) != Some(&i) {
                    debug!(
                        "alias conflict, alias disabled for this name: '{}' -> '{}' in {}",
                        name,
                        alias,
                        dir.display()
                    );
                    return name.clone();
                }
                alias.clone()
            })
            .collect();

        Self {
            names,
            aliases,
            exposed,
        }
    }

    /// Exact name first, then the first child whose alias matches.
    fn lookup(&self, segment: &str) -> Option<&str> {
        self.names
            .iter()
            .find(|name| name.as_str() == segment)
            .or_else(|| {
                self.aliases
                    .iter()
                    .position(|alias| alias == segment)
                    .map(|i| &self.names[i])
            })
            .map(String::as_str)
    }

    fn exposed_for(&self, name: &str) -> Option<&str> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.exposed[i].as_str())
    }
}

/// Maps between true relative paths and alias paths under one root.
///
/// Holds a cache of directory listings keyed by absolute directory path. A
/// resolver lives for exactly one request; a directory that changes on disk
/// while the request is in flight is seen as it was at its first scan.
#[derive(Debug)]
pub struct AliasResolver {
    root: PathBuf,
    dirs: HashMap<PathBuf, Arc<DirAliases>>,
}

impl AliasResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dirs: HashMap::new(),
        }
    }

    /// Number of directories scanned so far by this resolver.
    pub fn cached_directories(&self) -> usize {
        self.dirs.len()
    }

    async fn directory(&mut self, rel: &[String]) -> io::Result<Arc<DirAliases>> {
        let abs = rel.iter().fold(self.root.clone(), |p, s| p.join(s));
        if let Some(cached) = self.dirs.get(&abs) {
            return Ok(Arc::clone(cached));
        }
        let mut reader = fs::read_dir(&abs).await?;
        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(_) => debug!("Skipping entry with non-UTF8 filename in {}", abs.display()),
            }
        }
        let listing = Arc::new(DirAliases::new(&abs, names));
        self.dirs.insert(abs, Arc::clone(&listing));
        Ok(listing)
    }

    /// Resolves a requested path whose segments may be aliases into the true
    /// relative path. Returns `None` when any segment cannot be matched.
    pub async fn resolve_alias_to_true_path(&mut self, segments: &[String]) -> Option<Vec<String>> {
        let mut resolved = Vec::with_capacity(segments.len());
        for segment in segments {
            let listing = match self.directory(&resolved).await {
                Ok(listing) => listing,
                Err(e) => {
                    debug!("Alias resolution stopped at '/{}': {}", resolved.join("/"), e);
                    return None;
                }
            };
            let name = listing.lookup(segment)?.to_string();
            resolved.push(name);
        }
        Some(resolved)
    }

    /// Alias segment to expose for `name` inside the directory `parent`.
    /// Falls back to the true name when the alias is shadowed or ambiguous.
    pub async fn alias_segment(&mut self, parent: &[String], name: &str) -> String {
        match self.directory(parent).await {
            Ok(listing) => listing.exposed_for(name).unwrap_or(name).to_string(),
            Err(_) => name.to_string(),
        }
    }

    /// Computes the alias path for a true relative path, segment by segment.
    pub async fn compute_alias_for_true_path(&mut self, segments: &[String]) -> Vec<String> {
        let mut alias = Vec::with_capacity(segments.len());
        for (i, name) in segments.iter().enumerate() {
            alias.push(self.alias_segment(&segments[..i], name).await);
        }
        alias
    }
}

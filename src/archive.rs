//! Streams a directory tree as a zip archive into a response body.
//!
//! The archive is written on a blocking thread into a bounded channel; the
//! receiving half is the response body. Memory use is bounded by the channel
//! capacity times the chunk size regardless of the directory size. Dropping
//! the body (client disconnect) cancels the job before its next file.
//! Entries whose real path leaves the boundary directory are skipped.

use std::{
    collections::HashSet,
    fs, io,
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::config::is_hidden;
use crate::error::ArchiveError;

const CHUNK_SIZE: usize = 64 * 1024;
const CHANNEL_CAPACITY: usize = 8;

/// Opens the files that go into an archive.
pub trait ArchiveSource: Send + Sync + 'static {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;
}

/// Reads archive entries straight from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFiles;

impl ArchiveSource for LocalFiles {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(path)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZipSummary {
    pub entries: usize,
    pub bytes: u64,
}

/// A running archive job.
pub struct ZipStream {
    /// Archive bytes. A mid-stream `Err` means the archive was aborted.
    pub body: BoxStream<'static, io::Result<Bytes>>,
    pub task: JoinHandle<Result<ZipSummary, ArchiveError>>,
}

/// Buffers archive output and hands it to the body channel in chunks.
///
/// After the first failure the writer is a sink: later writes succeed and are
/// discarded, so the zip writer's finalize-on-drop has nothing to report.
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: Vec<u8>,
    cancel: CancellationToken,
    /// Set once the archive failed; nothing more reaches the body.
    aborted: Arc<AtomicBool>,
}

impl ChannelWriter {
    fn new(
        tx: mpsc::Sender<io::Result<Bytes>>,
        cancel: CancellationToken,
        aborted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(CHUNK_SIZE),
            cancel,
            aborted,
        }
    }

    fn closed(&self) -> bool {
        self.cancel.is_cancelled() || self.aborted.load(Ordering::SeqCst)
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Reports the disconnect once and turns the writer into a sink.
    fn disconnected(&self) -> io::Error {
        self.aborted.store(true, Ordering::SeqCst);
        io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected")
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::replace(&mut self.buf, Vec::with_capacity(CHUNK_SIZE)));
        if self.tx.blocking_send(Ok(chunk)).is_err() {
            self.cancel.cancel();
            return Err(self.disconnected());
        }
        Ok(())
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.is_aborted() {
            return Ok(data.len());
        }
        if self.cancel.is_cancelled() {
            return Err(self.disconnected());
        }
        self.buf.extend_from_slice(data);
        if self.buf.len() >= CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.is_aborted() {
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(self.disconnected());
        }
        self.send_buffered()
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        if !self.closed() {
            let _ = self.send_buffered();
        }
    }
}

/// One directory download.
pub struct ZipJob {
    root: PathBuf,
    /// Canonical directory the walk may not leave. Defaults to `root`.
    boundary: Option<PathBuf>,
    hidden_prefixes: Vec<String>,
    compression_level: u8,
    source: Arc<dyn ArchiveSource>,
    cancel: CancellationToken,
}

impl ZipJob {
    pub fn new(root: impl Into<PathBuf>, hidden_prefixes: Vec<String>, compression_level: u8) -> Self {
        Self {
            root: root.into(),
            boundary: None,
            hidden_prefixes,
            compression_level: compression_level.min(9),
            source: Arc::new(LocalFiles),
            cancel: CancellationToken::new(),
        }
    }

    /// Restricts the walk to entries whose canonical path is under `boundary`.
    pub fn within(mut self, boundary: impl Into<PathBuf>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    pub fn with_source(mut self, source: Arc<dyn ArchiveSource>) -> Self {
        self.source = source;
        self
    }

    /// Token that stops the job before its next file when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn file_options(&self) -> SimpleFileOptions {
        let options = SimpleFileOptions::default().unix_permissions(0o644);
        if self.compression_level == 0 {
            options.compression_method(CompressionMethod::Stored)
        } else {
            options
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(i64::from(self.compression_level)))
        }
    }

    /// Starts archiving on the blocking pool.
    pub fn spawn(self) -> ZipStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = self.cancel.clone();
        let guard = self.cancel.clone().drop_guard();

        let task = tokio::task::spawn_blocking(move || {
            let aborted = Arc::new(AtomicBool::new(false));
            let writer = ChannelWriter::new(tx.clone(), cancel.clone(), aborted.clone());
            let root = self.root.clone();
            match self.run(writer, &aborted) {
                Ok(summary) => {
                    info!(
                        "Archived {} files ({} bytes) from {}",
                        summary.entries,
                        summary.bytes,
                        root.display()
                    );
                    Ok(summary)
                }
                Err(_) if cancel.is_cancelled() => {
                    info!("Client disconnected, zip of {} cancelled", root.display());
                    Err(ArchiveError::Cancelled)
                }
                Err(e) => {
                    error!("Failed to archive {}: {}", root.display(), e);
                    let _ = tx.blocking_send(Err(io::Error::other(e.to_string())));
                    Err(e)
                }
            }
        });

        let body = stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|item| (item, (rx, guard)))
        })
        .boxed();

        ZipStream { body, task }
    }

    fn run(self, writer: ChannelWriter, aborted: &AtomicBool) -> Result<ZipSummary, ArchiveError> {
        let mut zip = ZipWriter::new_stream(writer);
        let result = self.write_entries(&mut zip);
        let summary = match result {
            Ok(summary) => summary,
            Err(e) => {
                // The writer finalizes on drop; that partial trailer goes nowhere.
                aborted.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };

        let mut inner = zip.finish()?;
        inner.flush()?;
        Ok(summary)
    }

    /// Depth-first walk writing every visible file. Entry names are relative
    /// to the archived root and use `/` separators.
    fn write_entries<W: Write + io::Seek>(
        &self,
        zip: &mut ZipWriter<W>,
    ) -> Result<ZipSummary, ArchiveError> {
        let boundary = match &self.boundary {
            Some(boundary) => boundary.clone(),
            None => fs::canonicalize(&self.root)?,
        };
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut stack = vec![(self.root.clone(), String::new())];
        let mut entries = 0usize;
        let mut bytes = 0u64;

        while let Some((dir, prefix)) = stack.pop() {
            if self.cancel.is_cancelled() {
                return Err(ArchiveError::Cancelled);
            }
            let canonical = fs::canonicalize(&dir)?;
            if !canonical.starts_with(&boundary) {
                warn!("Skipping {} which resolves outside {}", dir.display(), boundary.display());
                continue;
            }
            if !visited.insert(canonical) {
                warn!("Skipping directory loop at {}", dir.display());
                continue;
            }

            let mut children = fs::read_dir(&dir)?.collect::<io::Result<Vec<_>>>()?;
            children.sort_by_key(|child| child.file_name());

            let mut subdirs = Vec::new();
            for child in children {
                let Ok(name) = child.file_name().into_string() else {
                    debug!("Skipping entry with non-UTF8 filename in {}", dir.display());
                    continue;
                };
                if is_hidden(&self.hidden_prefixes, &name) {
                    continue;
                }
                let path = child.path();
                let resolved = fs::canonicalize(&path)?;
                if !resolved.starts_with(&boundary) {
                    warn!("Skipping {} which resolves outside {}", path.display(), boundary.display());
                    continue;
                }
                let metadata = fs::metadata(&resolved)?;
                let entry_name = format!("{prefix}{name}");
                if metadata.is_dir() {
                    subdirs.push((path, format!("{entry_name}/")));
                    continue;
                }

                if self.cancel.is_cancelled() {
                    return Err(ArchiveError::Cancelled);
                }
                let mut reader = self.source.open(&path)?;
                zip.start_file(
                    entry_name.as_str(),
                    self.file_options()
                        .large_file(metadata.len() >= u64::from(u32::MAX)),
                )?;
                bytes += io::copy(&mut reader, zip)?;
                entries += 1;
            }
            stack.extend(subdirs.into_iter().rev());
        }

        Ok(ZipSummary { entries, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;
    use zip::ZipArchive;

    struct CountingSource {
        opens: AtomicUsize,
    }

    impl ArchiveSource for CountingSource {
        fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            LocalFiles.open(path)
        }
    }

    fn hidden() -> Vec<String> {
        vec![".".to_string(), "_".to_string()]
    }

    async fn collect(body: BoxStream<'static, io::Result<Bytes>>) -> Vec<u8> {
        let chunks: Vec<Bytes> = body.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn archive_contains_every_visible_file() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("sub/deep")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("a.txt"), b"alpha").unwrap();
        fs::write(root.join(".hidden.txt"), b"x").unwrap();
        fs::write(root.join(".git/config"), b"x").unwrap();
        fs::write(root.join("sub/b.txt"), b"bravo").unwrap();
        fs::write(root.join("sub/_draft.txt"), b"x").unwrap();
        fs::write(root.join("sub/deep/c.txt"), b"charlie").unwrap();

        let ZipStream { body, task } = ZipJob::new(root, hidden(), 0).spawn();
        let bytes = collect(body).await;
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.entries, 3);

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "sub/b.txt", "sub/deep/c.txt"]);

        let mut content = String::new();
        archive
            .by_name("sub/deep/c.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "charlie");
    }

    #[tokio::test]
    async fn deflated_archive_reads_back() {
        let tmp = tempdir().unwrap();
        let text = "all work and no play ".repeat(500);
        fs::write(tmp.path().join("story.txt"), &text).unwrap();

        let ZipStream { body, task } = ZipJob::new(tmp.path(), hidden(), 9).spawn();
        let bytes = collect(body).await;
        task.await.unwrap().unwrap();
        assert!(bytes.len() < text.len());

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name("story.txt").unwrap();
        assert_eq!(file.compression(), CompressionMethod::Deflated);
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        assert_eq!(content, text);
    }

    #[tokio::test]
    async fn empty_directory_yields_empty_archive() {
        let tmp = tempdir().unwrap();
        let ZipStream { body, task } = ZipJob::new(tmp.path(), hidden(), 0).spawn();
        let bytes = collect(body).await;
        assert_eq!(task.await.unwrap().unwrap().entries, 0);
        assert_eq!(ZipArchive::new(Cursor::new(bytes)).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn dropping_the_body_stops_opening_files() {
        const FILES: usize = 40;
        let tmp = tempdir().unwrap();
        for i in 0..FILES {
            fs::write(tmp.path().join(format!("file{i:02}.bin")), vec![7u8; 256 * 1024]).unwrap();
        }

        let spy = Arc::new(CountingSource {
            opens: AtomicUsize::new(0),
        });
        let ZipStream { mut body, task } = ZipJob::new(tmp.path(), hidden(), 0)
            .with_source(spy.clone())
            .spawn();

        let first = body.next().await.unwrap().unwrap();
        assert!(!first.is_empty());
        drop(body);

        let result = task.await.unwrap();
        assert!(matches!(result, Err(ArchiveError::Cancelled)));
        assert!(spy.opens.load(Ordering::SeqCst) < FILES);
    }

    #[tokio::test]
    async fn cancelling_the_token_before_start_archives_nothing() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), b"a").unwrap();
        let spy = Arc::new(CountingSource {
            opens: AtomicUsize::new(0),
        });
        let job = ZipJob::new(tmp.path(), hidden(), 0).with_source(spy.clone());
        job.cancellation_token().cancel();

        let ZipStream { body, task } = job.spawn();
        drop(body);
        assert!(matches!(task.await.unwrap(), Err(ArchiveError::Cancelled)));
        assert_eq!(spy.opens.load(Ordering::SeqCst), 0);
    }

    struct FailingSource {
        broken: &'static str,
    }

    impl ArchiveSource for FailingSource {
        fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
            if path.file_name().is_some_and(|n| n == self.broken) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "vanished"));
            }
            LocalFiles.open(path)
        }
    }

    #[tokio::test]
    async fn failing_file_ends_the_stream_with_an_error() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), b"alpha").unwrap();
        fs::write(tmp.path().join("b.txt"), b"bravo").unwrap();
        fs::write(tmp.path().join("c.txt"), b"charlie").unwrap();

        let ZipStream { body, task } = ZipJob::new(tmp.path(), hidden(), 0)
            .with_source(Arc::new(FailingSource { broken: "b.txt" }))
            .spawn();
        let items: Vec<io::Result<Bytes>> = body.collect().await;

        assert!(matches!(task.await.unwrap(), Err(ArchiveError::Io(_))));
        let (last, rest) = items.split_last().unwrap();
        assert!(last.is_err());
        assert!(rest.iter().all(|item| item.is_ok()));

        // No central directory made it out, so the partial bytes are not a valid archive.
        let partial: Vec<u8> = rest
            .iter()
            .flat_map(|item| item.as_ref().unwrap().to_vec())
            .collect();
        assert!(ZipArchive::new(Cursor::new(partial)).is_err());
    }

    #[test]
    fn aborted_writer_discards_output() {
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let aborted = Arc::new(AtomicBool::new(false));
        let mut writer = ChannelWriter::new(tx, CancellationToken::new(), aborted.clone());
        writer.write_all(b"kept").unwrap();
        writer.flush().unwrap();
        assert_eq!(rx.try_recv().unwrap().unwrap(), Bytes::from_static(b"kept"));

        aborted.store(true, Ordering::SeqCst);
        writer.write_all(b"trailer").unwrap();
        writer.flush().unwrap();
        drop(writer);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn cancelled_writer_fails_once_then_discards() {
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let mut writer = ChannelWriter::new(tx, cancel.clone(), Arc::new(AtomicBool::new(false)));
        cancel.cancel();

        let err = writer.write(b"data").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(writer.write(b"more").unwrap(), 4);
        writer.flush().unwrap();
        drop(writer);
        assert!(rx.try_recv().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_leaving_the_boundary_are_skipped() {
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("private.txt"), b"private").unwrap();
        fs::write(outside.path().join("single.txt"), b"single").unwrap();

        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("ok.txt"), b"ok").unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("escape")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("single.txt"),
            tmp.path().join("link.txt"),
        )
        .unwrap();
        fs::create_dir(tmp.path().join("inner")).unwrap();
        fs::write(tmp.path().join("inner/x.txt"), b"x").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("inner/x.txt"), tmp.path().join("alias.txt"))
            .unwrap();

        let ZipStream { body, task } = ZipJob::new(tmp.path(), hidden(), 0).spawn();
        let bytes = collect(body).await;
        assert_eq!(task.await.unwrap().unwrap().entries, 3);

        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["alias.txt", "inner/x.txt", "ok.txt"]);
    }
}

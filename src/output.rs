use std::fmt::Write as FmtWrite;
use std::io;
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};
use futures::{stream, SinkExt};
use log::{debug, warn};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{BytesCodec, FramedWrite};

use crate::bounded_buffer::Token;
use crate::error::{PipelineError, Result};
use crate::reducer::GlobalResult;

const CHUNKS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// the file ends up holding this run's counts only
    Replace,
    /// this run's counts follow whatever the file held before
    Append,
}

impl Default for OutputMode {
    fn default() -> Self {
        OutputMode::Append
    }
}

/// `word count\n` for each token. Words are written as raw bytes.
fn format_chunk(chunk: &[Token]) -> io::Result<Bytes> {
    let mut buffer = BytesMut::with_capacity(chunk.len() * 16);
    for token in chunk {
        buffer.reserve(token.word.len() + 22);
        buffer.put_slice(&token.word);
        write!(buffer, " {}\n", token.count)
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "formatting error"))?;
    }
    Ok(buffer.freeze())
}

/// Streams `result` through `writer` and hands the writer back unflushed.
pub async fn write_to<W>(result: &GlobalResult, writer: W) -> Result<W>
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, BytesCodec::new());
    let mut chunks = stream::iter(result.tokens().chunks(CHUNKS_CAPACITY).map(format_chunk));
    sink.send_all(&mut chunks).await?;
    Ok(sink.into_inner())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_owned());
    path.with_file_name(format!(".{}.tmp-{}", name, std::process::id()))
}

async fn write_temp(
    result: &GlobalResult,
    path: &Path,
    temp: &Path,
    mode: OutputMode,
) -> Result<()> {
    match tokio::fs::remove_file(temp).await {
        Err(ref e) if e.kind() != io::ErrorKind::NotFound => {
            warn!("can't remove stale {:?}: {}", temp, e)
        }
        _ => {}
    }

    if mode == OutputMode::Append {
        match tokio::fs::copy(path, temp).await {
            Ok(copied) => debug!("output: keeping {} existing bytes of {:?}", copied, path),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .append(mode == OutputMode::Append)
        .truncate(mode == OutputMode::Replace)
        .open(temp)
        .await?;
    let mut file = write_to(result, file).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

/// Writes `result` to `path` through a sibling temp file renamed into place,
/// so a failed run leaves the previous contents of `path` untouched.
pub async fn write_file(result: &GlobalResult, path: &Path, mode: OutputMode) -> Result<()> {
    let temp = temp_path(path);
    let written = match write_temp(result, path, &temp, mode).await {
        Ok(()) => tokio::fs::rename(&temp, path).await.map_err(PipelineError::from),
        Err(err) => Err(err),
    };
    if written.is_err() {
        let _ = tokio::fs::remove_file(&temp).await;
    }
    written
}

/// Writes to `path`, or to stdout when there is none.
pub async fn write_result(
    result: &GlobalResult,
    path: Option<&Path>,
    mode: OutputMode,
) -> Result<()> {
    match path {
        Some(path) => write_file(result, path, mode).await,
        None => {
            let mut stdout = write_to(result, tokio::io::stdout()).await?;
            stdout.flush().await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(entries: &[(&'static str, u64)]) -> GlobalResult {
        GlobalResult::new(
            entries
                .iter()
                .map(|&(w, c)| Token::with_count(Bytes::from_static(w.as_bytes()), c))
                .collect(),
        )
    }

    #[tokio::test]
    async fn formats_one_line_per_word() {
        let out = write_to(&result(&[("the", 2), ("cat", 1)]), Vec::new()).await.unwrap();
        assert_eq!(out, b"the 2\ncat 1\n".to_vec());
    }

    #[tokio::test]
    async fn large_results_span_chunks() {
        let tokens: Vec<Token> = (0..1000)
            .map(|i| Token::with_count(Bytes::from(format!("w{}", i)), i))
            .collect();
        let out = write_to(&GlobalResult::new(tokens), Vec::new()).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1000);
        assert_eq!(text.lines().last(), Some("w999 999"));
    }

    #[tokio::test]
    async fn replace_overwrites_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        std::fs::write(&path, "old 1\n").unwrap();

        write_file(&result(&[("new", 3)]), &path, OutputMode::Replace).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new 3\n");
        assert!(!temp_path(&path).exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn append_keeps_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");

        write_file(&result(&[("a", 1)]), &path, OutputMode::Append).await.unwrap();
        write_file(&result(&[("b", 2)]), &path, OutputMode::Append).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a 1\nb 2\n");
    }

    #[tokio::test]
    async fn default_mode_accumulates_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");

        write_file(&result(&[("a", 1)]), &path, OutputMode::default()).await.unwrap();
        write_file(&result(&[("b", 1)]), &path, OutputMode::default()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a 1\nb 1\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn failed_write_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("output.txt");
        assert!(write_file(&result(&[("a", 1)]), &path, OutputMode::Replace).await.is_err());
        assert!(!path.exists());
        assert!(!temp_path(&path).exists());
    }
}

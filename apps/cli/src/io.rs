//! NDJSON record streams between files/stdio and the pipeline channels.

use std::path::{Path, PathBuf};

use geoenrich_shared::{GeoenrichError, Record, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;

const STDIN: &str = "<stdin>";
const STDOUT: &str = "<stdout>";

pub(crate) type Input = Box<dyn AsyncRead + Unpin + Send>;
pub(crate) type Output = Box<dyn AsyncWrite + Unpin + Send>;

/// Open `path` for reading, or stdin when absent.
pub(crate) async fn open_input(path: Option<&Path>) -> Result<Input> {
    match path {
        Some(p) => {
            let file = tokio::fs::File::open(p)
                .await
                .map_err(|e| GeoenrichError::io(p, e))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdin())),
    }
}

/// Create `path` for writing, or stdout when absent.
pub(crate) async fn open_output(path: Option<&Path>) -> Result<Output> {
    match path {
        Some(p) => {
            let file = tokio::fs::File::create(p)
                .await
                .map_err(|e| GeoenrichError::io(p, e))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Parse one JSON object per line into `tx`. Blank lines are skipped.
///
/// Stops quietly when the receiving side goes away. Returns the number of
/// records sent.
pub(crate) async fn read_records(
    reader: impl AsyncRead + Unpin,
    tx: mpsc::Sender<Record>,
) -> Result<usize> {
    let mut lines = BufReader::new(reader).lines();
    let mut line_no = 0usize;
    let mut sent = 0usize;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| GeoenrichError::io(PathBuf::from(STDIN), e))?
    {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: Record = serde_json::from_str(line)
            .map_err(|e| GeoenrichError::parse(format!("line {line_no}: {e}")))?;
        if tx.send(record).await.is_err() {
            break;
        }
        sent += 1;
    }

    Ok(sent)
}

/// Write every record from `rx` as one JSON line until the channel closes.
pub(crate) async fn write_records(
    mut rx: mpsc::Receiver<Record>,
    writer: impl AsyncWrite + Unpin,
) -> Result<usize> {
    let mut out = BufWriter::new(writer);
    let mut written = 0usize;
    let io_err = |e| GeoenrichError::io(PathBuf::from(STDOUT), e);

    while let Some(record) = rx.recv().await {
        let mut line = serde_json::to_vec(&record)
            .map_err(|e| GeoenrichError::parse(format!("serialize record: {e}")))?;
        line.push(b'\n');
        out.write_all(&line).await.map_err(io_err)?;
        written += 1;
    }

    out.flush().await.map_err(io_err)?;
    Ok(written)
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::JoinHandle;

enum WriteRequest {
    Write(Vec<u8>),
    Flush(mpsc::Sender<()>),
}

/// One background writer per file, draining its channel in FIFO order.
struct FileWriter {
    tx: mpsc::Sender<WriteRequest>,
    thread: Option<JoinHandle<()>>,
}

/// Serializes whole-file writes per path. Writes to the same path are applied
/// strictly in the order they were queued; different paths write independently.
#[derive(Default)]
pub struct WriteQueue {
    writers: HashMap<PathBuf, FileWriter>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a full overwrite of `path` with `bytes`.
    pub fn enqueue(&mut self, path: &Path, bytes: Vec<u8>) {
        if !self.writers.contains_key(path) {
            match spawn_writer(path) {
                Ok(writer) => {
                    self.writers.insert(path.to_path_buf(), writer);
                }
                Err(e) => {
                    log::error!("Failed to start writer for {}: {e}", path.display());
                    write_file(path, &bytes);
                    return;
                }
            }
        }

        let Some(writer) = self.writers.get(path) else {
            return;
        };
        if let Err(mpsc::SendError(request)) = writer.tx.send(WriteRequest::Write(bytes)) {
            // Writer thread is gone; write inline so the data still lands
            log::warn!("Writer for {} stopped, writing inline", path.display());
            if let WriteRequest::Write(bytes) = request {
                write_file(path, &bytes);
            }
            self.writers.remove(path);
        }
    }

    /// Block until every write queued so far has been applied.
    pub fn flush(&self) {
        let pending: Vec<mpsc::Receiver<()>> = self
            .writers
            .values()
            .filter_map(|writer| {
                let (done_tx, done_rx) = mpsc::channel();
                writer.tx.send(WriteRequest::Flush(done_tx)).ok().map(|_| done_rx)
            })
            .collect();
        for done in pending {
            let _ = done.recv();
        }
    }

    /// Number of files with a live writer.
    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        for (_, writer) in self.writers.drain() {
            let FileWriter { tx, thread } = writer;
            // Closing the channel lets the writer finish its backlog and exit
            drop(tx);
            if let Some(thread) = thread {
                let _ = thread.join();
            }
        }
    }
}

fn spawn_writer(path: &Path) -> std::io::Result<FileWriter> {
    let (tx, rx) = mpsc::channel::<WriteRequest>();
    let target = path.to_path_buf();
    let name = format!(
        "ledgerdb-writer:{}",
        path.file_name().unwrap_or_default().to_string_lossy()
    );
    let thread = std::thread::Builder::new().name(name).spawn(move || {
        for request in rx {
            match request {
                WriteRequest::Write(bytes) => write_file(&target, &bytes),
                WriteRequest::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    })?;
    Ok(FileWriter {
        tx,
        thread: Some(thread),
    })
}

/// Overwrite the file; failures are logged and the queue moves on.
fn write_file(path: &Path, bytes: &[u8]) {
    if let Err(e) = std::fs::write(path, bytes) {
        log::error!("Failed to write {}: {e}", path.display());
    }
}

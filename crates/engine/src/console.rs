//! Console capture.
//!
//! Job output is a first-class artifact: everything a job prints is
//! duplicated to the real stdout and to a per-job transcript that gets
//! persisted next to the job's result. Capture is a scoped resource — only
//! one job can hold it per process, which serializes job execution within a
//! process even when multiple processes run concurrently.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::warn;

// One capture per process at a time.
static SLOT: AsyncMutex<()> = AsyncMutex::const_new(());

/// An open capture session: a claimed process-wide slot plus the transcript
/// temp file. Dropping it releases the slot and removes the temp file on
/// every exit path, success or failure.
pub struct ConsoleCapture {
    transcript: Arc<Mutex<std::fs::File>>,
    temp: tempfile::NamedTempFile,
    _slot: MutexGuard<'static, ()>,
}

impl ConsoleCapture {
    /// Claim the process capture slot and open a fresh transcript.
    ///
    /// Awaits until any in-flight capture in this process finishes.
    pub async fn begin() -> std::io::Result<Self> {
        let slot = SLOT.lock().await;
        let temp = tempfile::NamedTempFile::new()?;
        let transcript = Arc::new(Mutex::new(temp.reopen()?));
        Ok(Self {
            transcript,
            temp,
            _slot: slot,
        })
    }

    /// Tee handle for the job to write through.
    pub fn console(&self) -> JobConsole {
        JobConsole {
            transcript: self.transcript.clone(),
        }
    }

    /// Path of the transcript file, for persisting before the capture drops.
    pub fn path(&self) -> &Path {
        self.temp.path()
    }
}

/// Writer handle handed to a running job.
///
/// Lines are written to the process stdout and appended to the capture's
/// transcript. Cloneable and cheap; all clones feed the same transcript.
#[derive(Clone)]
pub struct JobConsole {
    transcript: Arc<Mutex<std::fs::File>>,
}

impl JobConsole {
    /// Write one line to stdout and the transcript.
    pub fn line(&self, text: &str) {
        println!("{}", text);
        match self.transcript.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", text) {
                    warn!(error = %e, "failed to write job transcript");
                }
            }
            Err(_) => warn!("job transcript lock poisoned; dropping line"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn transcript_collects_lines() {
        let capture = ConsoleCapture::begin().await.unwrap();
        let console = capture.console();
        console.line("first");
        console.line("second");

        let text = std::fs::read_to_string(capture.path()).unwrap();
        assert_eq!(text, "first\nsecond\n");
    }

    #[tokio::test]
    async fn clones_share_one_transcript() {
        let capture = ConsoleCapture::begin().await.unwrap();
        let a = capture.console();
        let b = a.clone();
        a.line("from a");
        b.line("from b");

        let text = std::fs::read_to_string(capture.path()).unwrap();
        assert_eq!(text, "from a\nfrom b\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn capture_slot_serializes_jobs() {
        let first = ConsoleCapture::begin().await.unwrap();

        let second = tokio::spawn(async {
            let capture = ConsoleCapture::begin().await.unwrap();
            capture.console().line("second job");
        });

        // The second capture cannot start while the first is held.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        drop(first);
        second.await.unwrap();
    }

    #[tokio::test]
    async fn temp_file_removed_on_drop() {
        let path = {
            let capture = ConsoleCapture::begin().await.unwrap();
            capture.console().line("gone soon");
            capture.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}

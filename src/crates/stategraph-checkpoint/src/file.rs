//! Durable checkpoint storage on the local filesystem
//!
//! Each session gets one JSON-lines file under the base directory; every save
//! appends one line holding a full [`Checkpoint`]. The last line is the latest
//! checkpoint. A session therefore survives a process restart, which is what
//! makes interrupted sessions resumable hours or days later.
//!
//! A line cut short by a crash is skipped on read and truncated away before
//! the next append. One process is expected to write a directory at a time.

use crate::{
    checkpoint::{Checkpoint, CheckpointId, CheckpointMetadata, Pending},
    error::{CheckpointError, Result},
    traits::{CheckpointSaver, CheckpointStream},
};
use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Longest session id used verbatim as a file name
const MAX_PLAIN_ID: usize = 128;

/// Checkpoint saver writing one `.jsonl` file per session
#[derive(Debug, Clone)]
pub struct FileCheckpointSaver {
    base_dir: PathBuf,
    // Latest id of each session this saver has written; held across a whole
    // save so ids stay monotonic and appends never interleave.
    latest: Arc<Mutex<HashMap<String, CheckpointId>>>,
}

/// Parsed session file
struct SessionLog {
    checkpoints: Vec<Checkpoint>,
    /// Bytes up to the end of the last complete line
    complete_len: usize,
}

impl FileCheckpointSaver {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            latest: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// File name stem of a session
    ///
    /// Ids made of `[A-Za-z0-9._-]` are used as they are. Any other id keeps
    /// a readable prefix followed by `~` and a digest of the full id, so two
    /// distinct ids never share a file.
    fn file_stem(session_id: &str) -> String {
        let is_plain = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
        if !session_id.is_empty()
            && session_id.len() <= MAX_PLAIN_ID
            && !session_id.starts_with('.')
            && session_id.chars().all(is_plain)
        {
            return session_id.to_string();
        }

        let readable: String = session_id
            .chars()
            .filter(|c| !c.is_control())
            .map(|c| if is_plain(c) { c } else { '_' })
            .take(48)
            .collect();
        let digest = Sha256::digest(session_id.as_bytes());
        let hash: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
        format!("{}~{}", readable.trim_start_matches('.'), hash)
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.jsonl", Self::file_stem(session_id)))
    }

    async fn read_log(&self, session_id: &str) -> Result<Option<SessionLog>> {
        let path = self.session_path(session_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        parse_log(&path, session_id, &bytes).map(Some)
    }

    /// All checkpoints of the session, oldest first
    async fn read_all(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        Ok(self
            .read_log(session_id)
            .await?
            .map(|log| log.checkpoints)
            .unwrap_or_default())
    }

    /// Latest id on disk, cutting off a torn final line first
    async fn recover(&self, session_id: &str) -> Result<Option<CheckpointId>> {
        let path = self.session_path(session_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let log = parse_log(&path, session_id, &bytes)?;
        if log.complete_len < bytes.len() {
            tracing::warn!(
                session_id,
                path = %path.display(),
                dropped = bytes.len() - log.complete_len,
                "Truncating incomplete checkpoint line"
            );
            let file = OpenOptions::new().write(true).open(&path).await?;
            file.set_len(log.complete_len as u64).await?;
            file.sync_data().await?;
        }
        Ok(log.checkpoints.last().map(|c| c.id))
    }

    async fn append(&self, session_id: &str, line: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.session_path(session_id))
            .await?;
        file.write_all(line).await?;
        file.sync_data().await?;
        Ok(())
    }
}

/// Parse a session file
///
/// A final line without its newline is the remains of an interrupted write
/// and is left out; any other unreadable line is an error.
fn parse_log(path: &Path, session_id: &str, bytes: &[u8]) -> Result<SessionLog> {
    let mut checkpoints = Vec::new();
    let mut complete_len = 0;

    for (lineno, line) in bytes.split_inclusive(|b| *b == b'\n').enumerate() {
        let Some(content) = line.strip_suffix(b"\n") else {
            tracing::warn!(
                session_id,
                path = %path.display(),
                line = lineno + 1,
                "Skipping incomplete checkpoint line"
            );
            break;
        };
        complete_len += line.len();
        if content.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let checkpoint: Checkpoint = serde_json::from_slice(content).map_err(|err| {
            CheckpointError::Invalid(format!("{}:{}: {}", path.display(), lineno + 1, err))
        })?;
        if checkpoint.session_id != session_id {
            return Err(CheckpointError::Invalid(format!(
                "{} holds checkpoints of session {}",
                path.display(),
                checkpoint.session_id
            )));
        }
        checkpoints.push(checkpoint);
    }

    Ok(SessionLog {
        checkpoints,
        complete_len,
    })
}

#[async_trait]
impl CheckpointSaver for FileCheckpointSaver {
    async fn save(
        &self,
        session_id: &str,
        state: Value,
        pending: Pending,
        mut metadata: CheckpointMetadata,
    ) -> Result<CheckpointId> {
        let mut latest = self.latest.lock().await;
        fs::create_dir_all(&self.base_dir).await?;

        let parent = match latest.get(session_id) {
            Some(id) => Some(*id),
            None => self.recover(session_id).await?,
        };
        let id = parent.map_or(1, |p| p + 1);
        metadata.parent = parent;

        let checkpoint = Checkpoint::new(session_id, id, state, pending, metadata);
        let mut line = serde_json::to_vec(&checkpoint)?;
        line.push(b'\n');

        match self.append(session_id, &line).await {
            Ok(()) => {
                latest.insert(session_id.to_string(), id);
                Ok(id)
            }
            Err(err) => {
                // the file may now end in a partial line; rescan on the next save
                latest.remove(session_id);
                Err(err)
            }
        }
    }

    async fn get(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.read_all(session_id).await?.pop())
    }

    async fn load_version(
        &self,
        session_id: &str,
        id: CheckpointId,
    ) -> Result<Option<Checkpoint>> {
        Ok(self
            .read_all(session_id)
            .await?
            .into_iter()
            .find(|c| c.id == id))
    }

    async fn list(&self, session_id: &str, limit: Option<usize>) -> Result<CheckpointStream> {
        let results: Vec<Result<Checkpoint>> = self
            .read_all(session_id)
            .await?
            .into_iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .map(Ok)
            .collect();
        Ok(Box::pin(stream::iter(results)))
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut latest = self.latest.lock().await;
        latest.remove(session_id);
        match fs::remove_file(self.session_path(session_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointSource, InterruptWhen, PendingBranch};
    use futures::TryStreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip_survives_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let saver = FileCheckpointSaver::new(dir.path());

        saver
            .save(
                "s-1",
                json!({"topic": "rust"}),
                Pending::node("create"),
                CheckpointMetadata::new().with_source(CheckpointSource::Input),
            )
            .await
            .unwrap();
        let pending = Pending::Branches {
            branches: vec![PendingBranch {
                node: "interview".into(),
                state: json!({"analyst": "a"}),
            }],
            join: "report".into(),
        };
        saver
            .save(
                "s-1",
                json!({"topic": "rust", "approved": false}),
                pending.clone(),
                CheckpointMetadata::new().with_interrupt("feedback", InterruptWhen::Before),
            )
            .await
            .unwrap();

        // Fresh instance over the same directory, as after a restart.
        let reopened = FileCheckpointSaver::new(dir.path());
        let latest = reopened.load("s-1").await.unwrap();
        assert_eq!(latest.id, 2);
        assert_eq!(latest.pending, pending);
        assert_eq!(latest.metadata.parent, Some(1));
        assert_eq!(latest.state["approved"], json!(false));
        assert_eq!(latest, reopened.load("s-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_session() {
        let dir = tempfile::tempdir().unwrap();
        let saver = FileCheckpointSaver::new(dir.path().join("nested"));

        assert!(saver.get("missing").await.unwrap().is_none());
        assert!(saver.load("missing").await.unwrap_err().is_not_found());
        saver.delete_session("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let saver = FileCheckpointSaver::new(dir.path());
        for i in 0..4 {
            saver
                .save("s-1", json!({"i": i}), Pending::Done, CheckpointMetadata::new())
                .await
                .unwrap();
        }

        let history: Vec<Checkpoint> = saver
            .list("s-1", Some(3))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(history.iter().map(|c| c.id).collect::<Vec<_>>(), vec![4, 3, 2]);
        assert_eq!(
            saver.load_version("s-1", 1).await.unwrap().unwrap().state,
            json!({"i": 0})
        );

        saver.delete_session("s-1").await.unwrap();
        assert!(saver.get("s-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let saver = FileCheckpointSaver::new(dir.path());
        std::fs::write(dir.path().join("bad.jsonl"), "{not json}\n").unwrap();

        let err = saver.load("bad").await.unwrap_err();
        assert!(matches!(err, CheckpointError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_torn_final_line_is_skipped_then_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let saver = FileCheckpointSaver::new(dir.path());
        saver
            .save("s-1", json!({"i": 0}), Pending::node("a"), CheckpointMetadata::new())
            .await
            .unwrap();

        // a crash mid-append leaves half a line, cut inside a multi-byte char
        let path = dir.path().join("s-1.jsonl");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(b"{\"session_id\":\"s-1\",\"id\":2,\"state\":{\"note\":\"caf\xc3");
        std::fs::write(&path, &bytes).unwrap();

        let reopened = FileCheckpointSaver::new(dir.path());
        assert_eq!(reopened.load("s-1").await.unwrap().id, 1);

        let id = reopened
            .save("s-1", json!({"i": 1}), Pending::Done, CheckpointMetadata::new())
            .await
            .unwrap();
        assert_eq!(id, 2);

        let history: Vec<Checkpoint> = FileCheckpointSaver::new(dir.path())
            .list("s-1", None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(history.iter().map(|c| c.id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(history[0].metadata.parent, Some(1));
        assert_eq!(history[0].state, json!({"i": 1}));
        assert!(std::fs::read(&path).unwrap().ends_with(b"\n"));
    }

    #[tokio::test]
    async fn test_ids_continue_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let first = FileCheckpointSaver::new(dir.path());
        for i in 0..3 {
            first
                .save("s-1", json!({"i": i}), Pending::node("a"), CheckpointMetadata::new())
                .await
                .unwrap();
        }

        let second = FileCheckpointSaver::new(dir.path());
        let id = second
            .save("s-1", json!({"i": 3}), Pending::Done, CheckpointMetadata::new())
            .await
            .unwrap();
        assert_eq!(id, 4);
        assert_eq!(second.load("s-1").await.unwrap().metadata.parent, Some(3));

        second.delete_session("s-1").await.unwrap();
        let restarted = second
            .save("s-1", json!({}), Pending::Done, CheckpointMetadata::new())
            .await
            .unwrap();
        assert_eq!(restarted, 1);
    }

    #[tokio::test]
    async fn test_similar_session_ids_use_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let saver = FileCheckpointSaver::new(dir.path());
        let ids = ["a/b", "a_b", "a:b", "..", ""];
        for (i, id) in ids.iter().enumerate() {
            saver
                .save(id, json!({"i": i}), Pending::Done, CheckpointMetadata::new())
                .await
                .unwrap();
        }

        for (i, id) in ids.iter().enumerate() {
            let latest = saver.load(id).await.unwrap();
            assert_eq!(latest.id, 1);
            assert_eq!(latest.state, json!({"i": i}));
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), ids.len());
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(FileCheckpointSaver::file_stem("a_b"), "a_b");
        let escaped = FileCheckpointSaver::file_stem("a/b");
        assert!(escaped.starts_with("a_b~"));
        assert_ne!(escaped, FileCheckpointSaver::file_stem("a:b"));
        assert!(!FileCheckpointSaver::file_stem("..").starts_with('.'));
        assert_eq!(FileCheckpointSaver::file_stem("a/b"), escaped);
    }
}

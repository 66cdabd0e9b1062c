//! JSON-lines outcome log.
use std::path::Path;

use tokio::{
    fs::File,
    io::{AsyncWrite, AsyncWriteExt, BufWriter},
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::{error::Result, outcome::Outcome};

/// Writes every outcome received on `rx` as one JSON object per line.
///
/// Returns the number of lines written once every sender is gone.
pub async fn write_outcomes<W>(w: W, mut rx: UnboundedReceiver<Outcome>) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(w);
    let mut lines = 0;
    while let Some(outcome) = rx.recv().await {
        let line = serde_json::to_vec(&outcome)?;
        writer.write_all(&line).await?;
        writer.write_all(b"\n").await?;
        lines += 1;
    }
    writer.flush().await?;
    Ok(lines)
}

/// Creates `path` and spawns a task streaming outcomes into it.
///
/// Hand the sender to
/// [`Orchestrator::with_outcome_log`](crate::Orchestrator::with_outcome_log)
/// and await the handle after the run to make sure the file is complete.
pub async fn outcome_log(path: &Path) -> Result<(UnboundedSender<Outcome>, JoinHandle<Result<u64>>)> {
    let file = File::create(path).await?;
    let (tx, rx) = mpsc::unbounded_channel();
    Ok((tx, tokio::spawn(write_outcomes(file, rx))))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::outcome::OutcomeKind;

    fn outcome(seq: u64) -> Outcome {
        Outcome {
            target: 0,
            seq,
            issued_at: Duration::from_millis(10 * seq),
            completed_at: Duration::from_millis(10 * seq + 5),
            kind: OutcomeKind::Success,
            status: Some(200),
            bytes: 3,
            error: None,
            attempts: 1,
        }
    }

    #[tokio::test]
    async fn one_line_per_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outcomes.jsonl");

        let (tx, writer) = outcome_log(&path).await.unwrap();
        for seq in 0..3 {
            tx.send(outcome(seq)).unwrap();
        }
        drop(tx);
        assert_eq!(writer.await.unwrap().unwrap(), 3);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> =
            content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2]["seq"], 2);
        assert_eq!(lines[2]["kind"], "success");
        assert_eq!(lines[2]["status"], 200);
    }
}

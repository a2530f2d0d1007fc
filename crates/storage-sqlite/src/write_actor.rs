//! A single-writer actor serializing all SQLite writes behind one channel,
//! so concurrent callers never collide on SQLite's single-writer lock. Reads
//! go straight through the pool; only writes funnel through here.

use diesel::SqliteConnection;
use tokio::sync::{mpsc, oneshot};

use crate::db::SqlitePool;
use crate::errors::{Result, StorageError};

type Job = Box<dyn FnOnce(&mut SqliteConnection) -> Box<dyn std::any::Any + Send> + Send + 'static>;

struct WriteJob {
    run: Job,
    reply: oneshot::Sender<Box<dyn std::any::Any + Send>>,
}

/// A cheap, cloneable handle to the write actor's channel.
#[derive(Clone)]
pub struct WriteHandle {
    sender: mpsc::UnboundedSender<WriteJob>,
}

impl WriteHandle {
    /// Runs `job` on the single writer connection and awaits its result.
    /// The closure is boxed and moved onto the writer task, so it must own
    /// everything it touches.
    pub async fn exec<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let boxed_job: Job = Box::new(move |conn| Box::new(job(conn)));
        self.sender
            .send(WriteJob { run: boxed_job, reply: reply_tx })
            .map_err(|_| StorageError::WriterUnavailable("writer task has shut down".into()))?;
        let boxed_result = reply_rx
            .await
            .map_err(|_| StorageError::WriterUnavailable("writer task dropped the reply channel".into()))?;
        *boxed_result
            .downcast::<Result<T>>()
            .expect("write actor result type mismatch")
    }
}

/// Spawns the writer task on the current tokio runtime and returns a handle
/// to it. The task owns one pooled connection for its entire lifetime.
pub fn spawn_writer(pool: SqlitePool) -> WriteHandle {
    let (sender, mut receiver) = mpsc::unbounded_channel::<WriteJob>();

    tokio::spawn(async move {
        let mut conn = match pool.get() {
            Ok(conn) => conn,
            Err(err) => {
                log::error!("write actor failed to acquire its connection: {err}");
                return;
            }
        };
        while let Some(job) = receiver.recv().await {
            let result = (job.run)(&mut conn);
            let _ = job.reply.send(result);
        }
    });

    WriteHandle { sender }
}

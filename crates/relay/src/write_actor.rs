//! A single-writer actor serializing all relay writes behind one channel.
//! Because every push transaction for every workspace runs through this one
//! connection, per-workspace `serverSeq` allocation is trivially
//! serializable — no additional per-workspace lock is needed (§5).

use diesel::SqliteConnection;
use tokio::sync::{mpsc, oneshot};

use crate::db::SqlitePool;
use crate::errors::{RelayError, Result};

type Job = Box<dyn FnOnce(&mut SqliteConnection) -> Box<dyn std::any::Any + Send> + Send + 'static>;

struct WriteJob {
    run: Job,
    reply: oneshot::Sender<Box<dyn std::any::Any + Send>>,
}

#[derive(Clone)]
pub struct WriteHandle {
    sender: mpsc::UnboundedSender<WriteJob>,
}

impl WriteHandle {
    pub async fn exec<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let boxed_job: Job = Box::new(move |conn| Box::new(job(conn)));
        self.sender
            .send(WriteJob { run: boxed_job, reply: reply_tx })
            .map_err(|_| RelayError::WriterUnavailable("writer task has shut down".into()))?;
        let boxed_result = reply_rx
            .await
            .map_err(|_| RelayError::WriterUnavailable("writer task dropped the reply channel".into()))?;
        *boxed_result
            .downcast::<Result<T>>()
            .expect("write actor result type mismatch")
    }
}

pub fn spawn_writer(pool: SqlitePool) -> WriteHandle {
    let (sender, mut receiver) = mpsc::unbounded_channel::<WriteJob>();

    tokio::spawn(async move {
        let mut conn = match pool.get() {
            Ok(conn) => conn,
            Err(err) => {
                tracing::error!("relay write actor failed to acquire its connection: {err}");
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

//! Single writer for the database file.
//!
//! Every write job runs on one dedicated thread inside its own transaction: the job's `Ok`
//! commits, an `Err` rolls back, and the connection returns to the pool on every exit path.

use std::any::Any;

use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use tokio::sync::{mpsc, oneshot};

use plaasjapie_core::{Error, Result};

use super::{get_connection, DbPool};
use crate::errors::StorageError;

type JobOutput = Box<dyn Any + Send>;
type Job = Box<dyn FnOnce(&mut SqliteConnection) -> Result<JobOutput> + Send>;

struct WriteRequest {
    job: Job,
    reply: oneshot::Sender<Result<JobOutput>>,
}

/// Cloneable handle that submits jobs to the writer thread.
#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::UnboundedSender<WriteRequest>,
}

impl WriteHandle {
    /// Runs `job` in a transaction on the writer thread and waits for its result.
    pub async fn exec<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| job(conn).map(|value| Box::new(value) as JobOutput));
        self.tx
            .send(WriteRequest {
                job,
                reply: reply_tx,
            })
            .map_err(|_| StorageError::WriterClosed)?;

        let output = reply_rx.await.map_err(|_| StorageError::WriterClosed)??;
        output
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| Error::database("Writer returned an unexpected result type"))
    }
}

enum TxError {
    Job(Error),
    Diesel(diesel::result::Error),
}

impl From<diesel::result::Error> for TxError {
    fn from(err: diesel::result::Error) -> Self {
        TxError::Diesel(err)
    }
}

fn run_job(pool: &DbPool, job: Job) -> Result<JobOutput> {
    let mut pooled = get_connection(pool)?;
    let conn: &mut SqliteConnection = &mut pooled;
    conn.transaction::<_, TxError, _>(|tx| job(tx).map_err(TxError::Job))
        .map_err(|err| match err {
            TxError::Job(err) => err,
            TxError::Diesel(err) => StorageError::from(err).into(),
        })
}

/// Starts the writer thread. It exits once every handle has been dropped.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriteRequest>();
    std::thread::spawn(move || {
        while let Some(request) = rx.blocking_recv() {
            let result = run_job(&pool, request.job);
            if request.reply.send(result).is_err() {
                log::debug!("[OfflineCache] Write result dropped; caller went away");
            }
        }
        log::debug!("[OfflineCache] Writer stopped");
    });
    WriteHandle { tx }
}

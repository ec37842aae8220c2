use relay_common::error::{QueueError, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("task store error: {0}")]
    Store(#[from] StoreError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};

use crate::cache::InputHash;

use super::{engine::CalculationError, generation::Generation};

/// Why a load produced no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadFailure {
    /// The engine rejected the data. Shown to the user.
    #[error(transparent)]
    Calculation(#[from] CalculationError),
    /// The input type could not be hashed. A bug, never user data.
    #[error("calculation input could not be hashed: {0}")]
    Programmer(String),
    /// The background task ended before settling.
    #[error("calculation was cancelled")]
    Cancelled,
}

/// A freshly computed result awaiting its single store write.
#[derive(Debug)]
pub struct FreshResult<T> {
    pub result: T,
    pub input_hash: InputHash,
    committed: AtomicBool,
}

impl<T> FreshResult<T> {
    pub fn new(result: T, input_hash: InputHash) -> Self {
        Self {
            result,
            input_hash,
            committed: AtomicBool::new(false),
        }
    }

    /// True exactly once per value: the caller that wins performs the write.
    pub(crate) fn claim_commit(&self) -> bool {
        !self.committed.swap(true, Ordering::SeqCst)
    }

    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::SeqCst)
    }
}

/// Settled value of a load.
#[derive(Debug)]
pub enum Resolution<T> {
    /// The collected input hashes to the URL's `cacheHash`; the stored
    /// entry is valid and the engine was not invoked.
    CacheAuthoritative { input_hash: InputHash },
    Fresh(FreshResult<T>),
}

#[derive(Debug)]
pub enum DeferredState<T> {
    Pending,
    Resolved(Arc<Resolution<T>>),
    Failed(LoadFailure),
}

impl<T> Clone for DeferredState<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Pending => Self::Pending,
            Self::Resolved(resolution) => Self::Resolved(Arc::clone(resolution)),
            Self::Failed(failure) => Self::Failed(failure.clone()),
        }
    }
}

impl<T> DeferredState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Handle on a calculation running in the background.
///
/// Dropping the handle aborts the task; a value that would have arrived later
/// is never observed.
pub struct Deferred<T> {
    generation: Generation,
    state: watch::Receiver<DeferredState<T>>,
    _task: AbortOnDrop,
}

impl<T: Send + Sync + 'static> Deferred<T> {
    pub fn spawn<F>(generation: Generation, work: F) -> Self
    where
        F: Future<Output = DeferredState<T>> + Send + 'static,
    {
        let (sender, state) = watch::channel(DeferredState::Pending);
        let task = tokio::spawn(async move {
            let settled = work.await;
            let _ = sender.send(settled);
        });
        Self {
            generation,
            state,
            _task: AbortOnDrop(task),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Current state without waiting.
    pub fn state(&self) -> DeferredState<T> {
        self.state.borrow().clone()
    }

    /// Wait until the load settles.
    pub async fn settled(&mut self) -> DeferredState<T> {
        match self.state.wait_for(|state| !state.is_pending()).await {
            Ok(state) => state.clone(),
            Err(_) => DeferredState::Failed(LoadFailure::Cancelled),
        }
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

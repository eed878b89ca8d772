// Resolve-once cell shared by concurrent callers

use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::error::{AppError, AppResult};

/// Async value computed at most once. Concurrent first callers wait on the
/// same initialization, and a failure is cached just like a success.
pub struct Resolved<T> {
    cell: OnceCell<Result<T, Arc<AppError>>>,
}

impl<T: Clone> Resolved<T> {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    pub async fn get_or_resolve<F, Fut>(&self, init: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let result = self
            .cell
            .get_or_init(|| async move { init().await.map_err(Arc::new) })
            .await;

        match result {
            Ok(value) => Ok(value.clone()),
            Err(e) => Err(AppError::Shared(e.clone())),
        }
    }

    #[cfg(test)]
    pub fn is_resolved(&self) -> bool {
        self.cell.initialized()
    }
}

impl<T: Clone> Default for Resolved<T> {
    fn default() -> Self {
        Self::new()
    }
}

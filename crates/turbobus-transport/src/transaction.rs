//! Runs work inside an optional transaction.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::{TransactionConfig, TransactionManager, TransportError, TransportResult};

/// Begins, commits and rolls back around a unit of work.
#[derive(Debug, Clone, Default)]
pub struct TransactionTemplate {
    manager: Option<Arc<dyn TransactionManager>>,
    config: Option<TransactionConfig>,
}

impl TransactionTemplate {
    /// Creates a template; without a transacted config work runs directly.
    pub fn new(
        manager: Option<Arc<dyn TransactionManager>>,
        config: Option<TransactionConfig>,
    ) -> Self {
        Self { manager, config }
    }

    /// Whether work runs inside a transaction.
    pub fn is_transacted(&self) -> bool {
        self.config.is_some_and(|c| c.is_transacted())
    }

    /// Runs `work`, committing on success and rolling back on failure.
    pub async fn execute<F, Fut, T>(&self, work: F) -> TransportResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let Some(config) = self.config.filter(TransactionConfig::is_transacted) else {
            return work().await;
        };
        let Some(manager) = &self.manager else {
            return Err(TransportError::Transaction(
                "transacted work requires a transaction manager".to_string(),
            ));
        };

        let transaction = manager.begin(&config).await?;
        match work().await {
            Ok(value) => {
                transaction.commit().await?;
                debug!("transaction committed");
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = transaction.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Recorder {
        begun: AtomicUsize,
        committed: Arc<AtomicUsize>,
        rolled_back: Arc<AtomicUsize>,
    }

    #[derive(Debug)]
    struct Tx {
        committed: Arc<AtomicUsize>,
        rolled_back: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transaction for Tx {
        async fn commit(self: Box<Self>) -> TransportResult<()> {
            self.committed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> TransportResult<()> {
            self.rolled_back.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl TransactionManager for Recorder {
        async fn begin(&self, _config: &TransactionConfig) -> TransportResult<Box<dyn Transaction>> {
            self.begun.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Tx {
                committed: Arc::clone(&self.committed),
                rolled_back: Arc::clone(&self.rolled_back),
            }))
        }
    }

    #[tokio::test]
    async fn test_untransacted_runs_directly() {
        let template = TransactionTemplate::default();
        assert!(!template.is_transacted());
        assert_eq!(template.execute(|| async { Ok(7) }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_commit_and_rollback() {
        let manager = Arc::new(Recorder::default());
        let template = TransactionTemplate::new(
            Some(manager.clone()),
            Some(TransactionConfig::always_begin()),
        );

        template.execute(|| async { Ok(()) }).await.unwrap();
        let failed: TransportResult<()> = template
            .execute(|| async { Err(TransportError::ReceiveFailed("boom".into())) })
            .await;

        assert!(failed.is_err());
        assert_eq!(manager.begun.load(Ordering::SeqCst), 2);
        assert_eq!(manager.committed.load(Ordering::SeqCst), 1);
        assert_eq!(manager.rolled_back.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transacted_without_manager_fails() {
        let template = TransactionTemplate::new(None, Some(TransactionConfig::always_begin()));
        let result = template.execute(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(TransportError::Transaction(_))));
    }
}

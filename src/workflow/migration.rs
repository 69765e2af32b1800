//! Migration functions and the db-snapshot hook.

use crate::continuation::Continuation;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use stillwater::effect::BoxedEffect;
use thiserror::Error;
use tracing::{debug, warn};

/// Maps a previous version's continuation to one valid for this version.
///
/// The effect runs once, on resume, against the workflow environment.
/// The resulting state must resolve against the new chart.
pub type MigrationFn<C, Env> = Arc<
    dyn Fn(Continuation<Value>) -> BoxedEffect<Continuation<C>, MigrationError, Env>
        + Send
        + Sync,
>;

/// Failure of a migration function.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MigrationError {
    #[error("Migration failed: {0}")]
    Failed(String),

    #[error("Previous context cannot be read: {0}")]
    UnreadableContext(String),
}

/// Failure to persist a db projection.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Persisting db snapshot failed: {0}")]
pub struct PersistError(pub String);

/// Keeps an external projection of the context in sync across versions.
///
/// On resume the projection of the migrated context is compared with the
/// value embedded in it; a difference is persisted in the background and
/// stamped back into the context.
pub trait DbSnapshot<C>: Send + Sync {
    /// Projection of the context as this version stores it.
    fn project(&self, context: &C) -> Value;

    /// Projection last stamped into the context, if any.
    fn embedded(&self, context: &C) -> Option<Value>;

    /// Record `snapshot` as the embedded projection.
    fn stamp(&self, context: &mut C, snapshot: Value);

    /// Store the projection. Failures are logged, never propagated.
    fn persist(&self, snapshot: Value) -> BoxFuture<'static, Result<(), PersistError>>;
}

/// Bring the embedded projection up to date, persisting it if it changed.
///
/// Must be called from within a tokio runtime; persistence is spawned and
/// not awaited.
pub(crate) fn sync_db_snapshot<C>(hook: &dyn DbSnapshot<C>, context: &mut C) {
    let projected = hook.project(context);
    if hook.embedded(context).as_ref() == Some(&projected) {
        debug!("Db snapshot unchanged");
        return;
    }
    let persist = hook.persist(projected.clone());
    tokio::spawn(async move {
        if let Err(err) = persist.await {
            warn!(%err, "Db snapshot was not persisted");
        }
    });
    hook.stamp(context, projected);
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Account {
        balance: u64,
        db: Option<Value>,
    }

    struct BalanceHook {
        persisted: Arc<Mutex<Vec<Value>>>,
        fail: bool,
    }

    impl DbSnapshot<Account> for BalanceHook {
        fn project(&self, context: &Account) -> Value {
            json!({ "balance": context.balance })
        }

        fn embedded(&self, context: &Account) -> Option<Value> {
            context.db.clone()
        }

        fn stamp(&self, context: &mut Account, snapshot: Value) {
            context.db = Some(snapshot);
        }

        fn persist(&self, snapshot: Value) -> BoxFuture<'static, Result<(), PersistError>> {
            let persisted = Arc::clone(&self.persisted);
            let fail = self.fail;
            async move {
                if fail {
                    return Err(PersistError("database unavailable".to_string()));
                }
                persisted.lock().unwrap().push(snapshot);
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn changed_projections_are_persisted_and_stamped() {
        let persisted = Arc::new(Mutex::new(Vec::new()));
        let hook = BalanceHook {
            persisted: Arc::clone(&persisted),
            fail: false,
        };
        let mut account = Account { balance: 10, db: None };

        sync_db_snapshot(&hook, &mut account);
        assert_eq!(account.db, Some(json!({"balance": 10})));

        tokio::task::yield_now().await;
        assert_eq!(*persisted.lock().unwrap(), vec![json!({"balance": 10})]);
    }

    #[tokio::test]
    async fn unchanged_projections_are_left_alone() {
        let persisted = Arc::new(Mutex::new(Vec::new()));
        let hook = BalanceHook {
            persisted: Arc::clone(&persisted),
            fail: false,
        };
        let mut account = Account {
            balance: 10,
            db: Some(json!({"balance": 10})),
        };

        sync_db_snapshot(&hook, &mut account);
        tokio::task::yield_now().await;
        assert!(persisted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn persistence_failures_do_not_block_the_stamp() {
        let hook = BalanceHook {
            persisted: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        };
        let mut account = Account { balance: 3, db: None };

        sync_db_snapshot(&hook, &mut account);
        tokio::task::yield_now().await;
        assert_eq!(account.db, Some(json!({"balance": 3})));
    }
}

use sea_orm::{
    ConnectionTrait, DatabaseTransaction, DbBackend, Statement, TransactionTrait, Value,
};

use crate::config::AdvisoryLockStrategy;
use crate::error::ClosureTableError;

/// A transaction that, on PostgreSQL, also holds the tree's advisory lock.
///
/// The lock is transaction-scoped (`pg_advisory_xact_lock`), so it is released
/// by whichever of commit or rollback ends the transaction.
pub struct LockedTransaction {
    txn: DatabaseTransaction,
    key: Option<String>,
}

impl LockedTransaction {
    pub async fn acquire<C>(
        strategy: &AdvisoryLockStrategy,
        db: &C,
    ) -> Result<Self, ClosureTableError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let key = match (db.get_database_backend(), strategy) {
            (DbBackend::Postgres, AdvisoryLockStrategy::Namespaced(key)) => {
                Some(key.as_str().to_owned())
            }
            _ => None,
        };

        let txn = db.begin().await?;

        if let Some(ref key) = key {
            if let Err(err) = acquire_lock(&txn, key).await {
                let _ = txn.rollback().await;
                return Err(err);
            }
            tracing::trace!(lock = %key, "advisory lock acquired");
        }

        Ok(Self { txn, key })
    }

    pub fn connection(&self) -> &DatabaseTransaction {
        &self.txn
    }

    pub fn is_locked(&self) -> bool {
        self.key.is_some()
    }

    pub async fn commit(self) -> Result<(), ClosureTableError> {
        self.txn.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), ClosureTableError> {
        self.txn.rollback().await?;
        Ok(())
    }
}

async fn acquire_lock(txn: &DatabaseTransaction, key: &str) -> Result<(), ClosureTableError> {
    txn.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT pg_advisory_xact_lock(hashtext($1))",
        vec![Value::from(key)],
    ))
    .await?;
    Ok(())
}

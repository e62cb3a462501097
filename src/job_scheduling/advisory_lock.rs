//! Provider-keyed advisory lock
//!
//! A row in `provider_locks` marks a provider as busy. Every acquisition gets
//! its own token, so only the holder that took the lock can release it. Locks
//! carry an expiry and a stale lock can be taken over, which bounds how long a
//! crashed holder can starve a provider.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::entities::{prelude::ProviderLocks, provider_locks};

#[derive(Clone)]
pub struct ProviderLock {
    connection: Arc<DatabaseConnection>,
}

/// Proof of holding a provider lock.
///
/// Release explicitly with [`ProviderLockGuard::release`]; a guard dropped
/// without release (panic, dropped future) schedules the release on the
/// current runtime.
pub struct ProviderLockGuard {
    key: String,
    token: String,
    connection: Arc<DatabaseConnection>,
    released: bool,
}

impl ProviderLock {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    /// Try to take the lock for `key`; `None` when another holder has it
    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<ProviderLockGuard>> {
        self.try_acquire_at(key, ttl, Utc::now()).await
    }

    pub async fn try_acquire_at(
        &self,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<ProviderLockGuard>> {
        ProviderLocks::delete_many()
            .filter(provider_locks::Column::Key.eq(key))
            .filter(provider_locks::Column::ExpiresAt.lte(now))
            .exec(&*self.connection)
            .await?;

        let token = Uuid::new_v4().to_string();
        let active_model = provider_locks::ActiveModel {
            key: Set(key.to_string()),
            holder: Set(token.clone()),
            acquired_at: Set(now),
            expires_at: Set(now + chrono::Duration::from_std(ttl)?),
        };

        ProviderLocks::insert(active_model)
            .on_conflict(
                OnConflict::column(provider_locks::Column::Key)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&*self.connection)
            .await?;

        // The stored holder decides, whatever the backend reported as affected
        let holder = ProviderLocks::find_by_id(key.to_string())
            .one(&*self.connection)
            .await?
            .map(|model| model.holder);

        if holder.as_deref() == Some(token.as_str()) {
            debug!("Acquired provider lock {}", key);
            Ok(Some(ProviderLockGuard {
                key: key.to_string(),
                token,
                connection: self.connection.clone(),
                released: false,
            }))
        } else {
            debug!("Provider lock {} is held elsewhere", key);
            Ok(None)
        }
    }

    pub async fn is_locked(&self, key: &str) -> Result<bool> {
        Ok(ProviderLocks::find_by_id(key.to_string())
            .one(&*self.connection)
            .await?
            .is_some_and(|model| model.expires_at > Utc::now()))
    }
}

impl ProviderLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        delete_lock(&self.connection, &self.key, &self.token).await
    }
}

impl Drop for ProviderLockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("Provider lock {} dropped outside a runtime; it will expire", self.key);
            return;
        };

        let connection = self.connection.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(e) = delete_lock(&connection, &key, &token).await {
                warn!("Failed to release dropped provider lock {}: {}", key, e);
            }
        });
    }
}

async fn delete_lock(connection: &DatabaseConnection, key: &str, token: &str) -> Result<()> {
    ProviderLocks::delete_many()
        .filter(provider_locks::Column::Key.eq(key))
        .filter(provider_locks::Column::Holder.eq(token))
        .exec(connection)
        .await?;
    debug!("Released provider lock {}", key);
    Ok(())
}

/// Run `f` while holding the lock for `key`; the lock is released on every
/// exit. Returns `Ok(None)` without running `f` when the lock is held.
pub async fn with_provider_lock<F, Fut, T>(
    lock: &ProviderLock,
    key: &str,
    ttl: Duration,
    f: F,
) -> Result<Option<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let Some(guard) = lock.try_acquire(key, ttl).await? else {
        return Ok(None);
    };

    let result = f().await;

    if let Err(e) = guard.release().await {
        warn!("Failed to release provider lock {}: {}", key, e);
    }

    result.map(Some)
}

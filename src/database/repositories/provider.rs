//! SeaORM-based provider roster repository
//!
//! The providers table is maintained by the external provider registry; this
//! service only reads it.

use anyhow::Result;
use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;

use crate::entities::{prelude::Providers, providers};
use crate::providers::{Provider, ProviderRoster};

/// SeaORM-based repository for monitored providers
#[derive(Clone)]
pub struct ProviderSeaOrmRepository {
    connection: Arc<DatabaseConnection>,
}

impl ProviderSeaOrmRepository {
    /// Create a new repository instance
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    /// Find a provider by address
    pub async fn find_by_address(&self, address: &str) -> Result<Option<Provider>> {
        let model = Providers::find_by_id(address.to_string())
            .one(&*self.connection)
            .await?;
        Ok(model.map(Self::to_provider))
    }

    /// Active providers ordered by address
    pub async fn list_active(&self, approved_only: bool) -> Result<Vec<Provider>> {
        let mut query = Providers::find().filter(providers::Column::IsActive.eq(true));
        if approved_only {
            query = query.filter(providers::Column::IsApproved.eq(true));
        }

        let models = query
            .order_by_asc(providers::Column::Address)
            .all(&*self.connection)
            .await?;
        Ok(models.into_iter().map(Self::to_provider).collect())
    }

    fn to_provider(model: providers::Model) -> Provider {
        Provider {
            address: model.address,
            service_url: model.service_url,
            active: model.is_active,
            approved: model.is_approved,
        }
    }
}

#[async_trait]
impl ProviderRoster for ProviderSeaOrmRepository {
    async fn list_active_providers(&self, approved_only: bool) -> Result<Vec<Provider>> {
        self.list_active(approved_only).await
    }

    async fn get_provider(&self, address: &str) -> Result<Option<Provider>> {
        self.find_by_address(address).await
    }
}

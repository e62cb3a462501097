use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "queue_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    #[sea_orm(column_type = "Text")]
    pub data: String,
    pub state: String,
    pub singleton_key: Option<String>,
    pub retry_limit: i32,
    pub retry_count: i32,
    pub start_after: DateTimeUtc,
    pub created_on: DateTimeUtc,
    pub started_on: Option<DateTimeUtc>,
    pub completed_on: Option<DateTimeUtc>,
    #[sea_orm(column_type = "Text", nullable)]
    pub output: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

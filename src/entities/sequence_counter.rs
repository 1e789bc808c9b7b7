use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Named monotonic counter. Order numbers come from an atomic
/// find-and-increment on these rows, never from array lengths or timestamps.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sequence_counters")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,
    pub value: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

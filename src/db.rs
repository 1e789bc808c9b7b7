use crate::config::AppConfig;
use crate::errors::ServiceError;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool from the application configuration.
pub async fn establish_connection(config: &AppConfig) -> Result<DbPool, ServiceError> {
    let mut options = ConnectOptions::new(config.database_url.clone());
    options
        .max_connections(config.db_max_connections)
        .connect_timeout(Duration::from_secs(config.db_connect_timeout_secs))
        .sqlx_logging(false);

    let pool = Database::connect(options).await?;
    info!("database connection established");
    Ok(pool)
}

/// Creates the schema from the entity definitions. Used for sqlite deployments
/// and in integration tests; Postgres deployments manage schema externally.
pub async fn bootstrap_schema(db: &DatabaseConnection) -> Result<(), ServiceError> {
    use sea_orm::{sea_query::Index, ConnectionTrait, EntityName, Schema};

    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let statements = vec![
        schema.create_table_from_entity(crate::entities::customer::Entity),
        schema.create_table_from_entity(crate::entities::product::Entity),
        schema.create_table_from_entity(crate::entities::cart::Entity),
        schema.create_table_from_entity(crate::entities::cart_item::Entity),
        schema.create_table_from_entity(crate::entities::coupon::Entity),
        schema.create_table_from_entity(crate::entities::coupon_redemption::Entity),
        schema.create_table_from_entity(crate::entities::order::Entity),
        schema.create_table_from_entity(crate::entities::order_item::Entity),
        schema.create_table_from_entity(crate::entities::order_status_history::Entity),
        schema.create_table_from_entity(crate::entities::delivery_partner::Entity),
        schema.create_table_from_entity(crate::entities::sequence_counter::Entity),
    ];

    for mut statement in statements {
        db.execute(backend.build(statement.if_not_exists())).await?;
    }

    // Composite uniques the entity derive cannot express: one cart per
    // identity, one line per product within a cart.
    let indexes = vec![
        Index::create()
            .name("uq_carts_customer")
            .table(crate::entities::cart::Entity.table_ref())
            .col(crate::entities::cart::Column::CustomerId)
            .col(crate::entities::cart::Column::CustomerKind)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("uq_cart_items_cart_product")
            .table(crate::entities::cart_item::Entity.table_ref())
            .col(crate::entities::cart_item::Column::CartId)
            .col(crate::entities::cart_item::Column::ProductId)
            .unique()
            .if_not_exists()
            .to_owned(),
    ];
    for statement in indexes {
        db.execute(backend.build(&statement)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Guards the sqlite startup path: every entity, including the decimal
    // money columns and the composite indexes, must build on the sqlite
    // backend without erroring.
    #[tokio::test]
    async fn schema_bootstraps_on_sqlite() {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1).sqlx_logging(false);
        let db = Database::connect(options).await.unwrap();

        bootstrap_schema(&db).await.unwrap();
        // Rerunning must be a no-op, not a duplicate-table error.
        bootstrap_schema(&db).await.unwrap();
    }
}

use crate::{
    entities::{product, Product},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::debug;
use uuid::Uuid;

/// Authoritative per-product stock ledger.
///
/// `reserve` is a single conditional decrement rather than a read-modify-write,
/// so concurrent checkouts for the last units serialize at the database row.
/// Both operations accept any connection so callers can run them inside their
/// own transaction and get all-or-nothing behavior across multiple lines.
pub struct StockLedger;

impl StockLedger {
    /// Atomically decrements stock, failing without side effects when fewer
    /// than `quantity` units remain.
    pub async fn reserve<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Reservation quantity must be positive".into(),
            ));
        }

        let result = Product::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).sub(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::StockQuantity.gte(quantity))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::InsufficientStock {
                product_id,
                requested: quantity,
            });
        }

        Self::refresh_in_stock(conn, product_id).await?;
        debug!(%product_id, quantity, "stock reserved");
        Ok(())
    }

    /// Unconditionally returns stock, e.g. on cancellation or refund. Not
    /// bounded by any configured maximum: a product's cap may have shrunk
    /// since the order existed.
    pub async fn release<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Release quantity must be positive".into(),
            ));
        }

        Product::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).add(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .exec(conn)
            .await?;

        Self::refresh_in_stock(conn, product_id).await?;
        debug!(%product_id, quantity, "stock released");
        Ok(())
    }

    /// Recomputes the derived `in_stock` flag from the counter.
    async fn refresh_in_stock<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
    ) -> Result<(), ServiceError> {
        Product::update_many()
            .col_expr(
                product::Column::InStock,
                Expr::col(product::Column::StockQuantity).gt(0),
            )
            .filter(product::Column::Id.eq(product_id))
            .exec(conn)
            .await?;
        Ok(())
    }
}

use crate::{
    entities::{sequence_counter, SequenceCounter},
    errors::ServiceError,
};
use sea_orm::{sea_query::Expr, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};

pub const ORDER_SEQUENCE: &str = "order_number";

/// Atomic find-and-increment on a named counter row. The increment takes a
/// row lock, so calling this inside the order-creation transaction guarantees
/// unique, monotonically increasing values under concurrent settlement.
pub async fn next_value<C: ConnectionTrait>(conn: &C, name: &str) -> Result<i64, ServiceError> {
    let increment = || {
        SequenceCounter::update_many()
            .col_expr(
                sequence_counter::Column::Value,
                Expr::col(sequence_counter::Column::Value).add(1),
            )
            .filter(sequence_counter::Column::Name.eq(name))
    };

    let mut updated = increment().exec(conn).await?.rows_affected;
    if updated == 0 {
        // First use of this sequence. The insert may race with another
        // writer; the loser falls back to incrementing.
        let seeded = SequenceCounter::insert(sequence_counter::ActiveModel {
            name: Set(name.to_string()),
            value: Set(1),
        })
        .exec(conn)
        .await;

        match seeded {
            Ok(_) => return Ok(1),
            Err(_) => {
                updated = increment().exec(conn).await?.rows_affected;
                if updated == 0 {
                    return Err(ServiceError::InternalError(format!(
                        "sequence {name} could not be incremented"
                    )));
                }
            }
        }
    }

    let row = SequenceCounter::find_by_id(name)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::InternalError(format!("sequence {name} disappeared")))?;
    Ok(row.value)
}

pub fn format_order_number(value: i64) -> String {
    format!("ORD-{value:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_numbers_are_zero_padded() {
        assert_eq!(format_order_number(1), "ORD-000001");
        assert_eq!(format_order_number(42), "ORD-000042");
        assert_eq!(format_order_number(1_234_567), "ORD-1234567");
    }
}

use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;

use crate::orders::{NewOrder, NewOrderItem, NewOrderLine, Order, OrderItem, OrderStore};
use crate::web::PgPool;

#[derive(Clone)]
pub struct OrdersRepository {
    pool: PgPool,
}

impl OrdersRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for OrdersRepository {
    async fn find_by_checkout_id(&self, stripe_checkout_id: &str) -> Result<Option<Order>> {
        use crate::schema::orders::dsl;

        let pool = self.pool.clone();
        let stripe_checkout_id = stripe_checkout_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let order: Option<Order> = dsl::orders
                .filter(dsl::stripe_checkout_id.eq(&stripe_checkout_id))
                .select(Order::as_select())
                .first(&mut conn)
                .optional()?;

            Ok::<Option<Order>, anyhow::Error>(order)
        })
        .await??;

        Ok(result)
    }

    /// Insert the order and all of its items in one transaction
    async fn create_with_items(
        &self,
        new_order: NewOrder,
        lines: Vec<NewOrderLine>,
    ) -> Result<Option<(Order, Vec<OrderItem>)>> {
        use crate::schema::{order_items, orders};

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            conn.transaction::<_, anyhow::Error, _>(|conn| {
                let inserted: Option<Order> = diesel::insert_into(orders::table)
                    .values(&new_order)
                    .on_conflict(orders::stripe_checkout_id)
                    .do_nothing()
                    .returning(Order::as_returning())
                    .get_result(conn)
                    .optional()?;

                let Some(order) = inserted else {
                    return Ok(None);
                };

                let new_items: Vec<NewOrderItem> = lines
                    .into_iter()
                    .map(|line| NewOrderItem::for_order(order.id, line))
                    .collect();

                let items: Vec<OrderItem> = diesel::insert_into(order_items::table)
                    .values(&new_items)
                    .returning(OrderItem::as_returning())
                    .get_results(conn)?;

                Ok(Some((order, items)))
            })
        })
        .await??;

        Ok(result)
    }
}

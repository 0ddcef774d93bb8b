use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CabinTypeId, HoldToken, OrderId, PaymentId, RefundId, Version, VoyageId};
use domain::{
    CabinInventorySlot, Fare, Hold, HoldChange, HoldState, InventoryError, Money, Order, Payment,
    RefundRequest, SlotKey,
};
use serde::{Serialize, de::DeserializeOwned};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    FareStore, InventoryStore, OrderQuery, OrderStore, PaymentStore, RefundQuery, RefundStore,
    Result, StoreError,
};

const SLOT_COLUMNS: &str = "voyage_id, cabin_type_id, capacity, held, confirmed, version";
const HOLD_COLUMNS: &str = "token, voyage_id, cabin_type_id, quantity, state, expires_at, created_at";

/// PostgreSQL-backed store.
///
/// Slot counters are only ever changed by conditional `UPDATE`s, so the
/// `held + confirmed <= capacity` check happens inside the database.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_slot(row: &PgRow) -> Result<CabinInventorySlot> {
        Ok(CabinInventorySlot {
            key: SlotKey::new(
                VoyageId::from_uuid(row.try_get("voyage_id")?),
                CabinTypeId::from_uuid(row.try_get("cabin_type_id")?),
            ),
            capacity: row.try_get::<i32, _>("capacity")? as u32,
            held: row.try_get::<i32, _>("held")? as u32,
            confirmed: row.try_get::<i32, _>("confirmed")? as u32,
            version: Version::new(row.try_get("version")?),
        })
    }

    fn row_to_hold(row: &PgRow) -> Result<Hold> {
        let state: String = row.try_get("state")?;
        Ok(Hold {
            token: HoldToken::from_uuid(row.try_get("token")?),
            slot: SlotKey::new(
                VoyageId::from_uuid(row.try_get("voyage_id")?),
                CabinTypeId::from_uuid(row.try_get("cabin_type_id")?),
            ),
            quantity: row.try_get::<i32, _>("quantity")? as u32,
            state: HoldState::parse(&state).ok_or_else(|| StoreError::Corrupt {
                entity: "hold",
                detail: format!("unknown state '{state}'"),
            })?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_fare(row: &PgRow) -> Result<Fare> {
        let money = |column: &str| -> Result<Money> {
            Ok(Money::from_cents(row.try_get::<i64, _>(column)?))
        };
        Ok(Fare {
            slot: SlotKey::new(
                VoyageId::from_uuid(row.try_get("voyage_id")?),
                CabinTypeId::from_uuid(row.try_get("cabin_type_id")?),
            ),
            cabin_type_name: row.try_get("cabin_type_name")?,
            max_occupancy: row.try_get::<i32, _>("max_occupancy")? as u32,
            adult_price: money("adult_price")?,
            child_price: money("child_price")?,
            infant_price: money("infant_price")?,
            port_fee: money("port_fee")?,
            service_fee: money("service_fee")?,
        })
    }

    /// Decodes the JSON document column of a versioned record.
    fn row_to_document<T: DeserializeOwned>(row: &PgRow) -> Result<(T, Version)> {
        let document: serde_json::Value = row.try_get("document")?;
        let version = Version::new(row.try_get("version")?);
        Ok((serde_json::from_value(document)?, version))
    }

    fn to_document<T: Serialize>(value: &T) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(value)?)
    }

    /// Explains why a conditional reserve matched no row.
    async fn reserve_rejection(&self, key: SlotKey, requested: u32) -> Result<StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SLOT_COLUMNS} FROM cabin_inventory WHERE voyage_id = $1 AND cabin_type_id = $2"
        ))
        .bind(key.voyage_id.as_uuid())
        .bind(key.cabin_type_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            None => InventoryError::SlotNotFound(key).into(),
            Some(row) => InventoryError::CabinNotAvailable {
                slot: key,
                requested,
                available: Self::row_to_slot(&row)?.available(),
            }
            .into(),
        })
    }

    /// Locks the hold row, runs `f` on it and applies the resulting counter
    /// movement to its slot in the same transaction.
    async fn transition_hold<F>(&self, token: HoldToken, f: F) -> Result<HoldChange>
    where
        F: FnOnce(&mut Hold) -> std::result::Result<HoldChange, InventoryError> + Send,
    {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {HOLD_COLUMNS} FROM inventory_holds WHERE token = $1 FOR UPDATE"
        ))
        .bind(token.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let mut hold = match row {
            Some(row) => Self::row_to_hold(&row)?,
            None => return Err(InventoryError::HoldNotFound(token).into()),
        };
        let change = f(&mut hold)?;
        if change.is_noop() {
            return Ok(change);
        }

        sqlx::query("UPDATE inventory_holds SET state = $2, expires_at = $3 WHERE token = $1")
            .bind(token.as_uuid())
            .bind(hold.state.as_str())
            .bind(hold.expires_at)
            .execute(&mut *tx)
            .await?;

        Self::apply_counters(&mut tx, &hold, change).await?;
        tx.commit().await?;
        Ok(change)
    }

    async fn apply_counters(
        tx: &mut Transaction<'_, Postgres>,
        hold: &Hold,
        change: HoldChange,
    ) -> Result<()> {
        let set = match change {
            HoldChange::Confirmed => "held = held - $3, confirmed = confirmed + $3",
            HoldChange::ReleasedHeld => "held = held - $3",
            HoldChange::ReleasedConfirmed => "confirmed = confirmed - $3",
            HoldChange::Secured | HoldChange::Unchanged => return Ok(()),
        };
        sqlx::query(&format!(
            "UPDATE cabin_inventory SET {set}, version = version + 1, updated_at = NOW() \
             WHERE voyage_id = $1 AND cabin_type_id = $2"
        ))
        .bind(hold.slot.voyage_id.as_uuid())
        .bind(hold.slot.cabin_type_id.as_uuid())
        .bind(hold.quantity as i32)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Turns a zero-row versioned update into `NotFound` or `ConcurrencyConflict`.
    async fn version_mismatch(
        &self,
        table: &'static str,
        entity: &'static str,
        id: Uuid,
        expected: Version,
    ) -> Result<StoreError> {
        let actual: Option<i64> =
            sqlx::query_scalar(&format!("SELECT version FROM {table} WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match actual {
            None => StoreError::NotFound {
                entity,
                id: id.to_string(),
            },
            Some(actual) => {
                tracing::debug!(entity, %id, %expected, actual, "Optimistic version conflict");
                metrics::counter!("store_version_conflicts_total", "entity" => entity)
                    .increment(1);
                StoreError::ConcurrencyConflict {
                    entity,
                    id: id.to_string(),
                    expected,
                    actual: Version::new(actual),
                }
            }
        })
    }

    fn unique_violation(err: sqlx::Error, constraint: &str, entity: &'static str, key: &str) -> StoreError {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.constraint() == Some(constraint)
        {
            return StoreError::Duplicate {
                entity,
                key: key.to_string(),
            };
        }
        StoreError::Database(err)
    }
}

#[async_trait]
impl InventoryStore for PostgresStore {
    async fn define_slot(&self, key: SlotKey, capacity: u32) -> Result<CabinInventorySlot> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO cabin_inventory (voyage_id, cabin_type_id, capacity)
            VALUES ($1, $2, $3)
            ON CONFLICT (voyage_id, cabin_type_id) DO UPDATE SET
                capacity = EXCLUDED.capacity,
                version = cabin_inventory.version + 1,
                updated_at = NOW()
            WHERE cabin_inventory.held + cabin_inventory.confirmed <= EXCLUDED.capacity
            RETURNING {SLOT_COLUMNS}
            "#
        ))
        .bind(key.voyage_id.as_uuid())
        .bind(key.cabin_type_id.as_uuid())
        .bind(capacity as i32)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_slot(&row),
            None => {
                let current = self
                    .get_slot(key)
                    .await?
                    .ok_or(InventoryError::SlotNotFound(key))?;
                Err(InventoryError::CapacityBelowCommitted {
                    capacity,
                    committed: current.held + current.confirmed,
                }
                .into())
            }
        }
    }

    async fn get_slot(&self, key: SlotKey) -> Result<Option<CabinInventorySlot>> {
        let row = sqlx::query(&format!(
            "SELECT {SLOT_COLUMNS} FROM cabin_inventory WHERE voyage_id = $1 AND cabin_type_id = $2"
        ))
        .bind(key.voyage_id.as_uuid())
        .bind(key.cabin_type_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_slot).transpose()
    }

    async fn low_inventory_slots(&self, threshold: u32) -> Result<Vec<CabinInventorySlot>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SLOT_COLUMNS} FROM cabin_inventory
            WHERE capacity > 0 AND capacity - held - confirmed <= $1
            ORDER BY voyage_id, cabin_type_id
            "#
        ))
        .bind(threshold as i32)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_slot).collect()
    }

    async fn reserve(&self, hold: Hold) -> Result<CabinInventorySlot> {
        if hold.quantity == 0 {
            return Err(InventoryError::InvalidQuantity(0).into());
        }

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            r#"
            UPDATE cabin_inventory
            SET held = held + $3, version = version + 1, updated_at = NOW()
            WHERE voyage_id = $1 AND cabin_type_id = $2 AND capacity - held - confirmed >= $3
            RETURNING {SLOT_COLUMNS}
            "#
        ))
        .bind(hold.slot.voyage_id.as_uuid())
        .bind(hold.slot.cabin_type_id.as_uuid())
        .bind(hold.quantity as i32)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(self.reserve_rejection(hold.slot, hold.quantity).await?);
        };
        let slot = Self::row_to_slot(&row)?;

        sqlx::query(&format!(
            "INSERT INTO inventory_holds ({HOLD_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(hold.token.as_uuid())
        .bind(hold.slot.voyage_id.as_uuid())
        .bind(hold.slot.cabin_type_id.as_uuid())
        .bind(hold.quantity as i32)
        .bind(hold.state.as_str())
        .bind(hold.expires_at)
        .bind(hold.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(slot)
    }

    async fn get_hold(&self, token: HoldToken) -> Result<Option<Hold>> {
        let row = sqlx::query(&format!(
            "SELECT {HOLD_COLUMNS} FROM inventory_holds WHERE token = $1"
        ))
        .bind(token.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_hold).transpose()
    }

    async fn confirm_hold(&self, token: HoldToken, now: DateTime<Utc>) -> Result<HoldChange> {
        self.transition_hold(token, move |hold| hold.confirm(now))
            .await
    }

    async fn release_hold(&self, token: HoldToken) -> Result<HoldChange> {
        self.transition_hold(token, |hold| Ok(hold.release())).await
    }

    async fn secure_hold(&self, token: HoldToken) -> Result<HoldChange> {
        self.transition_hold(token, |hold| hold.secure()).await
    }
}

#[async_trait]
impl FareStore for PostgresStore {
    async fn upsert_fare(&self, fare: Fare) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fares (voyage_id, cabin_type_id, cabin_type_name, max_occupancy,
                adult_price, child_price, infant_price, port_fee, service_fee)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (voyage_id, cabin_type_id) DO UPDATE SET
                cabin_type_name = EXCLUDED.cabin_type_name,
                max_occupancy = EXCLUDED.max_occupancy,
                adult_price = EXCLUDED.adult_price,
                child_price = EXCLUDED.child_price,
                infant_price = EXCLUDED.infant_price,
                port_fee = EXCLUDED.port_fee,
                service_fee = EXCLUDED.service_fee,
                updated_at = NOW()
            "#,
        )
        .bind(fare.slot.voyage_id.as_uuid())
        .bind(fare.slot.cabin_type_id.as_uuid())
        .bind(&fare.cabin_type_name)
        .bind(fare.max_occupancy as i32)
        .bind(fare.adult_price.cents())
        .bind(fare.child_price.cents())
        .bind(fare.infant_price.cents())
        .bind(fare.port_fee.cents())
        .bind(fare.service_fee.cents())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_fares(&self, keys: &[SlotKey]) -> Result<HashMap<SlotKey, Fare>> {
        let voyages: Vec<Uuid> = keys.iter().map(|k| k.voyage_id.as_uuid()).collect();
        let cabins: Vec<Uuid> = keys.iter().map(|k| k.cabin_type_id.as_uuid()).collect();

        let rows = sqlx::query(
            r#"
            SELECT f.voyage_id, f.cabin_type_id, f.cabin_type_name, f.max_occupancy,
                f.adult_price, f.child_price, f.infant_price, f.port_fee, f.service_fee
            FROM fares f
            JOIN UNNEST($1::uuid[], $2::uuid[]) AS k(voyage_id, cabin_type_id)
                ON f.voyage_id = k.voyage_id AND f.cabin_type_id = k.cabin_type_id
            "#,
        )
        .bind(voyages)
        .bind(cabins)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Self::row_to_fare(row).map(|fare| (fare.slot, fare)))
            .collect()
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(&self, order: &Order) -> Result<Version> {
        let version = Version::FIRST;
        let mut stored = order.clone();
        stored.set_version(version);

        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, user_id, status, payment_status, paid_amount,
                holds_released, expires_at, created_at, updated_at, version, document)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.order_number())
        .bind(order.user_id().map(|u| u.as_str()))
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(order.paid_amount().cents())
        .bind(order.holds_released())
        .bind(order.expires_at())
        .bind(order.created_at())
        .bind(order.updated_at())
        .bind(version.as_i64())
        .bind(Self::to_document(&stored)?)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Self::unique_violation(e, "orders_order_number_key", "order", order.order_number())
        })?;

        Ok(version)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT version, document FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn get_order_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT version, document FROM orders WHERE order_number = $1")
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn update_order(&self, order: &Order, expected: Version) -> Result<Version> {
        let next = expected.next();
        let mut stored = order.clone();
        stored.set_version(next);

        let result = sqlx::query(
            r#"
            UPDATE orders SET status = $3, payment_status = $4, paid_amount = $5,
                holds_released = $6, updated_at = $7, version = $8, document = $9
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(expected.as_i64())
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(order.paid_amount().cents())
        .bind(order.holds_released())
        .bind(order.updated_at())
        .bind(next.as_i64())
        .bind(Self::to_document(&stored)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .version_mismatch("orders", "order", order.id().as_uuid(), expected)
                .await?);
        }
        Ok(next)
    }

    async fn delete_order(&self, id: OrderId, expected: Version) -> Result<()> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1 AND version = $2")
            .bind(id.as_uuid())
            .bind(expected.as_i64())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .version_mismatch("orders", "order", id.as_uuid(), expected)
                .await?);
        }
        Ok(())
    }

    async fn query_orders(&self, query: &OrderQuery) -> Result<Vec<Order>> {
        let mut sql = String::from("SELECT version, document FROM orders WHERE 1=1");
        let mut param_count = 0;

        if query.user_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND user_id = ${param_count}"));
        }
        if query.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }
        if query.payment_status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND payment_status = ${param_count}"));
        }
        if query.voyage_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND document->'items' @> ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at DESC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);
        if let Some(ref user_id) = query.user_id {
            sqlx_query = sqlx_query.bind(user_id.as_str().to_string());
        }
        if let Some(status) = query.status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        if let Some(payment_status) = query.payment_status {
            sqlx_query = sqlx_query.bind(payment_status.as_str());
        }
        if let Some(voyage_id) = query.voyage_id {
            sqlx_query = sqlx_query.bind(serde_json::json!([{ "voyage_id": voyage_id }]));
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_order).collect()
    }

    async fn expired_orders(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM orders
            WHERE status = 'pending' AND paid_amount = 0 AND expires_at <= $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_order).collect()
    }

    async fn unreleased_cancellations(&self, limit: usize) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM orders
            WHERE status = 'cancelled' AND holds_released = FALSE
            ORDER BY updated_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_order).collect()
    }
}

fn row_to_order(row: &PgRow) -> Result<Order> {
    let (mut order, version): (Order, Version) = PostgresStore::row_to_document(row)?;
    order.set_version(version);
    Ok(order)
}

fn row_to_payment(row: &PgRow) -> Result<Payment> {
    let (mut payment, version): (Payment, Version) = PostgresStore::row_to_document(row)?;
    payment.version = version;
    Ok(payment)
}

fn row_to_refund(row: &PgRow) -> Result<RefundRequest> {
    let (mut refund, version): (RefundRequest, Version) = PostgresStore::row_to_document(row)?;
    refund.version = version;
    Ok(refund)
}

#[async_trait]
impl PaymentStore for PostgresStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<Version> {
        let version = Version::FIRST;
        let mut stored = payment.clone();
        stored.version = version;

        sqlx::query(
            r#"
            INSERT INTO payments (id, payment_no, order_id, state, provider_transaction_id,
                created_at, version, document)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(&payment.payment_no)
        .bind(payment.order_id.as_uuid())
        .bind(payment.state.as_str())
        .bind(payment.provider_transaction_id.as_deref())
        .bind(payment.created_at)
        .bind(version.as_i64())
        .bind(Self::to_document(&stored)?)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Self::unique_violation(e, "payments_payment_no_key", "payment", &payment.payment_no)
        })?;

        Ok(version)
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        let row = sqlx::query("SELECT version, document FROM payments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_payment).transpose()
    }

    async fn get_payment_by_no(&self, payment_no: &str) -> Result<Option<Payment>> {
        let row = sqlx::query("SELECT version, document FROM payments WHERE payment_no = $1")
            .bind(payment_no)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_payment).transpose()
    }

    async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        let rows = sqlx::query(
            "SELECT version, document FROM payments WHERE order_id = $1 ORDER BY created_at ASC",
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_payment).collect()
    }

    async fn update_payment(&self, payment: &Payment, expected: Version) -> Result<Version> {
        let next = expected.next();
        let mut stored = payment.clone();
        stored.version = next;

        let result = sqlx::query(
            r#"
            UPDATE payments SET state = $3, provider_transaction_id = $4, version = $5, document = $6
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(expected.as_i64())
        .bind(payment.state.as_str())
        .bind(payment.provider_transaction_id.as_deref())
        .bind(next.as_i64())
        .bind(Self::to_document(&stored)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .version_mismatch("payments", "payment", payment.id.as_uuid(), expected)
                .await?);
        }
        Ok(next)
    }
}

#[async_trait]
impl RefundStore for PostgresStore {
    async fn insert_refund(&self, refund: &RefundRequest) -> Result<Version> {
        let version = Version::FIRST;
        let mut stored = refund.clone();
        stored.version = version;

        sqlx::query(
            r#"
            INSERT INTO refund_requests (id, refund_no, order_id, user_id, status, created_at,
                version, document)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(refund.id.as_uuid())
        .bind(&refund.refund_no)
        .bind(refund.order_id.as_uuid())
        .bind(refund.user_id.as_ref().map(|u| u.as_str()))
        .bind(refund.status.as_str())
        .bind(refund.created_at)
        .bind(version.as_i64())
        .bind(Self::to_document(&stored)?)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Self::unique_violation(e, "refund_requests_refund_no_key", "refund", &refund.refund_no)
        })?;

        Ok(version)
    }

    async fn get_refund(&self, id: RefundId) -> Result<Option<RefundRequest>> {
        let row = sqlx::query("SELECT version, document FROM refund_requests WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_refund).transpose()
    }

    async fn update_refund(&self, refund: &RefundRequest, expected: Version) -> Result<Version> {
        let next = expected.next();
        let mut stored = refund.clone();
        stored.version = next;

        let result = sqlx::query(
            r#"
            UPDATE refund_requests SET status = $3, version = $4, document = $5
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(refund.id.as_uuid())
        .bind(expected.as_i64())
        .bind(refund.status.as_str())
        .bind(next.as_i64())
        .bind(Self::to_document(&stored)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .version_mismatch("refund_requests", "refund", refund.id.as_uuid(), expected)
                .await?);
        }
        Ok(next)
    }

    async fn query_refunds(&self, query: &RefundQuery) -> Result<Vec<RefundRequest>> {
        let mut sql = String::from("SELECT version, document FROM refund_requests WHERE 1=1");
        let mut param_count = 0;

        if query.order_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND order_id = ${param_count}"));
        }
        if query.user_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND user_id = ${param_count}"));
        }
        if query.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at DESC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);
        if let Some(order_id) = query.order_id {
            sqlx_query = sqlx_query.bind(order_id.as_uuid());
        }
        if let Some(ref user_id) = query.user_id {
            sqlx_query = sqlx_query.bind(user_id.as_str().to_string());
        }
        if let Some(status) = query.status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_refund).collect()
    }
}

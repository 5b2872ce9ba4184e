/// In-memory store gateway
///
/// Backs the test suites and local development. A single lock over all four
/// tables makes `transactional_write` trivially atomic; expired idempotency
/// rows are treated as vacant, mirroring a store-managed TTL. Rows carry an
/// insertion sequence so index scans stay FIFO even when timestamps collide.
use crate::store::{
    PutOutcome, ScanQuery, StoreGateway, StoreResult, StoredRow, Table, TxnOutcome, UpdateOutcome,
    WriteItem,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use transactional_outbox::Clock;

#[derive(Clone)]
struct Versioned {
    seq: u64,
    row: StoredRow,
}

type Rows = BTreeMap<(String, String), Versioned>;

#[derive(Default)]
struct Inner {
    next_seq: u64,
    reservations: Rows,
    orders: Rows,
    idempotency: Rows,
    outbox: Rows,
}

impl Inner {
    fn table(&self, table: Table) -> &Rows {
        match table {
            Table::Reservations => &self.reservations,
            Table::Orders => &self.orders,
            Table::Idempotency => &self.idempotency,
            Table::Outbox => &self.outbox,
        }
    }

    fn table_mut(&mut self, table: Table) -> &mut Rows {
        match table {
            Table::Reservations => &mut self.reservations,
            Table::Orders => &mut self.orders,
            Table::Idempotency => &mut self.idempotency,
            Table::Outbox => &mut self.outbox,
        }
    }

    /// Insert or replace, keeping the original sequence on replacement so a
    /// row's scan position is stable across status updates.
    fn upsert(&mut self, table: Table, row: StoredRow) {
        let key = (row.pk.clone(), row.sk.clone());
        let existing_seq = self.table(table).get(&key).map(|v| v.seq);
        let seq = existing_seq.unwrap_or_else(|| {
            self.next_seq += 1;
            self.next_seq
        });
        self.table_mut(table).insert(key, Versioned { seq, row });
    }
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { inner: RwLock::new(Inner::default()), clock }
    }

    /// Snapshot of a whole table in insertion order, for assertions in tests.
    pub fn dump(&self, table: Table) -> Vec<StoredRow> {
        let inner = self.inner.read();
        let mut rows: Vec<&Versioned> = inner.table(table).values().collect();
        rows.sort_by_key(|v| v.seq);
        rows.into_iter().map(|v| v.row.clone()).collect()
    }

    fn vacant(table: Table, existing: Option<&Versioned>, now: DateTime<Utc>) -> bool {
        match existing {
            None => true,
            Some(v) => table == Table::Idempotency && v.row.expires_at.is_some_and(|at| at <= now),
        }
    }

    fn check_item(inner: &Inner, item: &WriteItem, now: DateTime<Utc>) -> bool {
        match item {
            WriteItem::PutIfAbsent { table, row } => {
                let existing = inner.table(*table).get(&(row.pk.clone(), row.sk.clone()));
                Self::vacant(*table, existing, now)
            }
            WriteItem::ConditionalUpdate { table, row, expected_status } => inner
                .table(*table)
                .get(&(row.pk.clone(), row.sk.clone()))
                .is_some_and(|current| current.row.status == *expected_status),
        }
    }
}

#[async_trait]
impl StoreGateway for MemoryStore {
    async fn get(&self, table: Table, pk: &str, sk: &str) -> StoreResult<Option<StoredRow>> {
        let inner = self.inner.read();
        let row = inner
            .table(table)
            .get(&(pk.to_string(), sk.to_string()))
            .map(|v| v.row.clone());
        match row {
            Some(row)
                if table == Table::Idempotency
                    && row.expires_at.is_some_and(|at| at <= self.clock.now()) =>
            {
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn put_if_absent(&self, table: Table, row: StoredRow) -> StoreResult<PutOutcome> {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let key = (row.pk.clone(), row.sk.clone());
        if Self::vacant(table, inner.table(table).get(&key), now) {
            inner.upsert(table, row);
            Ok(PutOutcome::Inserted)
        } else {
            Ok(PutOutcome::Conflict)
        }
    }

    async fn conditional_update(
        &self,
        table: Table,
        row: StoredRow,
        expected_status: &str,
    ) -> StoreResult<UpdateOutcome> {
        let mut inner = self.inner.write();
        let key = (row.pk.clone(), row.sk.clone());
        match inner.table(table).get(&key) {
            Some(current) if current.row.status == expected_status => {
                inner.upsert(table, row);
                Ok(UpdateOutcome::Applied)
            }
            _ => Ok(UpdateOutcome::PreconditionFailed),
        }
    }

    async fn transactional_write(&self, items: Vec<WriteItem>) -> StoreResult<TxnOutcome> {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        if !items.iter().all(|item| Self::check_item(&inner, item, now)) {
            return Ok(TxnOutcome::Aborted);
        }
        for item in items {
            match item {
                WriteItem::PutIfAbsent { table, row }
                | WriteItem::ConditionalUpdate { table, row, .. } => inner.upsert(table, row),
            }
        }
        Ok(TxnOutcome::Committed)
    }

    async fn scan_by_index(
        &self,
        query: ScanQuery,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<StoredRow>> {
        let inner = self.inner.read();
        let mut matches: Vec<&Versioned> = match query {
            ScanQuery::DueOutbox => inner
                .outbox
                .values()
                .filter(|v| {
                    v.row.status == "PENDING"
                        || (v.row.status == "FAILED" && v.row.retry_at.is_some_and(|at| at <= now))
                })
                .collect(),
            ScanQuery::ExpiredHolds => inner
                .reservations
                .values()
                .filter(|v| v.row.status == "HOLD" && v.row.expires_at.is_some_and(|at| at <= now))
                .collect(),
            ScanQuery::ParkedOutbox => inner
                .outbox
                .values()
                .filter(|v| v.row.status == "FAILED" && v.row.retry_at.is_none())
                .collect(),
        };
        matches.sort_by_key(|v| (v.row.created_at, v.seq));
        Ok(matches.into_iter().take(limit).map(|v| v.row.clone()).collect())
    }
}

//! In-memory backend and helpers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use crab_offline::{
    LocalStore, OfflineConfig, OfflineService, RemoteBackend, RemoteError, RetryPolicy,
};
use parking_lot::Mutex;
use serde_json::json;
use shared::models::{
    OrderStatus, Session, SessionCreate, SessionOrder, SessionOrderCreate, SessionStatus,
};
use shared::{EntityKind, ErrorCode, RemoteRow, SyncCursor};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, watch};

pub const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub kind: EntityKind,
    pub after: Option<SyncCursor>,
    pub returned: usize,
}

#[derive(Default)]
struct MockState {
    rows: HashMap<EntityKind, Vec<RemoteRow>>,
    fetches: Vec<FetchCall>,
    /// Fetches fail once this many have been served
    fail_after_fetches: Option<usize>,
    failing_kinds: HashSet<EntityKind>,
    /// Rows served per fetch regardless of the requested limit
    page_cap: Option<usize>,
    /// Errors returned by the next call of an operation
    scripted: HashMap<&'static str, VecDeque<RemoteError>>,
    calls: Vec<String>,
    sessions: HashMap<String, Session>,
    orders: HashMap<String, SessionOrder>,
    client_refs: HashMap<String, String>,
    stock: HashMap<String, i64>,
    next_id: u64,
}

/// POS backend double with server-side rules for sessions, orders and stock
pub struct MockBackend {
    state: Mutex<MockState>,
    offline: AtomicBool,
    paused: watch::Sender<bool>,
    fetch_started: Notify,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            state: Mutex::new(MockState {
                next_id: 1000,
                ..Default::default()
            }),
            offline: AtomicBool::new(false),
            paused,
            fetch_started: Notify::new(),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_rows(&self, kind: EntityKind, rows: Vec<RemoteRow>) {
        self.state.lock().rows.insert(kind, rows);
    }

    pub fn push_row(&self, kind: EntityKind, row: RemoteRow) {
        self.state.lock().rows.entry(kind).or_default().push(row);
    }

    pub fn fail_after_fetches(&self, fetches: Option<usize>) {
        self.state.lock().fail_after_fetches = fetches;
    }

    pub fn cap_page(&self, cap: Option<usize>) {
        self.state.lock().page_cap = cap;
    }

    pub fn fail_kind(&self, kind: EntityKind, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing_kinds.insert(kind);
        } else {
            state.failing_kinds.remove(&kind);
        }
    }

    /// Fail the next call of `op` (`create_session`, `create_order`,
    /// `confirm_order`, `close_session`) with `error`
    pub fn fail_next(&self, op: &'static str, error: RemoteError) {
        self.state
            .lock()
            .scripted
            .entry(op)
            .or_default()
            .push_back(error);
    }

    pub fn set_stock(&self, product_id: &str, stock: i64) {
        self.state.lock().stock.insert(product_id.to_string(), stock);
    }

    pub fn server_stock(&self, product_id: &str) -> Option<i64> {
        self.state.lock().stock.get(product_id).copied()
    }

    pub fn insert_session(&self, session: Session) {
        self.state.lock().sessions.insert(session.id.clone(), session);
    }

    pub fn insert_order(&self, order: SessionOrder) {
        self.state.lock().orders.insert(order.id.clone(), order);
    }

    pub fn server_session(&self, id: &str) -> Option<Session> {
        self.state.lock().sessions.get(id).cloned()
    }

    pub fn server_order(&self, id: &str) -> Option<SessionOrder> {
        self.state.lock().orders.get(id).cloned()
    }

    pub fn server_orders(&self) -> Vec<SessionOrder> {
        self.state.lock().orders.values().cloned().collect()
    }

    pub fn fetches(&self) -> Vec<FetchCall> {
        self.state.lock().fetches.clone()
    }

    pub fn clear_fetches(&self) {
        self.state.lock().fetches.clear();
    }

    /// Mutation calls in order, as `"<op> <argument>"`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Hold every fetch until [`resume_fetches`](Self::resume_fetches)
    pub fn pause_fetches(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume_fetches(&self) {
        self.paused.send_replace(false);
    }

    /// Resolves once a fetch has started (used with `pause_fetches`)
    pub async fn fetch_started(&self) {
        self.fetch_started.notified().await;
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::Network("connection refused".into()))
        } else {
            Ok(())
        }
    }

    fn begin_call(&self, op: &'static str, arg: &str) -> Result<(), RemoteError> {
        self.check_online()?;
        let mut state = self.state.lock();
        state.calls.push(format!("{op} {arg}"));
        if let Some(error) = state.scripted.get_mut(op).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        Ok(())
    }
}

fn next_id(state: &mut MockState, prefix: &str) -> String {
    state.next_id += 1;
    format!("{prefix}{}", state.next_id)
}

#[async_trait]
impl RemoteBackend for MockBackend {
    async fn fetch_rows(
        &self,
        kind: EntityKind,
        after: Option<&SyncCursor>,
        limit: usize,
    ) -> Result<Vec<RemoteRow>, RemoteError> {
        self.fetch_started.notify_one();
        let mut paused = self.paused.subscribe();
        let _ = paused.wait_for(|paused| !*paused).await;

        self.check_online()?;
        let mut state = self.state.lock();

        if state.failing_kinds.contains(&kind) {
            return Err(RemoteError::api(500, Some(ErrorCode::InternalError), "boom"));
        }
        if state
            .fail_after_fetches
            .is_some_and(|limit| state.fetches.len() >= limit)
        {
            return Err(RemoteError::Network("connection reset".into()));
        }

        let mut rows: Vec<RemoteRow> = state
            .rows
            .get(&kind)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|row| after.is_none_or(|cursor| cursor.is_before(row)))
            .collect();
        rows.sort_by(|a, b| (a.last_modified, &a.id).cmp(&(b.last_modified, &b.id)));
        rows.truncate(state.page_cap.map_or(limit, |cap| cap.min(limit)));

        state.fetches.push(FetchCall {
            kind,
            after: after.cloned(),
            returned: rows.len(),
        });
        Ok(rows)
    }

    async fn create_session(&self, req: &SessionCreate) -> Result<Session, RemoteError> {
        self.begin_call("create_session", &req.client_ref)?;
        let mut state = self.state.lock();

        if let Some(id) = state.client_refs.get(&req.client_ref).cloned() {
            return state
                .sessions
                .get(&id)
                .cloned()
                .ok_or_else(|| RemoteError::api(500, None, "lost session"));
        }

        let id = next_id(&mut state, "s");
        let session = Session {
            id: id.clone(),
            table_id: req.table_id.clone(),
            guest_count: req.guest_count,
            status: SessionStatus::Open,
            opened_at: 1,
            closed_at: None,
        };
        state.client_refs.insert(req.client_ref.clone(), id.clone());
        state.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn create_order(&self, req: &SessionOrderCreate) -> Result<SessionOrder, RemoteError> {
        self.begin_call("create_order", &req.session_id)?;
        let mut state = self.state.lock();

        if let Some(id) = state.client_refs.get(&req.client_ref).cloned() {
            return state
                .orders
                .get(&id)
                .cloned()
                .ok_or_else(|| RemoteError::api(500, None, "lost order"));
        }
        if !state.sessions.contains_key(&req.session_id) {
            return Err(RemoteError::api(
                404,
                Some(ErrorCode::SessionNotFound),
                "Session not found",
            ));
        }

        let id = next_id(&mut state, "o");
        let order = SessionOrder {
            id: id.clone(),
            session_id: req.session_id.clone(),
            items: req.items.clone(),
            status: OrderStatus::Pending,
            created_at: 1,
            confirmed_at: None,
        };
        state.client_refs.insert(req.client_ref.clone(), id.clone());
        state.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn confirm_order(&self, order_id: &str) -> Result<SessionOrder, RemoteError> {
        self.begin_call("confirm_order", order_id)?;
        let mut state = self.state.lock();

        let Some(order) = state.orders.get(order_id).cloned() else {
            return Err(RemoteError::api(
                404,
                Some(ErrorCode::OrderNotFound),
                "Order not found",
            ));
        };
        if order.status == OrderStatus::Confirmed {
            return Err(RemoteError::api(
                409,
                Some(ErrorCode::OrderAlreadyConfirmed),
                "Order already confirmed",
            ));
        }
        for item in &order.items {
            if let Some(stock) = state.stock.get(&item.product_id)
                && *stock < i64::from(item.quantity)
            {
                return Err(RemoteError::api(
                    409,
                    Some(ErrorCode::InsufficientStock),
                    format!("Insufficient stock for {}", item.product_id),
                ));
            }
        }
        for item in &order.items {
            if let Some(stock) = state.stock.get_mut(&item.product_id) {
                *stock -= i64::from(item.quantity);
            }
        }

        let order = state
            .orders
            .get_mut(order_id)
            .map(|order| {
                order.confirm(2);
                order.clone()
            })
            .ok_or_else(|| RemoteError::api(500, None, "lost order"))?;
        Ok(order)
    }

    async fn close_session(&self, session_id: &str) -> Result<Session, RemoteError> {
        self.begin_call("close_session", session_id)?;
        let mut state = self.state.lock();

        let Some(session) = state.sessions.get_mut(session_id) else {
            return Err(RemoteError::api(
                404,
                Some(ErrorCode::SessionNotFound),
                "Session not found",
            ));
        };
        if !session.is_open() {
            return Err(RemoteError::api(
                409,
                Some(ErrorCode::SessionAlreadyClosed),
                "Session already closed",
            ));
        }
        session.close(3);
        Ok(session.clone())
    }
}

// ========== Fixtures ==========

pub fn product_row(id: &str, last_modified: i64, stock: Option<i64>) -> RemoteRow {
    RemoteRow {
        id: id.to_string(),
        last_modified,
        deleted: false,
        data: json!({
            "id": id,
            "name": format!("Product {id}"),
            "category_id": "c1",
            "price": 350,
            "current_stock": stock,
            "is_active": true,
        }),
    }
}

/// `count` products `p0001…`, each with its own modification time
pub fn product_rows(count: usize) -> Vec<RemoteRow> {
    (1..=count)
        .map(|i| product_row(&format!("p{i:04}"), i as i64, None))
        .collect()
}

pub fn category_row(id: &str, last_modified: i64) -> RemoteRow {
    RemoteRow {
        id: id.to_string(),
        last_modified,
        deleted: false,
        data: json!({ "id": id, "name": format!("Category {id}"), "sort_order": 0, "is_active": true }),
    }
}

pub fn session_row(session: &Session, last_modified: i64) -> RemoteRow {
    RemoteRow {
        id: session.id.clone(),
        last_modified,
        deleted: false,
        data: serde_json::to_value(session).unwrap(),
    }
}

pub fn order_row(order: &SessionOrder, last_modified: i64) -> RemoteRow {
    RemoteRow {
        id: order.id.clone(),
        last_modified,
        deleted: false,
        data: serde_json::to_value(order).unwrap(),
    }
}

pub fn open_session(id: &str) -> Session {
    Session {
        id: id.to_string(),
        table_id: Some("t1".into()),
        guest_count: 2,
        status: SessionStatus::Open,
        opened_at: 1,
        closed_at: None,
    }
}

pub fn config(batch_size: usize) -> OfflineConfig {
    OfflineConfig::with_overrides("/tmp/crab-offline-tests", "http://mock.invalid")
        .with_batch_size(batch_size)
        .with_retry(RetryPolicy {
            max_retries: MAX_RETRIES,
            base_delay_ms: 0,
            max_delay_ms: 0,
        })
}

pub fn service(backend: &Arc<MockBackend>) -> Arc<OfflineService> {
    service_with_batch(backend, 100)
}

pub fn service_with_batch(backend: &Arc<MockBackend>, batch_size: usize) -> Arc<OfflineService> {
    let store = LocalStore::open_in_memory().unwrap();
    OfflineService::new(store, backend.clone(), config(batch_size)).unwrap()
}

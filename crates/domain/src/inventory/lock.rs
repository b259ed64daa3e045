//! Time-bound stock reservations.

use chrono::{DateTime, Utc};
use common::LockId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle of a stock lock.
///
/// ```text
/// Active ──┬──► Released
///          └──► Consumed
/// ```
///
/// Both end states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", content = "at")]
pub enum LockStatus {
    /// Quantity is held for the source document.
    #[default]
    Active,

    /// Quantity went back to available stock.
    Released(DateTime<Utc>),

    /// Quantity left the warehouse.
    Consumed(DateTime<Utc>),
}

impl LockStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LockStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockStatus::Active => "Active",
            LockStatus::Released(_) => "Released",
            LockStatus::Consumed(_) => "Consumed",
        }
    }
}

impl std::fmt::Display for LockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Quantity reserved against a source document until `expire_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLock {
    id: LockId,
    quantity: Decimal,
    source_type: String,
    source_id: String,
    expire_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    status: LockStatus,
}

impl StockLock {
    pub(crate) fn new(
        id: LockId,
        quantity: Decimal,
        source_type: impl Into<String>,
        source_id: impl Into<String>,
        expire_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            quantity,
            source_type: source_type.into(),
            source_id: source_id.into(),
            expire_at,
            created_at,
            status: LockStatus::Active,
        }
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn expire_at(&self) -> DateTime<Utc> {
        self.expire_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> LockStatus {
        self.status
    }

    /// Returns true while the lock is neither released nor consumed.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn is_released(&self) -> bool {
        matches!(self.status, LockStatus::Released(_))
    }

    pub fn is_consumed(&self) -> bool {
        matches!(self.status, LockStatus::Consumed(_))
    }

    /// Returns true if `reference` is strictly after the expiry instant.
    pub fn is_expired_at(&self, reference: DateTime<Utc>) -> bool {
        reference > self.expire_at
    }

    /// Returns true if the lock has expired as of now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Returns true if the lock was taken for the given source document.
    pub fn matches_source(&self, source_type: &str, source_id: &str) -> bool {
        self.source_type == source_type && self.source_id == source_id
    }

    pub(crate) fn release(&mut self, at: DateTime<Utc>) {
        if self.is_active() {
            self.status = LockStatus::Released(at);
        }
    }

    pub(crate) fn consume(&mut self, at: DateTime<Utc>) {
        if self.is_active() {
            self.status = LockStatus::Consumed(at);
        }
    }
}

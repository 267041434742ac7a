//! The unlocked item record and its table wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::error::{LedgerError, Result};

/// Every unlocked item lives in this single table partition.
pub const PARTITION_KEY: &str = "UnlockedItem";

/// Game item identifier, the row key of the ledger table.
pub type ItemId = i32;

/// One entry of the shared unlock ledger.
///
/// Identity is the item id; the name is denormalized for display and the
/// acquisition time is stamped by the remote store, so it stays `None` on
/// records that have not round-tripped through the table yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockedItem {
    item_id: ItemId,
    item_name: String,
    acquired_by: String,
    acquired_on: Option<DateTime<Utc>>,
}

impl UnlockedItem {
    pub fn new(item_id: ItemId, item_name: impl Into<String>, acquired_by: impl Into<String>) -> Self {
        Self {
            item_id,
            item_name: item_name.into(),
            acquired_by: acquired_by.into(),
            acquired_on: None,
        }
    }

    pub fn with_acquired_on(mut self, acquired_on: DateTime<Utc>) -> Self {
        self.acquired_on = Some(acquired_on);
        self
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn item_name(&self) -> &str {
        &self.item_name
    }

    pub fn acquired_by(&self) -> &str {
        &self.acquired_by
    }

    /// Attribution is the only field that may change after creation.
    pub fn set_acquired_by(&mut self, acquired_by: impl Into<String>) {
        self.acquired_by = acquired_by.into();
    }

    pub fn acquired_on(&self) -> Option<DateTime<Utc>> {
        self.acquired_on
    }

    pub fn row_key(&self) -> String {
        self.item_id.to_string()
    }

    pub fn to_entity(&self) -> TableEntity {
        TableEntity {
            partition_key: PARTITION_KEY.to_string(),
            row_key: self.row_key(),
            timestamp: None,
            item_name: self.item_name.clone(),
            acquired_by: self.acquired_by.clone(),
        }
    }
}

/// Flat property map as stored in the remote table.
///
/// `Timestamp` is assigned by the store and never sent on writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableEntity {
    pub partition_key: String,
    pub row_key: String,
    #[serde(default, skip_serializing)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub item_name: String,
    #[serde(default)]
    pub acquired_by: String,
}

impl TryFrom<TableEntity> for UnlockedItem {
    type Error = LedgerError;

    fn try_from(entity: TableEntity) -> Result<Self> {
        let item_id = entity.row_key.parse::<ItemId>().map_err(|e| {
            LedgerError::Decode(format!("row key {:?} is not an item id: {}", entity.row_key, e))
        })?;

        Ok(Self {
            item_id,
            item_name: entity.item_name,
            acquired_by: entity.acquired_by,
            acquired_on: entity.timestamp,
        })
    }
}

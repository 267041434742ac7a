//! The one server-side filter the ledger needs: "created after a watermark".

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::ledger::domain::UnlockedItem;
use crate::ledger::error::{LedgerError, Result};

const PREFIX: &str = "Timestamp gt datetime'";
const SUFFIX: &str = "'";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampFilter {
    after: DateTime<Utc>,
}

impl TimestampFilter {
    pub fn after(after: DateTime<Utc>) -> Self {
        Self { after }
    }

    /// OData expression, unescaped. The HTTP client escapes it for the query string.
    pub fn to_odata(&self) -> String {
        format!(
            "{}{}{}",
            PREFIX,
            self.after.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            SUFFIX
        )
    }

    pub fn parse(expr: &str) -> Result<Self> {
        let inner = expr
            .trim()
            .strip_prefix(PREFIX)
            .and_then(|rest| rest.strip_suffix(SUFFIX))
            .ok_or_else(|| LedgerError::UnsupportedFilter(expr.to_string()))?;

        let after = DateTime::parse_from_rfc3339(inner)
            .map_err(|_| LedgerError::UnsupportedFilter(expr.to_string()))?
            .with_timezone(&Utc);

        Ok(Self { after })
    }

    /// Records without a store timestamp never match.
    pub fn matches(&self, item: &UnlockedItem) -> bool {
        item.acquired_on().is_some_and(|on| on > self.after)
    }
}

impl fmt::Display for TimestampFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_odata())
    }
}

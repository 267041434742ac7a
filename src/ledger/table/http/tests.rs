use std::time::Duration;

use crate::ledger::error::LedgerError;
use crate::ledger::table::filter::TimestampFilter;
use crate::ledger::table::http::client::{key_literal, Continuation, SasTableClient};
use chrono::{TimeZone, Utc};

const SAS_URL: &str =
    "https://group.table.core.windows.net/unlockeditems?sv=2019-02-02&tn=unlockeditems&sig=abc%2Bdef";

fn client() -> SasTableClient {
    SasTableClient::new(SAS_URL, Duration::from_secs(5)).unwrap()
}

#[test]
fn entity_url_keeps_sas_token() {
    let url = client().entity_url("UnlockedItem", "995");
    assert_eq!(
        url,
        "https://group.table.core.windows.net/unlockeditems(PartitionKey='UnlockedItem',RowKey='995')?sv=2019-02-02&tn=unlockeditems&sig=abc%2Bdef"
    );
}

#[test]
fn collection_url_escapes_filter() {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
    let filter = TimestampFilter::after(at).to_odata();

    let url = client().collection_url(Some(&filter), None);

    assert!(url.starts_with(
        "https://group.table.core.windows.net/unlockeditems?sv=2019-02-02&tn=unlockeditems&sig=abc%2Bdef&$filter="
    ));
    assert!(url.ends_with(
        "Timestamp%20gt%20datetime%272024%2D05%2D01T12%3A30%3A00Z%27"
    ));
    assert!(!url.contains(' '));
}

#[test]
fn collection_url_carries_continuation() {
    let next = Continuation {
        next_partition_key: "1!16!VW5sb2NrZWRJdGVt".to_string(),
        next_row_key: Some("1!4!OTk1".to_string()),
    };

    let url = client().collection_url(None, Some(&next));

    assert!(url.contains("&NextPartitionKey=1%2116%21VW5sb2NrZWRJdGVt"));
    assert!(url.ends_with("&NextRowKey=1%214%21OTk1"));
}

#[test]
fn key_literal_doubles_quotes() {
    assert_eq!(key_literal("it's"), "it''s");
    assert_eq!(key_literal("a b/c"), "a%20b%2Fc");
}

#[test]
fn rejects_url_without_token() {
    let err = SasTableClient::new(
        "https://group.table.core.windows.net/unlockeditems",
        Duration::from_secs(5),
    )
    .err()
    .unwrap();
    assert!(matches!(err, LedgerError::InvalidEndpoint(_)));
}

#[test]
fn rejects_garbage_endpoint() {
    let err = SasTableClient::new("not a url", Duration::from_secs(5)).err().unwrap();
    assert!(matches!(err, LedgerError::InvalidEndpoint(_)));

    let err = SasTableClient::new("ftp://host/table?sig=x", Duration::from_secs(5))
        .err()
        .unwrap();
    assert!(matches!(err, LedgerError::InvalidEndpoint(_)));
}

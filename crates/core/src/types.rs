/// Order identifiers are assigned by the broker session (TWS `nextValidId`).
pub type OrderId = i64;

/// Request identifiers correlate a TWS request with its responses.
pub type ReqId = i32;

/// Broker-assigned contract identifier. `0` means "not yet qualified".
pub type ConId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

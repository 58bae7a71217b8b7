use serde::{Deserialize, Serialize};

/// Last processed stream position for one ingestion source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionState {
    pub service: String,
    pub cursor: i64,
}

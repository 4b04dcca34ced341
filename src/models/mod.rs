//! Data models representing database entities.
//!
//! This module contains all data structures that map to database tables, plus the request
//! and filter types the services accept.

/// Access grants and levels
pub mod access;
/// Call admission decisions
pub mod admission;
/// API registry records
pub mod api;
/// Consumer requests for new APIs
pub mod api_request;
/// Document associations
pub mod document;
/// Quota notifications
pub mod notification;
/// Calendar windows for rules and summaries
pub mod period;
/// Policies and rules
pub mod policy;
/// Policy transition audit rows
pub mod policy_change;
/// Usage summaries
pub mod summary;
/// Usage ledger rows
pub mod usage;

use serde::{Deserialize, Deserializer};

/// Deserialize a field where an explicit `null` differs from an absent field.
///
/// Use with `#[serde(default)]`: absent gives `None`, `null` gives `Some(None)`.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::api::UpdateApiRequest;

    #[test]
    fn null_description_differs_from_absent() {
        let absent: UpdateApiRequest = serde_json::from_str(r#"{"name":"x"}"#).unwrap();
        assert_eq!(absent.description, None);

        let cleared: UpdateApiRequest = serde_json::from_str(r#"{"description":null}"#).unwrap();
        assert_eq!(cleared.description, Some(None));

        let set: UpdateApiRequest = serde_json::from_str(r#"{"description":"v2"}"#).unwrap();
        assert_eq!(set.description, Some(Some("v2".to_string())));
    }
}

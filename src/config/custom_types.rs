//! Custom type registry configuration (spec.md §6 "customTypes").

use serde_derive::{Deserialize, Serialize};

/// One entry of `Config.custom_types`, consulted by introspection and by
/// `RowDescription`/`DataRow` encoding when a column's OID matches.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CustomType {
    pub name: String,
    pub oid: i32,
    #[serde(default = "CustomType::default_codec")]
    pub encode: String,
    #[serde(default = "CustomType::default_codec")]
    pub decode: String,
    #[serde(default = "CustomType::default_typlen")]
    pub typlen: i16,
    #[serde(default = "CustomType::default_typtype")]
    pub typtype: String,
}

impl CustomType {
    pub fn default_codec() -> String {
        "text".to_string()
    }
    pub fn default_typlen() -> i16 {
        -1
    }
    pub fn default_typtype() -> String {
        "b".to_string()
    }
}

//! PostgreSQL data type OIDs (spec.md §6: "the full mapping reproduces
//! PostgreSQL's standard OIDs; arrays use the standard base+1000-band
//! scheme").

/// A scalar or array PostgreSQL data type this server can describe in a
/// `RowDescription` and encode in a `DataRow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Int2,
    Int4,
    Int8,
    Text,
    Varchar,
    Numeric,
    Float4,
    Float8,
    Date,
    Timestamp,
    Timestamptz,
    Bytea,
    Json,
    Jsonb,
    Uuid,
    Oid,
    /// `text[]`-shaped array of the given base type.
    Array(Box<DataType>),
    /// A custom type registered via `Config.custom_types`, identified by its
    /// configured OID.
    Custom(i32),
}

impl DataType {
    /// The OID PostgreSQL assigns this type.
    pub fn oid(&self) -> i32 {
        match self {
            DataType::Bool => 16,
            DataType::Bytea => 17,
            DataType::Int8 => 20,
            DataType::Int2 => 21,
            DataType::Int4 => 23,
            DataType::Text => 25,
            DataType::Oid => 26,
            DataType::Json => 114,
            DataType::Float4 => 700,
            DataType::Float8 => 701,
            DataType::Varchar => 1043,
            DataType::Date => 1082,
            DataType::Timestamp => 1114,
            DataType::Timestamptz => 1184,
            DataType::Numeric => 1700,
            DataType::Uuid => 2950,
            DataType::Jsonb => 3802,
            DataType::Array(inner) => array_oid(inner),
            DataType::Custom(oid) => *oid,
        }
    }

    /// The `typlen` PostgreSQL reports for this type in a `RowDescription`
    /// (-1 means variable length).
    pub fn type_size(&self) -> i16 {
        match self {
            DataType::Bool => 1,
            DataType::Int2 => 2,
            DataType::Int4 => 4,
            DataType::Int8 => 8,
            DataType::Oid => 4,
            DataType::Float4 => 4,
            DataType::Float8 => 8,
            DataType::Date => 4,
            DataType::Timestamp => 8,
            DataType::Timestamptz => 8,
            _ => -1,
        }
    }

    /// Wrap this type as its array counterpart.
    pub fn array_of(self) -> DataType {
        DataType::Array(Box::new(self))
    }
}

/// The `base + 1000` array-OID band PostgreSQL uses for the common
/// fixed-width base types; anything outside this band falls back to the
/// generic `anyarray` OID (2277), same as the live server does for types it
/// has no dedicated array OID for.
fn array_oid(base: &DataType) -> i32 {
    match base {
        DataType::Bool => 1000,
        DataType::Bytea => 1001,
        DataType::Int8 => 1016,
        DataType::Int2 => 1005,
        DataType::Int4 => 1007,
        DataType::Text => 1009,
        DataType::Varchar => 1015,
        DataType::Oid => 1028,
        DataType::Json => 199,
        DataType::Float4 => 1021,
        DataType::Float8 => 1022,
        DataType::Date => 1182,
        DataType::Timestamp => 1115,
        DataType::Timestamptz => 1185,
        DataType::Numeric => 1231,
        DataType::Uuid => 2951,
        DataType::Jsonb => 3807,
        _ => 2277, // anyarray
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_oids_match_postgres() {
        assert_eq!(DataType::Bool.oid(), 16);
        assert_eq!(DataType::Int4.oid(), 23);
        assert_eq!(DataType::Text.oid(), 25);
        assert_eq!(DataType::Varchar.oid(), 1043);
    }

    #[test]
    fn array_oids_use_base_plus_1000_band() {
        assert_eq!(DataType::Text.array_of().oid(), 1009);
        assert_eq!(DataType::Int4.array_of().oid(), 1007);
        assert_eq!(DataType::Int8.array_of().oid(), 1016);
        assert_eq!(DataType::Bool.array_of().oid(), 1000);
    }
}

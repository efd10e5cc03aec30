//! PostgreSQL type OID and length mappings
//!
//! Maps backend type names to PostgreSQL wire protocol type identifiers.
//! PostgreSQL OIDs: https://github.com/postgres/postgres/blob/master/src/include/catalog/pg_type.dat

/// Get the PostgreSQL type OID for a given type name
pub fn pg_type_oid(type_name: &str) -> u32 {
    match type_name.to_lowercase().as_str() {
        "varchar" | "character varying" => 1043,
        "text" | "string" => 25,
        "bpchar" | "char" | "character" => 1042,
        "name" => 19,
        "int4" | "integer" | "int" | "serial" => 23,
        "int8" | "bigint" | "bigserial" => 20,
        "int2" | "smallint" => 21,
        "bool" | "boolean" => 16,
        "float4" | "real" => 700,
        "float8" | "double" | "double precision" => 701,
        "numeric" | "decimal" => 1700,
        "date" => 1082,
        "timestamp" | "timestamp without time zone" => 1114,
        "timestamptz" | "timestamp with time zone" => 1184,
        "time" | "time without time zone" => 1083,
        "timetz" | "time with time zone" => 1266,
        "json" => 114,
        "jsonb" => 3802,
        "uuid" => 2950,
        "bytea" | "blob" | "binary" => 17,
        "oid" => 26,
        // Default: TEXT
        _ => 25,
    }
}

/// Get the PostgreSQL type length for a given type name
/// Returns fixed size for fixed-length types, -1 for variable-length
pub fn pg_type_len(type_name: &str) -> i16 {
    match type_name.to_lowercase().as_str() {
        "name" => 64,
        "int4" | "integer" | "int" | "serial" => 4,
        "int8" | "bigint" | "bigserial" => 8,
        "int2" | "smallint" => 2,
        "bool" | "boolean" => 1,
        "float4" | "real" => 4,
        "float8" | "double" | "double precision" => 8,
        "date" => 4,
        "timestamp" | "timestamp without time zone" => 8,
        "timestamptz" | "timestamp with time zone" => 8,
        "time" | "time without time zone" => 8,
        "timetz" | "time with time zone" => 12,
        "uuid" => 16,
        "oid" => 4,
        // varchar, text, bpchar, numeric, json, jsonb, bytea and anything
        // unrecognized are variable length
        _ => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_oid_entries() {
        assert_eq!(pg_type_oid("varchar"), 1043);
        assert_eq!(pg_type_oid("text"), 25);
        assert_eq!(pg_type_oid("bpchar"), 1042);
        assert_eq!(pg_type_oid("name"), 19);
        assert_eq!(pg_type_oid("int4"), 23);
        assert_eq!(pg_type_oid("int8"), 20);
        assert_eq!(pg_type_oid("int2"), 21);
        assert_eq!(pg_type_oid("bool"), 16);
        assert_eq!(pg_type_oid("float4"), 700);
        assert_eq!(pg_type_oid("float8"), 701);
        assert_eq!(pg_type_oid("numeric"), 1700);
        assert_eq!(pg_type_oid("date"), 1082);
        assert_eq!(pg_type_oid("timestamp"), 1114);
        assert_eq!(pg_type_oid("timestamptz"), 1184);
        assert_eq!(pg_type_oid("time"), 1083);
        assert_eq!(pg_type_oid("timetz"), 1266);
        assert_eq!(pg_type_oid("json"), 114);
        assert_eq!(pg_type_oid("jsonb"), 3802);
        assert_eq!(pg_type_oid("uuid"), 2950);
        assert_eq!(pg_type_oid("bytea"), 17);
        assert_eq!(pg_type_oid("oid"), 26);
    }

    #[test]
    fn test_lengths() {
        assert_eq!(pg_type_len("name"), 64);
        assert_eq!(pg_type_len("int2"), 2);
        assert_eq!(pg_type_len("timetz"), 12);
        assert_eq!(pg_type_len("uuid"), 16);
        assert_eq!(pg_type_len("varchar"), -1);
        assert_eq!(pg_type_len("numeric"), -1);
    }

    #[test]
    fn test_unknown_defaults_to_text() {
        assert_eq!(pg_type_oid("geometry"), 25);
        assert_eq!(pg_type_len("geometry"), -1);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(pg_type_oid("VarChar"), 1043);
        assert_eq!(pg_type_len("TIMESTAMPTZ"), 8);
    }
}

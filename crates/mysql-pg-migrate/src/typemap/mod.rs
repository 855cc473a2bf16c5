//! Type mapping between MySQL and PostgreSQL.

/// PostgreSQL's limit for `varchar(n)` / `char(n)`.
const PG_MAX_CHAR_LENGTH: i64 = 10_485_760;

/// Map a MySQL column type to PostgreSQL.
///
/// `data_type` is `information_schema.COLUMNS.DATA_TYPE` (e.g. `int`) and
/// `column_type` the full `COLUMN_TYPE` (e.g. `int(10) unsigned`), which is
/// needed to see `unsigned` and `tinyint(1)`.
pub fn mysql_to_postgres(
    data_type: &str,
    column_type: &str,
    max_length: i64,
    precision: i64,
    scale: i64,
) -> String {
    let column_type = column_type.to_lowercase();
    let unsigned = column_type.contains("unsigned");

    match data_type.to_lowercase().as_str() {
        // Boolean
        "tinyint" if column_type.starts_with("tinyint(1)") => "boolean".to_string(),
        "bool" | "boolean" => "boolean".to_string(),

        // Integer types; unsigned values need the next wider type
        "tinyint" => "smallint".to_string(),
        "smallint" if unsigned => "integer".to_string(),
        "smallint" => "smallint".to_string(),
        "mediumint" => "integer".to_string(),
        "int" | "integer" if unsigned => "bigint".to_string(),
        "int" | "integer" => "integer".to_string(),
        "bigint" if unsigned => "numeric(20)".to_string(),
        "bigint" => "bigint".to_string(),
        "bit" if precision == 1 || column_type == "bit(1)" => "boolean".to_string(),
        "bit" => {
            if precision > 1 {
                format!("bit varying({})", precision)
            } else {
                "bit varying".to_string()
            }
        }

        // Decimal/numeric
        "decimal" | "numeric" => {
            if precision > 0 {
                format!("numeric({},{})", precision, scale)
            } else {
                "numeric".to_string()
            }
        }

        // Floating point
        "float" => "real".to_string(),
        "double" | "real" => "double precision".to_string(),

        // String types
        "char" => {
            if max_length > 0 && max_length <= PG_MAX_CHAR_LENGTH {
                format!("char({})", max_length)
            } else {
                "text".to_string()
            }
        }
        "varchar" => {
            if max_length > 0 && max_length <= PG_MAX_CHAR_LENGTH {
                format!("varchar({})", max_length)
            } else {
                "text".to_string()
            }
        }
        "tinytext" | "text" | "mediumtext" | "longtext" => "text".to_string(),

        // Enum and set values are checked by a constraint, not a type
        "enum" | "set" => "varchar(255)".to_string(),

        // Binary types
        "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
            "bytea".to_string()
        }

        // Date/time types
        "date" => "date".to_string(),
        "time" => "time".to_string(),
        "datetime" | "timestamp" => "timestamp".to_string(),
        "year" => "smallint".to_string(),

        // JSON
        "json" => "jsonb".to_string(),

        // Spatial types
        "point" => "point".to_string(),
        "geometry" | "linestring" | "polygon" | "multipoint" | "multilinestring"
        | "multipolygon" | "geometrycollection" => "text".to_string(),

        // Default fallback
        _ => "text".to_string(),
    }
}

/// Whether values of this PostgreSQL type are copied as hex-escaped bytea.
pub fn is_binary(pg_type: &str) -> bool {
    pg_type == "bytea"
}

/// Whether values of this PostgreSQL type are copied as `t`/`f`.
pub fn is_boolean(pg_type: &str) -> bool {
    pg_type == "boolean"
}

/// PostgreSQL value standing in for MySQL's zero date (`0000-00-00`), which
/// `date` and `timestamp` reject.
pub const ZERO_DATE: &str = "-infinity";

/// Whether a MySQL date or datetime literal is the zero date.
pub fn is_zero_date(value: &str) -> bool {
    value.starts_with("0000-00-00")
}

/// Whether this PostgreSQL type holds dates (`date`, `timestamp`).
pub fn is_date_or_timestamp(pg_type: &str) -> bool {
    pg_type == "date" || pg_type.starts_with("timestamp")
}

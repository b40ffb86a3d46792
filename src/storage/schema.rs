use duckdb::Connection;

/// SQL statement to create the user management schema.
pub const CREATE_USERMANAGEMENT_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS usermanagement";

/// SQL statement to create the usage log table.
pub const CREATE_HISTORY_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS usermanagement.history (
    service         VARCHAR NOT NULL,
    collection      VARCHAR NOT NULL,
    resourceid      VARCHAR,
    email           VARCHAR,
    querytime       TIMESTAMP NOT NULL
)
";

/// SQL statement to create the user profiles table.
pub const CREATE_USERS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS usermanagement.users (
    email               VARCHAR NOT NULL,
    country             VARCHAR,
    organizationcountry VARCHAR,
    flags               VARCHAR,
    topics              VARCHAR,
    registrationdate    TIMESTAMP
)
";

/// Initialize the usage log and user profile tables.
pub fn init_schema(conn: &Connection) -> Result<(), duckdb::Error> {
    conn.execute_batch(CREATE_USERMANAGEMENT_SCHEMA)?;
    conn.execute_batch(CREATE_HISTORY_TABLE)?;
    conn.execute_batch(CREATE_USERS_TABLE)?;
    Ok(())
}

/// Initialize the optional statistics schema holding country geometries.
///
/// `schema` must already be a validated identifier (see
/// [`crate::config::is_valid_identifier`]).
pub fn init_statistics_schema(conn: &Connection, schema: &str) -> Result<(), duckdb::Error> {
    conn.execute_batch(&format!(
        "CREATE SCHEMA IF NOT EXISTS {schema};
         CREATE TABLE IF NOT EXISTS {schema}.countries (
             identifier  VARCHAR PRIMARY KEY,
             name        VARCHAR NOT NULL,
             geometry    VARCHAR NOT NULL,
             centroid    VARCHAR NOT NULL
         );"
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let mut stmt = conn
            .prepare("SELECT COUNT(*) FROM usermanagement.history")
            .unwrap();
        let count: i64 = stmt.query_row([], |row| row.get(0)).unwrap();
        assert_eq!(count, 0);

        let mut stmt = conn
            .prepare("SELECT COUNT(*) FROM usermanagement.users")
            .unwrap();
        let count: i64 = stmt.query_row([], |row| row.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_init_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn test_history_columns() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO usermanagement.history (service, collection, resourceid, email, querytime)
             VALUES (?, ?, ?, ?, CAST(? AS TIMESTAMP))",
            duckdb::params![
                "download",
                "S2",
                "a1b2c3",
                "user@example.com",
                "2024-01-15 10:30:00"
            ],
        )
        .unwrap();

        let mut stmt = conn
            .prepare("SELECT COUNT(*) FROM usermanagement.history")
            .unwrap();
        let count: i64 = stmt.query_row([], |row| row.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_init_statistics_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_statistics_schema(&conn, "statistics").unwrap();
        init_statistics_schema(&conn, "statistics").unwrap();

        let mut stmt = conn
            .prepare("SELECT COUNT(*) FROM statistics.countries")
            .unwrap();
        let count: i64 = stmt.query_row([], |row| row.get(0)).unwrap();
        assert_eq!(count, 0);
    }
}

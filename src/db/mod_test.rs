use super::*;

#[test]
fn backend_kind_from_url() {
    assert_eq!(BackendKind::from_url("sqlite://teleop.db"), BackendKind::Sqlite);
    assert_eq!(BackendKind::from_url("sqlite::memory:"), BackendKind::Sqlite);
    assert_eq!(BackendKind::from_url("postgres://u:p@localhost/teleop"), BackendKind::Postgres);
}

#[test]
fn schema_uses_dialect_primary_key() {
    let sqlite = schema_statements(BackendKind::Sqlite).join("\n");
    assert!(sqlite.contains("INTEGER PRIMARY KEY AUTOINCREMENT"));
    assert!(!sqlite.contains("BIGSERIAL"));

    let postgres = schema_statements(BackendKind::Postgres).join("\n");
    assert!(postgres.contains("BIGSERIAL PRIMARY KEY"));
    assert!(!postgres.contains("AUTOINCREMENT"));
}

#[test]
fn schema_covers_all_tables() {
    let ddl = schema_statements(BackendKind::Sqlite).join("\n");
    for table in ["robots", "sessions", "frames", "video_chunks"] {
        assert!(ddl.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")), "missing {table}");
    }
}

#[tokio::test]
async fn init_pool_in_memory_bootstraps_schema() {
    let pool = init_pool("sqlite::memory:", 4).await.expect("pool init");
    // Schema exists: an insert against each table succeeds.
    sqlx::query("INSERT INTO robots (robot_id, name, robot_type, status, last_heartbeat) VALUES ($1, $2, $3, $4, $5)")
        .bind("robot-001")
        .bind("robot-001")
        .bind("so100")
        .bind("online")
        .bind(0.0_f64)
        .execute(&pool)
        .await
        .expect("robots insert");
}

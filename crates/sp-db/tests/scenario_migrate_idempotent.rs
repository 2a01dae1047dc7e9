//! Running migrations twice is a no-op and leaves the schema usable.

#[tokio::test]
async fn migrate_twice_then_status_reports_schema() -> anyhow::Result<()> {
    if std::env::var(sp_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: SP_DATABASE_URL not set");
        return Ok(());
    }
    let pool = sp_db::connect_from_env().await?;
    sp_db::migrate(&pool).await?;
    sp_db::migrate(&pool).await?;

    let st = sp_db::status(&pool).await?;
    assert!(st.ok);
    assert!(st.has_sessions_table);
    Ok(())
}

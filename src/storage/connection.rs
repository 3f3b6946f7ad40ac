use crate::storage::entity::{alpha, alpha_template, data_field, queue_item};
use log::info;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr, Schema,
    Statement,
};
use std::time::Duration;

pub async fn establish_connection(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    establish_connection_with(db_url, 10).await
}

/// 建立连接并初始化表
///
/// 内存库只能用一个连接，且连接不能过期，否则数据随连接一起丢失。
pub async fn establish_connection_with(
    db_url: &str,
    max_connections: u32,
) -> Result<DatabaseConnection, DbErr> {
    let in_memory = db_url.contains(":memory:");
    let mut opt = ConnectOptions::new(db_url.to_owned());
    opt.connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(false);
    if in_memory {
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(max_connections.max(1))
            .min_connections(1)
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(1800));
    }

    let db = Database::connect(opt).await?;

    if !in_memory {
        // 启用 WAL 模式
        db.execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            "PRAGMA journal_mode=WAL;".to_string(),
        ))
        .await?;
    }
    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        "PRAGMA busy_timeout=5000;".to_string(),
    ))
    .await?;

    // 创建表（如果不存在）
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    db.execute(builder.build(schema.create_table_from_entity(alpha::Entity).if_not_exists()))
        .await?;
    db.execute(builder.build(schema.create_table_from_entity(queue_item::Entity).if_not_exists()))
        .await?;
    db.execute(builder.build(schema.create_table_from_entity(data_field::Entity).if_not_exists()))
        .await?;
    db.execute(
        builder.build(
            schema
                .create_table_from_entity(alpha_template::Entity)
                .if_not_exists(),
        ),
    )
    .await?;

    // 唯一索引：同一字段在同一作用域只保留一行
    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_data_fields_scope ON data_fields(field_id, region, universe, delay);".to_string(),
    ))
    .await?;
    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        "CREATE INDEX IF NOT EXISTS idx_alpha_queue_template ON alpha_queue(template_id);"
            .to_string(),
    ))
    .await?;

    info!("✓ 数据库已连接并完成表初始化: {}", db_url);

    Ok(db)
}

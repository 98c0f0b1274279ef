//! Schema bootstrap.
//!
//! Migrations are applied in order, each in its own transaction, and recorded
//! in `schema_version`. Startup is idempotent: already-applied versions are
//! skipped. Full-text support is probed before anything else because search
//! depends on it.

use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::error::{GalleryError, Result};

struct Migration {
    version: i64,
    name: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "registry and rating log",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS images (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                relpath TEXT NOT NULL UNIQUE,
                category TEXT,
                filename TEXT NOT NULL,
                rating_count INTEGER NOT NULL DEFAULT 0,
                rating_avg REAL NOT NULL DEFAULT 0.0,
                added_ts INTEGER NOT NULL,
                last_seen_ts INTEGER
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS ratings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                image_id TEXT NOT NULL,
                score REAL NOT NULL,
                note TEXT,
                ts INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_images_relpath ON images(relpath)",
            "CREATE INDEX IF NOT EXISTS idx_images_rating_count ON images(rating_count)",
            "CREATE INDEX IF NOT EXISTS idx_images_category ON images(category)",
            "CREATE INDEX IF NOT EXISTS idx_ratings_image_id ON ratings(image_id)",
        ],
    },
    Migration {
        version: 2,
        name: "tag associations",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS image_tags (
                relpath TEXT NOT NULL,
                tag TEXT NOT NULL,
                normalized_tag TEXT NOT NULL,
                PRIMARY KEY (relpath, tag)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_image_tags_normalized ON image_tags(normalized_tag)",
            "CREATE INDEX IF NOT EXISTS idx_image_tags_relpath ON image_tags(relpath)",
        ],
    },
    Migration {
        version: 3,
        name: "drop legacy derived objects",
        statements: &[
            "DROP VIEW IF EXISTS image_tags_norm",
            "DROP TRIGGER IF EXISTS images_ai",
            "DROP TRIGGER IF EXISTS images_ad",
            "DROP TRIGGER IF EXISTS images_au",
            // Older layouts used an external-content table; the current one is
            // created fresh by the next migration.
            "DROP TABLE IF EXISTS images_fts",
        ],
    },
    Migration {
        version: 4,
        name: "trigram search index",
        statements: &[
            crate::fts::CREATE_FTS_TABLE,
            crate::fts::INSERT_MISSING_ROWS,
        ],
    },
];

/// Fails unless SQLite was built with FTS5 and the trigram tokenizer.
pub async fn probe_full_text(pool: &SqlitePool) -> Result<()> {
    let probe = async {
        sqlx::query("CREATE VIRTUAL TABLE IF NOT EXISTS temp.__fts5_probe USING fts5(x, tokenize='trigram')")
            .execute(pool)
            .await?;
        sqlx::query("DROP TABLE IF EXISTS temp.__fts5_probe")
            .execute(pool)
            .await?;
        Ok::<(), sqlx::Error>(())
    };
    probe.await.map_err(|e| {
        GalleryError::Config(format!(
            "SQLite full-text search (FTS5 with trigram tokenizer) is unavailable: {}",
            e
        ))
    })
}

async fn current_version(pool: &SqlitePool) -> Result<i64> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY, applied_at INTEGER NOT NULL)",
    )
    .execute(pool)
    .await?;

    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    probe_full_text(pool).await?;

    let current = current_version(pool).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut tx = pool.begin().await?;
        for statement in migration.statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(migration.version)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(version = migration.version, name = migration.name, "applied migration");
    }

    Ok(())
}

/// Latest schema version this build knows about.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Connects, probes full-text support, and migrates. Used at every startup.
pub async fn open(config: &Config) -> Result<SqlitePool> {
    let pool = db::connect(config).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

pub async fn run_init(config: &Config) -> anyhow::Result<()> {
    let pool = open(config).await?;
    let version = current_version(&pool).await?;
    println!("Database initialized successfully (schema version {}).", version);
    pool.close().await;
    Ok(())
}

use anyhow::{bail, Context, Result};
use log::info;
use rusqlite::Connection;

const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Bring the schema up to [`CURRENT_SCHEMA_VERSION`]. Each step commits on its
/// own together with its `user_version` bump, so an interrupted upgrade
/// resumes at the first step that did not land.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let installed = schema_version(conn)?;
    if installed > CURRENT_SCHEMA_VERSION {
        bail!(
            "database schema v{installed} is newer than this build supports (v{CURRENT_SCHEMA_VERSION})"
        );
    }

    for target in (installed + 1)..=CURRENT_SCHEMA_VERSION {
        let tx = conn
            .transaction()
            .with_context(|| format!("failed to open transaction for schema v{target}"))?;
        tx.execute_batch(migration_script(target)?)
            .with_context(|| format!("failed to execute schema_v{target}.sql"))?;
        tx.pragma_update(None, "user_version", target)
            .context("failed to update user_version pragma")?;
        tx.commit()
            .with_context(|| format!("failed to commit schema v{target}"))?;
        info!("Database schema migrated to v{target}");
    }

    Ok(())
}

fn schema_version(conn: &Connection) -> Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")
}

fn migration_script(version: i32) -> Result<&'static str> {
    Ok(match version {
        1 => include_str!("schemas/schema_v1.sql"),
        2 => include_str!("schemas/schema_v2.sql"),
        _ => bail!("no migration script for schema v{version}"),
    })
}

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{connection::Database, models::SubscriptionState};

/// Upserts the checkpoint for `service`. The stored cursor only moves forward.
pub(super) fn write_cursor(conn: &Connection, service: &str, cursor: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO subscription_state (service, cursor)
         VALUES (?1, ?2)
         ON CONFLICT(service) DO UPDATE
         SET cursor = MAX(subscription_state.cursor, excluded.cursor)",
        params![service, cursor],
    )?;
    Ok(())
}

impl Database {
    pub async fn get_cursor(&self, service: &str) -> Result<Option<i64>> {
        Ok(self
            .get_subscription_state(service)
            .await?
            .map(|state| state.cursor))
    }

    pub async fn get_subscription_state(&self, service: &str) -> Result<Option<SubscriptionState>> {
        let service = service.to_string();
        self.read(move |conn| {
            let state = conn
                .query_row(
                    "SELECT service, cursor FROM subscription_state WHERE service = ?1",
                    params![service],
                    |row| {
                        Ok(SubscriptionState {
                            service: row.get(0)?,
                            cursor: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(state)
        })
        .await
    }

    pub async fn set_cursor(&self, service: &str, cursor: i64) -> Result<()> {
        let service = service.to_string();
        self.execute(move |conn| {
            write_cursor(conn, &service, cursor)
                .with_context(|| format!("failed to checkpoint {service}"))
        })
        .await
    }
}

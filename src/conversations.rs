use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};

/// Append-only record of one fully resolved completion. Written exactly once
/// per resolved request; never on transport failure, never mutated.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub account_id: String,
    pub api_key_id: String,
    pub provider_mapping_id: String,
    pub input: String,
    pub output: String,
    pub input_token_count: u64,
    pub output_token_count: u64,
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub account_id: String,
    pub api_key_id: String,
    pub provider_mapping_id: String,
    pub input: String,
    pub output: String,
    pub input_token_count: u64,
    pub output_token_count: u64,
}

#[derive(Clone)]
pub struct ConversationStore {
    pool: Pool<Sqlite>,
}

impl ConversationStore {
    pub async fn new(pool: Pool<Sqlite>) -> Result<Self, String> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversations (\
             id TEXT PRIMARY KEY,\
             account_id TEXT NOT NULL,\
             api_key_id TEXT NOT NULL,\
             provider_mapping_id TEXT NOT NULL,\
             input TEXT NOT NULL,\
             output TEXT NOT NULL,\
             input_token_count INTEGER NOT NULL,\
             output_token_count INTEGER NOT NULL,\
             created_at TEXT NOT NULL\
             )",
        )
        .execute(&pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(Self { pool })
    }

    pub async fn append(&self, record: NewConversation) -> Result<(), String> {
        sqlx::query(
            "INSERT INTO conversations\
             (id, account_id, api_key_id, provider_mapping_id, input, output,\
              input_token_count, output_token_count, created_at)\
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&record.account_id)
        .bind(&record.api_key_id)
        .bind(&record.provider_mapping_id)
        .bind(&record.input)
        .bind(&record.output)
        .bind(record.input_token_count as i64)
        .bind(record.output_token_count as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub async fn list_for_account(&self, account_id: &str) -> Result<Vec<ConversationRow>, String> {
        let rows = sqlx::query(
            "SELECT id, account_id, api_key_id, provider_mapping_id, input, output,\
             input_token_count, output_token_count \
             FROM conversations WHERE account_id = ? ORDER BY created_at",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(ConversationRow {
                id: row.try_get("id").map_err(|e| e.to_string())?,
                account_id: row.try_get("account_id").map_err(|e| e.to_string())?,
                api_key_id: row.try_get("api_key_id").map_err(|e| e.to_string())?,
                provider_mapping_id: row
                    .try_get("provider_mapping_id")
                    .map_err(|e| e.to_string())?,
                input: row.try_get("input").map_err(|e| e.to_string())?,
                output: row.try_get("output").map_err(|e| e.to_string())?,
                input_token_count: row
                    .try_get::<i64, _>("input_token_count")
                    .map_err(|e| e.to_string())? as u64,
                output_token_count: row
                    .try_get::<i64, _>("output_token_count")
                    .map_err(|e| e.to_string())? as u64,
            });
        }
        Ok(out)
    }
}

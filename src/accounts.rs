use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};

/// Account holding a spendable credit balance. The gateway only reads the
/// balance and debits it; balance top-ups belong to external payment flows.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub credits: f64,
}

/// Caller credential. Looked up by raw bearer value; disabled or deleted keys
/// never authenticate.
#[derive(Debug, Clone)]
pub struct ApiKey {
    pub id: String,
    pub account_id: String,
    pub api_key: String,
    pub disabled: bool,
    pub deleted: bool,
    pub credits_consumed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingErrorKind {
    NotFound,
    InsufficientBalance,
    Internal,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("billing error: {message}")]
pub struct BillingError {
    pub kind: BillingErrorKind,
    pub message: String,
}

impl BillingError {
    pub fn new(kind: BillingErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct AccountStore {
    pool: Pool<Sqlite>,
}

impl AccountStore {
    pub async fn new(pool: Pool<Sqlite>) -> Result<Self, String> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS accounts (\
             id TEXT PRIMARY KEY,\
             name TEXT NOT NULL,\
             credits REAL NOT NULL DEFAULT 0,\
             created_at TEXT NOT NULL\
             )",
        )
        .execute(&pool)
        .await
        .map_err(|e| e.to_string())?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS api_keys (\
             id TEXT PRIMARY KEY,\
             account_id TEXT NOT NULL,\
             api_key TEXT NOT NULL UNIQUE,\
             disabled INTEGER NOT NULL DEFAULT 0,\
             deleted INTEGER NOT NULL DEFAULT 0,\
             credits_consumed REAL NOT NULL DEFAULT 0,\
             created_at TEXT NOT NULL\
             )",
        )
        .execute(&pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(Self { pool })
    }

    pub async fn create_account(&self, name: &str, credits: f64) -> Result<Account, String> {
        let account = Account {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            credits,
        };
        sqlx::query("INSERT INTO accounts (id, name, credits, created_at) VALUES (?, ?, ?, ?)")
            .bind(&account.id)
            .bind(&account.name)
            .bind(account.credits)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        Ok(account)
    }

    pub async fn create_api_key(&self, account_id: &str, token: &str) -> Result<ApiKey, String> {
        let key = ApiKey {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            api_key: token.to_string(),
            disabled: false,
            deleted: false,
            credits_consumed: 0.0,
        };
        sqlx::query(
            "INSERT INTO api_keys (id, account_id, api_key, disabled, deleted, credits_consumed, created_at)\
             VALUES (?, ?, ?, 0, 0, 0, ?)",
        )
        .bind(&key.id)
        .bind(&key.account_id)
        .bind(&key.api_key)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(key)
    }

    pub async fn set_key_disabled(&self, key_id: &str, disabled: bool) -> Result<(), String> {
        sqlx::query("UPDATE api_keys SET disabled = ? WHERE id = ?")
            .bind(if disabled { 1 } else { 0 })
            .bind(key_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Exact bearer match, filtered to keys that are neither disabled nor
    /// deleted.
    pub async fn find_active_key(&self, token: &str) -> Result<Option<(ApiKey, Account)>, String> {
        let row = sqlx::query(
            "SELECT k.id, k.account_id, k.api_key, k.disabled, k.deleted, k.credits_consumed,\
             a.name, a.credits \
             FROM api_keys k JOIN accounts a ON a.id = k.account_id \
             WHERE k.api_key = ? AND k.disabled = 0 AND k.deleted = 0",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        let Some(row) = row else {
            return Ok(None);
        };
        let key = ApiKey {
            id: row.try_get("id").map_err(|e| e.to_string())?,
            account_id: row.try_get("account_id").map_err(|e| e.to_string())?,
            api_key: row.try_get("api_key").map_err(|e| e.to_string())?,
            disabled: row.try_get::<i32, _>("disabled").map_err(|e| e.to_string())? == 1,
            deleted: row.try_get::<i32, _>("deleted").map_err(|e| e.to_string())? == 1,
            credits_consumed: row.try_get("credits_consumed").map_err(|e| e.to_string())?,
        };
        let account = Account {
            id: key.account_id.clone(),
            name: row.try_get("name").map_err(|e| e.to_string())?,
            credits: row.try_get("credits").map_err(|e| e.to_string())?,
        };
        Ok(Some((key, account)))
    }

    pub async fn read_credits(&self, account_id: &str) -> Result<Option<f64>, String> {
        let row = sqlx::query("SELECT credits FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        row.map(|r| r.try_get("credits").map_err(|e| e.to_string()))
            .transpose()
    }

    /// Atomic conditional decrement: the balance never goes below zero even
    /// under concurrent debits. The original system read the balance and
    /// wrote the decrement as two separate operations; that race is fixed
    /// here, not preserved.
    pub async fn debit_credits(&self, account_id: &str, amount: f64) -> Result<(), BillingError> {
        if amount <= 0.0 {
            return Ok(());
        }
        let result = sqlx::query(
            "UPDATE accounts SET credits = credits - ? WHERE id = ? AND credits >= ?",
        )
        .bind(amount)
        .bind(account_id)
        .bind(amount)
        .execute(&self.pool)
        .await
        .map_err(|e| BillingError::new(BillingErrorKind::Internal, e.to_string()))?;
        if result.rows_affected() == 1 {
            return Ok(());
        }
        let exists = self
            .read_credits(account_id)
            .await
            .map_err(|e| BillingError::new(BillingErrorKind::Internal, e))?;
        match exists {
            Some(_) => Err(BillingError::new(
                BillingErrorKind::InsufficientBalance,
                "insufficient balance for debit",
            )),
            None => Err(BillingError::new(
                BillingErrorKind::NotFound,
                "account not found",
            )),
        }
    }

    pub async fn increment_consumed(&self, key_id: &str, amount: f64) -> Result<(), String> {
        sqlx::query("UPDATE api_keys SET credits_consumed = credits_consumed + ? WHERE id = ?")
            .bind(amount)
            .bind(key_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub async fn get_api_key_by_id(&self, id: &str) -> Result<Option<ApiKey>, String> {
        let row = sqlx::query(
            "SELECT id, account_id, api_key, disabled, deleted, credits_consumed \
             FROM api_keys WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(ApiKey {
            id: row.try_get("id").map_err(|e| e.to_string())?,
            account_id: row.try_get("account_id").map_err(|e| e.to_string())?,
            api_key: row.try_get("api_key").map_err(|e| e.to_string())?,
            disabled: row.try_get::<i32, _>("disabled").map_err(|e| e.to_string())? == 1,
            deleted: row.try_get::<i32, _>("deleted").map_err(|e| e.to_string())? == 1,
            credits_consumed: row.try_get("credits_consumed").map_err(|e| e.to_string())?,
        }))
    }
}

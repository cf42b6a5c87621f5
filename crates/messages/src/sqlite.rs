use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    murmur_protocol::{Identity, MessageView, Participant},
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
    tracing::debug,
};

use crate::store::{MessageStore, StoredMessage, new_message_id};

/// SQLite-backed message store.
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    sender_id: String,
    sender_name: Option<String>,
    recipient_id: String,
    recipient_name: Option<String>,
    content: String,
    created_at: i64,
}

impl From<MessageRow> for MessageView {
    fn from(r: MessageRow) -> Self {
        Self {
            id: r.id,
            sender: Participant {
                id: r.sender_id,
                username: r.sender_name,
            },
            recipient: Participant {
                id: r.recipient_id,
                username: r.recipient_name,
            },
            content: r.content,
            created_at: from_millis(r.created_at),
        }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

const SELECT_ENRICHED: &str = r#"
    SELECT m.id, m.sender_id, su.username AS sender_name,
           m.recipient_id, ru.username AS recipient_name,
           m.content, m.created_at
    FROM messages m
    LEFT JOIN users su ON su.user_id = m.sender_id
    LEFT JOIN users ru ON ru.user_id = m.recipient_id"#;

impl SqliteMessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new().connect(url).await?;
        Self::init(&pool).await?;
        debug!(url, "message store ready");
        Ok(Self::new(pool))
    }

    /// Create the `users` and `messages` tables if they don't exist.
    pub async fn init(pool: &SqlitePool) -> anyhow::Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS users (
                user_id    TEXT PRIMARY KEY,
                username   TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS messages (
                seq          INTEGER PRIMARY KEY AUTOINCREMENT,
                id           TEXT NOT NULL UNIQUE,
                sender_id    TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                content      TEXT NOT NULL,
                created_at   INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_pair
             ON messages (sender_id, recipient_id, created_at)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn remember_user(&self, identity: &Identity) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO users (user_id, username, updated_at)
               VALUES (?, ?, ?)
               ON CONFLICT(user_id) DO UPDATE SET
                 username = excluded.username,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&identity.user_id)
        .bind(&identity.username)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create(
        &self,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
    ) -> anyhow::Result<StoredMessage> {
        let id = new_message_id();
        let created_at = Utc::now();
        sqlx::query(
            r#"INSERT INTO messages (id, sender_id, recipient_id, content, created_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(sender_id)
        .bind(recipient_id)
        .bind(content)
        .bind(created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(StoredMessage {
            id,
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            content: content.to_string(),
            // Round-trip through millis so the value matches what `enrich` reads back.
            created_at: from_millis(created_at.timestamp_millis()),
        })
    }

    async fn enrich(&self, message_id: &str) -> anyhow::Result<Option<MessageView>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!("{SELECT_ENRICHED} WHERE m.id = ?"))
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn history(&self, user_a: &str, user_b: &str) -> anyhow::Result<Vec<MessageView>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "{SELECT_ENRICHED}
             WHERE (m.sender_id = ? AND m.recipient_id = ?)
                OR (m.sender_id = ? AND m.recipient_id = ?)
             ORDER BY m.created_at ASC, m.seq ASC"
        ))
        .bind(user_a)
        .bind(user_b)
        .bind(user_b)
        .bind(user_a)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

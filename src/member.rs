// ============================================================================
// Member Store Interface
// ============================================================================
//
// The account storage layer belongs to the host application; the sync
// protocol only consumes this interface. The reference PostgreSQL
// implementation below is what the standalone binary runs with; an
// embedding application supplies its own implementation instead.
//
// `external_id` is the identity link: on a slave installation it holds
// the master-assigned subject id, so a mutation arriving with the
// master's id can be matched to the right local account even when
// usernames or emails have diverged.
//
// ============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// How the `id` request parameter should be resolved when no external
/// identity link matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdType {
    Username,
    Email,
    /// Try email first, fall back to username.
    EmailThenUsername,
}

impl IdType {
    /// Wire encoding: 1 = username, 2 = email, 3 = email-then-username.
    pub fn from_wire(value: Option<&str>) -> Self {
        match value {
            Some("2") => IdType::Email,
            Some("3") => IdType::EmailThenUsername,
            _ => IdType::Username,
        }
    }

    pub fn to_wire(self) -> &'static str {
        match self {
            IdType::Username => "1",
            IdType::Email => "2",
            IdType::EmailThenUsername => "3",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Member {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub validated: bool,
    pub banned: bool,
    /// Master-assigned identity id this local account is linked to.
    pub external_id: Option<String>,
}

#[async_trait::async_trait]
pub trait MemberStore: Send + Sync {
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Member>>;
    async fn find_by_username(&self, username: &str) -> Result<Option<Member>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Member>>;

    async fn create(&self, member: &Member) -> Result<()>;
    async fn save(&self, member: &Member) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Fold the source account into the destination. Content ownership
    /// transfer is the host application's concern; at this layer the
    /// source account ceases to exist.
    async fn merge(&self, source: Uuid, dest: Uuid) -> Result<()>;
}

/// Resolve a subject reference the way every inbound mutation does:
/// the external identity link wins, then the declared id type.
pub async fn resolve_subject(
    store: &dyn MemberStore,
    id: &str,
    id_type: IdType,
) -> Result<Option<Member>> {
    if let Some(member) = store.find_by_external_id(id).await? {
        return Ok(Some(member));
    }
    match id_type {
        IdType::Username => store.find_by_username(id).await,
        IdType::Email => store.find_by_email(id).await,
        IdType::EmailThenUsername => {
            if let Some(member) = store.find_by_email(id).await? {
                Ok(Some(member))
            } else {
                store.find_by_username(id).await
            }
        }
    }
}

/// Reference PostgreSQL member store used by the standalone binary.
pub struct PostgresMemberStore {
    pool: PgPool,
}

impl PostgresMemberStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MemberStore for PostgresMemberStore {
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Member>> {
        sqlx::query_as::<_, Member>(
            r#"
            SELECT id, username, email, password_hash, validated, banned, external_id
            FROM members
            WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load member by external id")
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Member>> {
        sqlx::query_as::<_, Member>(
            r#"
            SELECT id, username, email, password_hash, validated, banned, external_id
            FROM members
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load member by username")
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Member>> {
        sqlx::query_as::<_, Member>(
            r#"
            SELECT id, username, email, password_hash, validated, banned, external_id
            FROM members
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load member by email")
    }

    async fn create(&self, member: &Member) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO members (id, username, email, password_hash, validated, banned, external_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(member.id)
        .bind(&member.username)
        .bind(&member.email)
        .bind(&member.password_hash)
        .bind(member.validated)
        .bind(member.banned)
        .bind(&member.external_id)
        .execute(&self.pool)
        .await
        .context("Failed to create member")?;
        Ok(())
    }

    async fn save(&self, member: &Member) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE members
            SET username = $2, email = $3, password_hash = $4,
                validated = $5, banned = $6, external_id = $7
            WHERE id = $1
            "#,
        )
        .bind(member.id)
        .bind(&member.username)
        .bind(&member.email)
        .bind(&member.password_hash)
        .bind(member.validated)
        .bind(member.banned)
        .bind(&member.external_id)
        .execute(&self.pool)
        .await
        .context("Failed to save member")?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM members WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete member")?;
        Ok(())
    }

    async fn merge(&self, source: Uuid, dest: Uuid) -> Result<()> {
        // The destination keeps its own credentials; the source simply
        // ceases to exist at this layer.
        let _ = dest;
        self.delete(source).await
    }
}

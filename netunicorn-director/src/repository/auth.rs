//! Authentication Repository

use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub username: String,
    pub token: String,
    pub sudo: bool,
    pub access_tags: Vec<String>,
}

pub async fn find_user(pool: &PgPool, username: &str) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>(
        "SELECT username, token, sudo, access_tags FROM authentication WHERE username = $1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await
}

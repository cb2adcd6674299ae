//! Database access. `Entity` owns the pool and exposes one method per
//! operation, grouped by domain in the submodules.

mod activity;
mod analytics;
mod book;
mod booking;
mod event;
mod library;
mod reservation;
mod subscription;
mod user;

pub use event::RegistrationScope;

use crate::{
    auth::AuthUser,
    models::{user::Role, Chunk, PageQuery},
    settings::Settings,
};
use serde::Deserialize;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, QueryBuilder};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Entity {
    pool: PgPool,
    settings: Arc<Settings>,
}

impl Entity {
    pub async fn new(settings: &Settings) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.database.max_connections)
            .connect(&settings.database.url)
            .await?;

        Ok(Entity {
            pool,
            settings: Arc::new(settings.clone()),
        })
    }

    /// Pool that connects on first use.
    #[cfg(test)]
    pub fn new_lazy(settings: &Settings) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.database.max_connections)
            .connect_lazy(&settings.database.url)?;

        Ok(Entity {
            pool,
            settings: Arc::new(settings.clone()),
        })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!().run(&self.pool).await
    }
}

/// Whose rows a list operation may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    Library(i64),
    User(i64),
}

#[derive(Debug, Default, Deserialize)]
pub struct ScopeQuery {
    /// Admins pass `mine=true` to see their own rows as a patron.
    pub mine: Option<bool>,
}

impl Scope {
    pub fn of(auth: &AuthUser, query: &ScopeQuery) -> Scope {
        if query.mine.unwrap_or(false) {
            return Scope::User(auth.id());
        }
        match (auth.role(), auth.user.library_id) {
            (Role::SuperAdmin, _) => Scope::All,
            (Role::Admin, Some(library_id)) => Scope::Library(library_id),
            _ => Scope::User(auth.id()),
        }
    }

    /// Pushes ` AND ...` restricting to this scope. `user_column` and
    /// `library_column` are qualified column names of the query.
    fn push(&self, qb: &mut QueryBuilder<'_, Postgres>, user_column: &str, library_column: &str) {
        match *self {
            Scope::All => {}
            Scope::Library(id) => {
                qb.push(format!(" AND {library_column} = ")).push_bind(id);
            }
            Scope::User(id) => {
                qb.push(format!(" AND {user_column} = ")).push_bind(id);
            }
        }
    }
}

/// Runs the same filtered query twice: once counting, once fetching a page.
/// `filter` pushes `WHERE`-clause fragments starting with ` AND`.
async fn fetch_chunk<T, F>(
    pool: &PgPool,
    select: &str,
    from: &str,
    order: &str,
    page: &PageQuery,
    filter: F,
) -> Result<Chunk<T>, sqlx::Error>
where
    T: for<'r> FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
    F: Fn(&mut QueryBuilder<'_, Postgres>),
{
    let mut count = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) {from} WHERE TRUE"));
    filter(&mut count);
    let (total_count,): (i64,) = count.build_query_as().fetch_one(pool).await?;

    let mut rows = QueryBuilder::<Postgres>::new(format!("{select} {from} WHERE TRUE"));
    filter(&mut rows);
    rows.push(format!(" ORDER BY {order} LIMIT "))
        .push_bind(page.limit())
        .push(" OFFSET ")
        .push_bind(page.offset());
    let items = rows.build_query_as::<T>().fetch_all(pool).await?;

    Ok(Chunk { items, total_count })
}

fn like(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::user::User;
    use chrono::Utc;
    use sqlx::Execute;

    fn auth(role: Role, library_id: Option<i64>) -> AuthUser {
        AuthUser {
            user: User {
                id: 5,
                email: "u@example.com".into(),
                full_name: "U".into(),
                role,
                role_display: String::new(),
                library_id,
                is_active: true,
                date_joined: Utc::now(),
                last_login: None,
            },
            token: "t".into(),
        }
    }

    #[test]
    fn test_scope_of() {
        let none = ScopeQuery::default();
        assert_eq!(Scope::of(&auth(Role::Student, None), &none), Scope::User(5));
        assert_eq!(Scope::of(&auth(Role::Admin, Some(2)), &none), Scope::Library(2));
        assert_eq!(Scope::of(&auth(Role::Admin, None), &none), Scope::User(5));
        assert_eq!(Scope::of(&auth(Role::SuperAdmin, None), &none), Scope::All);

        let mine = ScopeQuery { mine: Some(true) };
        assert_eq!(Scope::of(&auth(Role::SuperAdmin, None), &mine), Scope::User(5));
    }

    #[test]
    fn test_scope_push() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM t WHERE TRUE");
        Scope::Library(3).push(&mut qb, "t.user_id", "t.library_id");
        assert_eq!(qb.build().sql(), "SELECT 1 FROM t WHERE TRUE AND t.library_id = $1");

        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM t WHERE TRUE");
        Scope::All.push(&mut qb, "t.user_id", "t.library_id");
        assert_eq!(qb.build().sql(), "SELECT 1 FROM t WHERE TRUE");
    }

    #[test]
    fn test_like_escapes_wildcards() {
        assert_eq!(like("tolkien"), "%tolkien%");
        assert_eq!(like("100%_a"), "%100\\%\\_a%");
    }

    #[ignore = "requires DATABASE_URL"]
    #[actix_web::test]
    async fn test_connect_and_migrate() {
        let mut settings = Settings::default();
        settings.database.url = std::env::var("DATABASE_URL").unwrap();
        let entity = Entity::new(&settings).await.unwrap();
        entity.migrate().await.unwrap();
    }
}

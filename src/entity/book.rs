use super::{fetch_chunk, like, Entity};
use crate::{
    error::{ApiError, ApiResult},
    models::{
        book::{rebalance_copies, Book, BookData, BookFilter, BookUpdate, Review, ReviewData},
        non_blank, Chunk, PageQuery,
    },
};
use serde_json::json;

const BOOK_SELECT: &str = "SELECT b.*, l.name AS library_name,
    (SELECT AVG(r.rating)::float8 FROM reviews r WHERE r.book_id = b.id) AS average_rating,
    (SELECT COUNT(*) FROM reviews r WHERE r.book_id = b.id) AS review_count";

const BOOK_FROM: &str = "FROM books b JOIN libraries l ON l.id = b.library_id";

impl Entity {
    pub async fn book_create(&self, actor_id: i64, mut data: BookData) -> ApiResult<Book> {
        data.validate().map_err(ApiError::BadRequest)?;
        self.library_get_active(data.library_id).await?;

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO books
                (library_id, title, author, isbn, category, description,
                 total_copies, available_copies, is_premium, created_by, updated_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $8, $9, $9)
             RETURNING id",
        )
        .bind(data.library_id)
        .bind(data.title.trim())
        .bind(data.author.trim())
        .bind(&data.isbn)
        .bind(data.category.trim())
        .bind(&data.description)
        .bind(data.total_copies)
        .bind(data.is_premium)
        .bind(actor_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(actor_id, book_id = id, library_id = data.library_id, "book created");
        self.activity_log(
            Some(actor_id),
            "book.create",
            "book",
            Some(id),
            json!({ "title": data.title, "copies": data.total_copies }),
        )
        .await;

        self.book_get(id).await
    }

    pub async fn book_query(&self, filter: &BookFilter, page: &PageQuery) -> ApiResult<Chunk<Book>> {
        let search = non_blank(filter.search.as_deref()).map(like);
        let category = non_blank(filter.category.as_deref()).map(str::to_string);

        let chunk: Chunk<Book> = fetch_chunk(
            &self.pool,
            BOOK_SELECT,
            BOOK_FROM,
            "b.title, b.id",
            page,
            |qb| {
                if let Some(search) = &search {
                    qb.push(" AND (b.title ILIKE ")
                        .push_bind(search.clone())
                        .push(" OR b.author ILIKE ")
                        .push_bind(search.clone())
                        .push(" OR b.isbn ILIKE ")
                        .push_bind(search.clone())
                        .push(")");
                }
                if let Some(library) = filter.library {
                    qb.push(" AND b.library_id = ").push_bind(library);
                }
                if let Some(category) = &category {
                    qb.push(" AND LOWER(b.category) = LOWER(")
                        .push_bind(category.clone())
                        .push(")");
                }
                match filter.available {
                    Some(true) => {
                        qb.push(" AND b.available_copies > 0");
                    }
                    Some(false) => {
                        qb.push(" AND b.available_copies = 0");
                    }
                    None => {}
                }
                if let Some(is_premium) = filter.is_premium {
                    qb.push(" AND b.is_premium = ").push_bind(is_premium);
                }
                if let Some(active) = filter.library_active {
                    qb.push(" AND l.is_active = ").push_bind(active);
                }
            },
        )
        .await?;

        Ok(Chunk {
            items: chunk.items.into_iter().map(Book::with_display).collect(),
            total_count: chunk.total_count,
        })
    }

    pub async fn book_get(&self, id: i64) -> ApiResult<Book> {
        let sql = format!("{BOOK_SELECT} {BOOK_FROM} WHERE b.id = $1");

        let book = sqlx::query_as::<_, Book>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("book not found"))?;

        Ok(book.with_display())
    }

    pub async fn book_update(&self, actor_id: i64, id: i64, mut update: BookUpdate) -> ApiResult<Book> {
        update.validate().map_err(ApiError::BadRequest)?;

        let mut tx = self.pool.begin().await?;

        let (total, available): (i32, i32) = sqlx::query_as(
            "SELECT total_copies, available_copies FROM books WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut tx)
        .await?
        .ok_or_else(|| ApiError::not_found("book not found"))?;

        let available = match update.total_copies {
            Some(new_total) => {
                if new_total < 0 {
                    return Err(ApiError::bad_request("total_copies must not be negative"));
                }
                Some(rebalance_copies(total, available, new_total).map_err(ApiError::BadRequest)?)
            }
            None => None,
        };

        sqlx::query(
            "UPDATE books SET
                title = COALESCE($2, title),
                author = COALESCE($3, author),
                isbn = COALESCE($4, isbn),
                category = COALESCE($5, category),
                description = COALESCE($6, description),
                total_copies = COALESCE($7, total_copies),
                available_copies = COALESCE($8, available_copies),
                is_premium = COALESCE($9, is_premium),
                updated_by = $10,
                updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.title.as_deref().map(str::trim))
        .bind(update.author.as_deref().map(str::trim))
        .bind(update.isbn.as_deref())
        .bind(update.category.as_deref().map(str::trim))
        .bind(update.description.as_deref())
        .bind(update.total_copies)
        .bind(available)
        .bind(update.is_premium)
        .bind(actor_id)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;

        tracing::info!(actor_id, book_id = id, "book updated");
        self.activity_log(Some(actor_id), "book.update", "book", Some(id), json!({}))
            .await;

        self.book_get(id).await
    }

    /// Refused while a copy is out on an approved reservation.
    pub async fn book_delete(&self, actor_id: i64, id: i64) -> ApiResult<()> {
        let (on_loan,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM book_reservations WHERE book_id = $1 AND status = 'APPROVED'",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        if on_loan > 0 {
            return Err(ApiError::conflict(format!(
                "{on_loan} copies are still on loan"
            )));
        }

        let deleted = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(ApiError::not_found("book not found"));
        }

        tracing::warn!(actor_id, book_id = id, "book deleted");
        self.activity_log(Some(actor_id), "book.delete", "book", Some(id), json!({}))
            .await;
        Ok(())
    }

    pub async fn review_create(&self, user_id: i64, book_id: i64, data: &ReviewData) -> ApiResult<Review> {
        data.validate().map_err(ApiError::BadRequest)?;
        self.book_get(book_id).await?;

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO reviews (book_id, user_id, rating, comment)
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(book_id)
        .bind(user_id)
        .bind(data.rating)
        .bind(data.comment.trim())
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match ApiError::from(err) {
            ApiError::Conflict(_) => ApiError::conflict("you have already reviewed this book"),
            other => other,
        })?;

        let review = sqlx::query_as::<_, Review>(
            "SELECT r.*, u.full_name AS user_name
             FROM reviews r JOIN users u ON u.id = r.user_id WHERE r.id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(review)
    }

    pub async fn review_query(&self, book_id: i64, page: &PageQuery) -> ApiResult<Chunk<Review>> {
        self.book_get(book_id).await?;

        let chunk = fetch_chunk(
            &self.pool,
            "SELECT r.*, u.full_name AS user_name",
            "FROM reviews r JOIN users u ON u.id = r.user_id",
            "r.created_at DESC, r.id DESC",
            page,
            |qb| {
                qb.push(" AND r.book_id = ").push_bind(book_id);
            },
        )
        .await?;

        Ok(chunk)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Book {
    pub id: i64,
    pub library_id: i64,
    pub library_name: String,
    pub title: String,
    pub author: String,
    pub isbn: Option<String>,
    pub category: String,
    pub description: String,
    pub total_copies: i32,
    pub available_copies: i32,
    pub is_premium: bool,
    pub average_rating: Option<f64>,
    pub review_count: i64,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(default)]
    pub is_available: bool,
}

impl Book {
    pub fn with_display(mut self) -> Self {
        self.is_available = self.available_copies > 0;
        self.average_rating = self.average_rating.map(|avg| (avg * 10.0).round() / 10.0);
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct BookData {
    pub library_id: i64,
    pub title: String,
    #[serde(default)]
    pub author: String,
    pub isbn: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub total_copies: i32,
    #[serde(default)]
    pub is_premium: bool,
}

impl BookData {
    /// Validates and replaces `isbn` with its normalized form.
    pub fn validate(&mut self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title is required".into());
        }
        if self.total_copies < 0 {
            return Err("total_copies must not be negative".into());
        }
        if let Some(isbn) = self.isbn.take().filter(|isbn| !isbn.trim().is_empty()) {
            self.isbn = Some(normalize_isbn(&isbn).ok_or_else(|| format!("invalid isbn {isbn:?}"))?);
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BookUpdate {
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub total_copies: Option<i32>,
    pub is_premium: Option<bool>,
}

impl BookUpdate {
    pub fn validate(&mut self) -> Result<(), String> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err("title is required".into());
            }
        }
        if let Some(isbn) = self.isbn.take() {
            self.isbn = Some(normalize_isbn(&isbn).ok_or_else(|| format!("invalid isbn {isbn:?}"))?);
        }
        Ok(())
    }
}

/// New `available_copies` after changing the total, keeping the number of
/// copies currently out on loan.
pub fn rebalance_copies(total: i32, available: i32, new_total: i32) -> Result<i32, String> {
    let on_loan = total - available;
    if new_total < on_loan {
        return Err(format!(
            "total_copies cannot be below the {on_loan} copies currently on loan"
        ));
    }
    Ok(new_total - on_loan)
}

#[derive(Debug, Default, Deserialize)]
pub struct BookFilter {
    pub search: Option<String>,
    pub library: Option<i64>,
    pub category: Option<String>,
    pub available: Option<bool>,
    pub is_premium: Option<bool>,
    pub library_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub isbn: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Review {
    pub id: i64,
    pub book_id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub rating: i16,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewData {
    pub rating: i16,
    #[serde(default)]
    pub comment: String,
}

impl ReviewData {
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=5).contains(&self.rating) {
            return Err("rating must be between 1 and 5".into());
        }
        Ok(())
    }
}

/// Strips separators and checks the ISBN-10 or ISBN-13 check digit.
pub fn normalize_isbn(isbn: &str) -> Option<String> {
    let text: String = isbn
        .chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let valid = match text.len() {
        10 => {
            let sum = text.chars().enumerate().try_fold(0u32, |sum, (i, c)| {
                let value = match c {
                    'X' if i == 9 => 10,
                    c => c.to_digit(10)?,
                };
                Some(sum + value * (10 - i as u32))
            });
            sum.map_or(false, |sum| sum % 11 == 0)
        }
        13 => {
            let sum = text.chars().enumerate().try_fold(0u32, |sum, (i, c)| {
                let weight = if i % 2 == 0 { 1 } else { 3 };
                Some(sum + c.to_digit(10)? * weight)
            });
            sum.map_or(false, |sum| sum % 10 == 0)
        }
        _ => false,
    };

    valid.then_some(text)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_isbn13() {
        assert_eq!(
            normalize_isbn("978-4-7981-2196-3").as_deref(),
            Some("9784798121963")
        );
        assert_eq!(normalize_isbn("9784798121964"), None);
    }

    #[test]
    fn test_isbn10() {
        assert_eq!(normalize_isbn("0-306-40615-2").as_deref(), Some("0306406152"));
        assert_eq!(normalize_isbn("080442957x").as_deref(), Some("080442957X"));
        assert_eq!(normalize_isbn("0306406153"), None);
        assert_eq!(normalize_isbn("X306406152"), None);
    }

    #[test]
    fn test_isbn_wrong_length() {
        assert_eq!(normalize_isbn(""), None);
        assert_eq!(normalize_isbn("12345"), None);
    }

    #[test]
    fn test_rebalance_copies() {
        assert_eq!(rebalance_copies(5, 3, 7), Ok(5));
        assert_eq!(rebalance_copies(5, 3, 2), Ok(0));
        assert!(rebalance_copies(5, 3, 1).is_err());
        assert_eq!(rebalance_copies(0, 0, 4), Ok(4));
    }

    #[test]
    fn test_book_data_normalizes_isbn() {
        let mut data = BookData {
            library_id: 1,
            title: "Domain-Driven Design".into(),
            author: "Eric Evans".into(),
            isbn: Some("978-4-7981-2196-3".into()),
            category: "software".into(),
            description: String::new(),
            total_copies: 3,
            is_premium: false,
        };
        assert!(data.validate().is_ok());
        assert_eq!(data.isbn.as_deref(), Some("9784798121963"));

        data.isbn = Some("   ".into());
        assert!(data.validate().is_ok());
        assert_eq!(data.isbn, None);

        data.isbn = Some("123".into());
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_review_rating_range() {
        assert!(ReviewData { rating: 0, comment: String::new() }.validate().is_err());
        assert!(ReviewData { rating: 6, comment: String::new() }.validate().is_err());
        assert!(ReviewData { rating: 5, comment: "great".into() }.validate().is_ok());
    }
}

//! Wire and row types.
//!
//! Row structs derive `FromRow`; fields marked `#[sqlx(default)]` are
//! computed after loading by the type's `with_display` method.

pub mod activity;
pub mod analytics;
pub mod book;
pub mod booking;
pub mod event;
pub mod library;
pub mod reservation;
pub mod subscription;
pub mod user;

use serde::{Deserialize, Deserializer, Serialize};
use url::form_urlencoded;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Status-like enum stored as TEXT. Generates serde, `FromStr`, display
/// labels and the sqlx codec.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal, $display:literal;)+ }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            pub fn display(&self) -> &'static str {
                match self {
                    $(Self::$variant => $display,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(text: &str) -> Result<Self, Self::Err> {
                match text {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} {other:?}", stringify!($name))),
                }
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let text = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Ok(text.parse::<$name>()?)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> sqlx::encode::IsNull {
                <&str as sqlx::Encode<'q, sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
            }
        }
    };
}

pub(crate) use text_enum;

/// Entity-level result set: one page of rows and the unpaged total.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk<T> {
    pub items: Vec<T>,
    pub total_count: i64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl PageQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size())
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page() - 1) * self.limit()
    }
}

/// Paginated response body: `{count, next, previous, results}`.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub count: i64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    /// `path` and `query_string` are the request's; other query parameters
    /// are carried over into the next/previous links.
    pub fn new(chunk: Chunk<T>, query: &PageQuery, path: &str, query_string: &str) -> Self {
        let page = query.page();
        let seen = query.offset() + chunk.items.len() as i64;

        let next = (!chunk.items.is_empty() && seen < chunk.total_count)
            .then(|| page_link(path, query_string, page + 1));
        let previous = (page > 1).then(|| page_link(path, query_string, page - 1));

        Page {
            count: chunk.total_count,
            next,
            previous,
            results: chunk.items,
        }
    }
}

fn page_link(path: &str, query_string: &str, page: u32) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in form_urlencoded::parse(query_string.as_bytes()) {
        if key != "page" {
            serializer.append_pair(&key, &value);
        }
    }
    serializer.append_pair("page", &page.to_string());
    format!("{path}?{}", serializer.finish())
}

/// Percentage with one decimal place; zero when there is no capacity.
pub fn rate(used: i64, capacity: i64) -> f64 {
    if capacity <= 0 {
        return 0.0;
    }
    (used as f64 * 1000.0 / capacity as f64).round() / 10.0
}

/// Distinguishes an absent field from an explicit `null` in PATCH bodies.
pub fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

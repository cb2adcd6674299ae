use super::rate;
use chrono::{DateTime, NaiveTime, Utc};
use geoutils::Location;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const MAX_SEATS: i32 = 5000;
pub const DEFAULT_NEARBY_LIMIT: u32 = 10;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Library {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub city: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub total_seats: i32,
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub is_active: bool,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Seats held by a CONFIRMED booking right now.
    pub active_bookings: i64,
    #[sqlx(default)]
    pub available_seats: i64,
    #[sqlx(default)]
    pub occupancy_rate: f64,
    #[sqlx(default)]
    pub distance_meters: Option<f64>,
}

impl Library {
    pub fn with_display(mut self) -> Self {
        let seats = i64::from(self.total_seats);
        self.available_seats = (seats - self.active_bookings).max(0);
        self.occupancy_rate = rate(self.active_bookings, seats);
        self
    }

    pub fn geocode(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Seat {
    pub id: i64,
    pub library_id: i64,
    pub seat_number: i32,
    pub is_active: bool,
    /// Free of CONFIRMED bookings for the queried window.
    pub is_available: bool,
}

#[derive(Debug, Deserialize)]
pub struct LibraryData {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub total_seats: i32,
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
}

impl LibraryData {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name is required".into());
        }
        validate_seats(self.total_seats)?;
        validate_hours(self.opening_time, self.closing_time)?;
        validate_geocode(self.latitude, self.longitude)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LibraryUpdate {
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub total_seats: Option<i32>,
    pub opening_time: Option<NaiveTime>,
    pub closing_time: Option<NaiveTime>,
    pub is_active: Option<bool>,
}

impl LibraryUpdate {
    /// Validates the update as applied on top of `current`.
    pub fn validate(&self, current: &Library) -> Result<(), String> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err("name is required".into());
            }
        }
        if let Some(seats) = self.total_seats {
            validate_seats(seats)?;
        }
        validate_hours(
            self.opening_time.unwrap_or(current.opening_time),
            self.closing_time.unwrap_or(current.closing_time),
        )?;
        validate_geocode(
            self.latitude.or(current.latitude),
            self.longitude.or(current.longitude),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LibraryFilter {
    pub search: Option<String>,
    pub city: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SeatQuery {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

fn validate_seats(seats: i32) -> Result<(), String> {
    if !(0..=MAX_SEATS).contains(&seats) {
        return Err(format!("total_seats must be between 0 and {MAX_SEATS}"));
    }
    Ok(())
}

fn validate_hours(opening: NaiveTime, closing: NaiveTime) -> Result<(), String> {
    if opening >= closing {
        return Err("opening_time must be before closing_time".into());
    }
    Ok(())
}

fn validate_geocode(latitude: Option<f64>, longitude: Option<f64>) -> Result<(), String> {
    match (latitude, longitude) {
        (Some(lat), Some(lng)) => {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                return Err("coordinates out of range".into());
            }
            Ok(())
        }
        (None, None) => Ok(()),
        _ => Err("latitude and longitude must be given together".into()),
    }
}

/// Orders libraries with coordinates by distance from `origin`, nearest
/// first, and keeps `limit` of them.
pub fn nearest(libraries: Vec<Library>, origin: (f64, f64), limit: u32) -> Vec<Library> {
    let current = Location::new(origin.0, origin.1);

    let mut items: Vec<_> = libraries
        .into_iter()
        .filter_map(|library| {
            let (lat, lng) = library.geocode()?;
            let meters = Location::new(lat, lng)
                .haversine_distance_to(&current)
                .meters();
            Some(Library {
                distance_meters: Some(meters),
                ..library
            })
        })
        .collect();

    items.sort_by(|a, b| a.distance_meters.partial_cmp(&b.distance_meters).unwrap_or(std::cmp::Ordering::Equal));
    items.truncate(limit as usize);
    items
}

#[cfg(test)]
mod test {
    use super::*;

    fn library(id: i64, geocode: Option<(f64, f64)>) -> Library {
        Library {
            id,
            name: format!("library {id}"),
            address: String::new(),
            city: String::new(),
            latitude: geocode.map(|g| g.0),
            longitude: geocode.map(|g| g.1),
            total_seats: 40,
            opening_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            closing_time: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            is_active: true,
            created_by: None,
            updated_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            active_bookings: 10,
            available_seats: 0,
            occupancy_rate: 0.0,
            distance_meters: None,
        }
    }

    #[test]
    fn test_display_fields() {
        let lib = library(1, None).with_display();
        assert_eq!(lib.available_seats, 30);
        assert_eq!(lib.occupancy_rate, 25.0);

        let mut empty = library(2, None);
        empty.total_seats = 0;
        empty.active_bookings = 0;
        let empty = empty.with_display();
        assert_eq!(empty.available_seats, 0);
        assert_eq!(empty.occupancy_rate, 0.0);
    }

    #[test]
    fn test_nearest_orders_by_distance_and_skips_unplaced() {
        let toyama = library(1, Some((36.6959, 137.2137)));
        let imizu = library(2, Some((36.7077, 137.0958)));
        let tokyo = library(3, Some((35.6812, 139.7671)));
        let nowhere = library(4, None);

        let result = nearest(vec![tokyo, nowhere, toyama, imizu], (36.7077262, 137.0958753), 2);
        let ids: Vec<_> = result.iter().map(|lib| lib.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert!(result[0].distance_meters.unwrap() < 100.0);
    }

    #[test]
    fn test_library_data_validation() {
        let data = LibraryData {
            name: "Central".into(),
            address: String::new(),
            city: String::new(),
            latitude: Some(10.0),
            longitude: None,
            total_seats: 10,
            opening_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            closing_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        };
        assert!(data.validate().unwrap_err().contains("together"));

        let data = LibraryData {
            latitude: None,
            opening_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            ..data
        };
        assert!(data.validate().unwrap_err().contains("opening_time"));
    }

    #[test]
    fn test_update_validated_against_current() {
        let current = library(1, Some((1.0, 1.0)));
        let update = LibraryUpdate {
            closing_time: Some(NaiveTime::from_hms_opt(7, 0, 0).unwrap()),
            ..LibraryUpdate::default()
        };
        assert!(update.validate(&current).is_err());

        let update = LibraryUpdate {
            total_seats: Some(-1),
            ..LibraryUpdate::default()
        };
        assert!(update.validate(&current).is_err());

        let update = LibraryUpdate {
            name: Some("Renamed".into()),
            ..LibraryUpdate::default()
        };
        assert!(update.validate(&current).is_ok());
    }
}

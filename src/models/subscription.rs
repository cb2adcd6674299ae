use super::text_enum;
use crate::settings::Settings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

text_enum!(SubscriptionStatus {
    Active => "ACTIVE", "Active";
    Expired => "EXPIRED", "Expired";
    Cancelled => "CANCELLED", "Cancelled";
});

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SubscriptionPlan {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price_cents: i64,
    pub duration_days: i32,
    pub max_active_reservations: i32,
    pub max_booking_hours: i32,
    pub premium_access: bool,
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct PlanData {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price_cents: i64,
    pub duration_days: i32,
    pub max_active_reservations: i32,
    pub max_booking_hours: i32,
    #[serde(default)]
    pub premium_access: bool,
}

impl PlanData {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name is required".into());
        }
        if self.price_cents < 0 {
            return Err("price_cents must not be negative".into());
        }
        if self.duration_days <= 0 || self.max_active_reservations <= 0 || self.max_booking_hours <= 0 {
            return Err("duration and limits must be positive".into());
        }
        if self.max_booking_hours > 24 {
            return Err("max_booking_hours cannot exceed 24".into());
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub duration_days: Option<i32>,
    pub max_active_reservations: Option<i32>,
    pub max_booking_hours: Option<i32>,
    pub premium_access: Option<bool>,
    pub is_active: Option<bool>,
}

impl PlanUpdate {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.as_deref().map_or(false, |name| name.trim().is_empty()) {
            return Err("name is required".into());
        }
        if self.price_cents.map_or(false, |price| price < 0) {
            return Err("price_cents must not be negative".into());
        }
        let positive = [
            self.duration_days,
            self.max_active_reservations,
            self.max_booking_hours,
        ];
        if positive.iter().flatten().any(|value| *value <= 0) {
            return Err("duration and limits must be positive".into());
        }
        if self.max_booking_hours.map_or(false, |hours| hours > 24) {
            return Err("max_booking_hours cannot exceed 24".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserSubscription {
    pub id: i64,
    pub user_id: i64,
    pub plan_id: i64,
    pub plan_name: String,
    pub status: SubscriptionStatus,
    #[sqlx(default)]
    pub status_display: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub amount_cents: i64,
    #[sqlx(default)]
    pub days_remaining: i64,
}

impl UserSubscription {
    /// An ACTIVE row past its expiry reads as EXPIRED even before the sweep
    /// persists it.
    pub fn with_display(mut self, now: DateTime<Utc>) -> Self {
        if self.status == SubscriptionStatus::Active && self.expires_at <= now {
            self.status = SubscriptionStatus::Expired;
        }
        self.status_display = self.status.display().to_string();
        self.days_remaining = match self.status {
            SubscriptionStatus::Active => (self.expires_at - now).num_days().max(0),
            _ => 0,
        };
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct PurchaseData {
    pub plan_id: i64,
}

/// What a user may do, from their active plan or the free tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessLimits {
    pub max_active_reservations: i32,
    pub max_booking_hours: i32,
    pub premium_access: bool,
}

impl AccessLimits {
    pub fn free(settings: &Settings) -> Self {
        Self {
            max_active_reservations: settings.reservation.max_active_free,
            max_booking_hours: settings.booking.max_hours_free,
            premium_access: false,
        }
    }

    pub fn for_plan(plan: Option<&SubscriptionPlan>, settings: &Settings) -> Self {
        match plan {
            Some(plan) => Self {
                max_active_reservations: plan.max_active_reservations,
                max_booking_hours: plan.max_booking_hours,
                premium_access: plan.premium_access,
            },
            None => Self::free(settings),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Duration;

    fn subscription(status: SubscriptionStatus, expires_in: Duration) -> UserSubscription {
        let now = Utc::now();
        UserSubscription {
            id: 1,
            user_id: 1,
            plan_id: 1,
            plan_name: "Premium".into(),
            status,
            status_display: String::new(),
            started_at: now - Duration::days(1),
            expires_at: now + expires_in,
            cancelled_at: None,
            amount_cents: 999,
            days_remaining: 0,
        }
    }

    #[test]
    fn test_expired_on_read() {
        let now = Utc::now();
        let sub = subscription(SubscriptionStatus::Active, Duration::days(-1)).with_display(now);
        assert_eq!(sub.status, SubscriptionStatus::Expired);
        assert_eq!(sub.status_display, "Expired");
        assert_eq!(sub.days_remaining, 0);

        let sub = subscription(SubscriptionStatus::Active, Duration::days(10) + Duration::hours(1))
            .with_display(now);
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.days_remaining, 10);
    }

    #[test]
    fn test_access_limits() {
        let settings = Settings::default();
        let free = AccessLimits::for_plan(None, &settings);
        assert_eq!(free.max_active_reservations, settings.reservation.max_active_free);
        assert!(!free.premium_access);

        let plan = SubscriptionPlan {
            id: 1,
            name: "Premium".into(),
            description: String::new(),
            price_cents: 999,
            duration_days: 30,
            max_active_reservations: 10,
            max_booking_hours: 8,
            premium_access: true,
            is_active: true,
        };
        let limits = AccessLimits::for_plan(Some(&plan), &settings);
        assert_eq!(limits.max_active_reservations, 10);
        assert_eq!(limits.max_booking_hours, 8);
        assert!(limits.premium_access);
    }

    #[test]
    fn test_plan_validation() {
        let update = PlanUpdate {
            max_booking_hours: Some(0),
            ..PlanUpdate::default()
        };
        assert!(update.validate().is_err());

        let update = PlanUpdate {
            max_booking_hours: Some(25),
            ..PlanUpdate::default()
        };
        assert!(update.validate().is_err());

        assert!(PlanUpdate::default().validate().is_ok());
    }
}

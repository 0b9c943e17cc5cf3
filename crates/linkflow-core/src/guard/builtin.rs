//! Built-in guard kinds.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use regex::Regex;
use serde_json::json;

use super::{Guard, GuardBuildError, GuardViolation};
use crate::context::ExecutionContext;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

// ---------------------------------------------------------------------------
// Business hours
// ---------------------------------------------------------------------------

/// Allows execution only inside a daily hour window on selected weekdays,
/// excluding listed holidays. Times are evaluated in the configured zone.
///
/// When `start_hour > end_hour` the window wraps past midnight.
pub struct BusinessHoursGuard {
    timezone: Tz,
    start_hour: u32,
    end_hour: u32,
    days: Vec<Weekday>,
    holidays: Vec<NaiveDate>,
    clock: Clock,
}

impl BusinessHoursGuard {
    pub fn new(
        timezone: &str,
        start_hour: u32,
        end_hour: u32,
        days: Vec<Weekday>,
        holidays: Vec<NaiveDate>,
    ) -> Result<Self, GuardBuildError> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| GuardBuildError::InvalidConfig(format!("unknown timezone '{timezone}'")))?;
        if start_hour > 24 || end_hour > 24 || start_hour == end_hour {
            return Err(GuardBuildError::InvalidConfig(format!(
                "invalid business hours window {start_hour}..{end_hour}"
            )));
        }
        Ok(Self {
            timezone: tz,
            start_hour,
            end_hour,
            days,
            holidays,
            clock: Arc::new(Utc::now),
        })
    }

    /// Replace the wall clock, mainly for tests.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn check_at(&self, now: DateTime<Utc>) -> Result<(), GuardViolation> {
        let local = now.with_timezone(&self.timezone);
        let date = local.date_naive();
        let hour = local.hour();

        let violation = |reason: &str| {
            GuardViolation::new(reason)
                .with_detail("local_time", local.to_rfc3339())
                .with_detail("timezone", self.timezone.name())
        };

        if self.holidays.contains(&date) {
            return Err(violation("outside business hours: holiday"));
        }
        if !self.days.contains(&local.weekday()) {
            return Err(violation("outside business hours: non-business day"));
        }
        let in_window = if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        };
        if !in_window {
            return Err(violation("outside business hours")
                .with_detail("start_hour", self.start_hour)
                .with_detail("end_hour", self.end_hour));
        }
        Ok(())
    }
}

impl Guard for BusinessHoursGuard {
    fn check(&self, _ctx: &ExecutionContext) -> Result<(), GuardViolation> {
        self.check_at((self.clock)())
    }
}

// ---------------------------------------------------------------------------
// Required fields
// ---------------------------------------------------------------------------

/// Every listed field must resolve to a present, non-empty value.
pub struct RequiredFieldsGuard {
    fields: Vec<String>,
}

impl RequiredFieldsGuard {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

impl Guard for RequiredFieldsGuard {
    fn check(&self, ctx: &ExecutionContext) -> Result<(), GuardViolation> {
        let missing: Vec<&String> = self
            .fields
            .iter()
            .filter(|field| !ctx.lookup(field).is_some_and(|v| v.is_present()))
            .collect();
        match missing.first() {
            None => Ok(()),
            Some(first) => Err(GuardViolation::new(format!(
                "missing required fields: {}",
                missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            ))
            .on_field(first.as_str())
            .with_detail("missing", json!(missing))),
        }
    }
}

// ---------------------------------------------------------------------------
// Pattern
// ---------------------------------------------------------------------------

/// A field's textual value must match a regular expression.
pub struct PatternGuard {
    field: String,
    regex: Regex,
    allow_missing: bool,
}

impl PatternGuard {
    pub fn new(field: impl Into<String>, pattern: &str, allow_missing: bool) -> Result<Self, GuardBuildError> {
        let regex = Regex::new(pattern)
            .map_err(|e| GuardBuildError::InvalidConfig(format!("invalid pattern '{pattern}': {e}")))?;
        Ok(Self {
            field: field.into(),
            regex,
            allow_missing,
        })
    }
}

impl Guard for PatternGuard {
    fn check(&self, ctx: &ExecutionContext) -> Result<(), GuardViolation> {
        let Some(value) = ctx.lookup(&self.field).filter(|v| !v.is_null()) else {
            if self.allow_missing {
                return Ok(());
            }
            return Err(GuardViolation::new(format!("field '{}' is missing", self.field))
                .on_field(&self.field));
        };
        let text = value.to_display_string();
        if self.regex.is_match(&text) {
            Ok(())
        } else {
            Err(GuardViolation::new(format!(
                "field '{}' does not match the required format",
                self.field
            ))
            .on_field(&self.field)
            .with_detail("pattern", self.regex.as_str())
            .with_detail("value", text))
        }
    }
}

// ---------------------------------------------------------------------------
// Numeric range
// ---------------------------------------------------------------------------

/// A field must be numeric and inside optional lower and upper bounds.
pub struct NumericRangeGuard {
    field: String,
    min: Option<f64>,
    max: Option<f64>,
    min_inclusive: bool,
    max_inclusive: bool,
}

impl NumericRangeGuard {
    pub fn new(
        field: impl Into<String>,
        min: Option<f64>,
        max: Option<f64>,
        min_inclusive: bool,
        max_inclusive: bool,
    ) -> Result<Self, GuardBuildError> {
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(GuardBuildError::InvalidConfig(format!(
                    "range minimum {lo} exceeds maximum {hi}"
                )));
            }
        }
        Ok(Self {
            field: field.into(),
            min,
            max,
            min_inclusive,
            max_inclusive,
        })
    }

    fn out_of_range(&self, value: f64) -> GuardViolation {
        GuardViolation::new(format!("field '{}' value {value} is out of range", self.field))
            .on_field(&self.field)
            .with_detail("value", value)
            .with_detail("min", json!(self.min))
            .with_detail("max", json!(self.max))
    }
}

impl Guard for NumericRangeGuard {
    fn check(&self, ctx: &ExecutionContext) -> Result<(), GuardViolation> {
        let Some(value) = ctx.lookup(&self.field) else {
            return Err(GuardViolation::new(format!("field '{}' is missing", self.field))
                .on_field(&self.field));
        };
        let Some(number) = value.as_f64() else {
            return Err(GuardViolation::new(format!("field '{}' is not numeric", self.field))
                .on_field(&self.field)
                .with_detail("kind", value.kind()));
        };
        if !number.is_finite() {
            return Err(GuardViolation::new(format!(
                "field '{}' is not a finite number",
                self.field
            ))
            .on_field(&self.field));
        }

        if let Some(min) = self.min {
            let below = if self.min_inclusive { number < min } else { number <= min };
            if below {
                return Err(self.out_of_range(number));
            }
        }
        if let Some(max) = self.max {
            let above = if self.max_inclusive { number > max } else { number >= max };
            if above {
                return Err(self.out_of_range(number));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

/// The caller must hold `permission` and, when roles are listed, one of them.
pub struct AuthorizationGuard {
    permission: String,
    roles: Vec<String>,
}

impl AuthorizationGuard {
    pub fn new(permission: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            permission: permission.into(),
            roles,
        }
    }
}

impl Guard for AuthorizationGuard {
    fn check(&self, ctx: &ExecutionContext) -> Result<(), GuardViolation> {
        if !ctx.permissions().iter().any(|p| *p == self.permission) {
            return Err(GuardViolation::new(format!(
                "missing permission '{}'",
                self.permission
            ))
            .with_detail("permission", self.permission.as_str()));
        }
        if !self.roles.is_empty() {
            let held = ctx.roles();
            if !held.iter().any(|r| self.roles.contains(r)) {
                return Err(GuardViolation::new("caller holds none of the required roles")
                    .with_detail("required_roles", json!(self.roles)));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Closure guard
// ---------------------------------------------------------------------------

/// Wraps a closure as a guard; handy for custom guard factories.
pub struct FnGuard<F> {
    check: F,
}

impl<F> FnGuard<F>
where
    F: Fn(&ExecutionContext) -> Result<(), GuardViolation> + Send + Sync,
{
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

impl<F> Guard for FnGuard<F>
where
    F: Fn(&ExecutionContext) -> Result<(), GuardViolation> + Send + Sync,
{
    fn check(&self, ctx: &ExecutionContext) -> Result<(), GuardViolation> {
        (self.check)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use linkflow_types::value::StateValue;
    use uuid::Uuid;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("wf", "1", Uuid::now_v7(), StateValue::Null)
    }

    fn weekdays() -> Vec<Weekday> {
        vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
    }

    #[test]
    fn test_business_hours_window() {
        let guard = BusinessHoursGuard::new("UTC", 9, 17, weekdays(), vec![]).unwrap();
        // 2025-03-05 is a Wednesday.
        let inside = Utc.with_ymd_and_hms(2025, 3, 5, 10, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2025, 3, 5, 8, 59, 0).unwrap();
        let at_end = Utc.with_ymd_and_hms(2025, 3, 5, 17, 0, 0).unwrap();
        let saturday = Utc.with_ymd_and_hms(2025, 3, 8, 10, 0, 0).unwrap();
        assert!(guard.check_at(inside).is_ok());
        assert!(guard.check_at(before).is_err());
        assert!(guard.check_at(at_end).is_err());
        assert!(guard.check_at(saturday).is_err());
    }

    #[test]
    fn test_business_hours_respects_timezone() {
        let guard = BusinessHoursGuard::new("America/New_York", 9, 17, weekdays(), vec![]).unwrap();
        // 13:00 UTC on a March Wednesday is 09:00 in New York (EDT from March 9).
        let open = Utc.with_ymd_and_hms(2025, 3, 12, 13, 0, 0).unwrap();
        let closed = Utc.with_ymd_and_hms(2025, 3, 12, 12, 0, 0).unwrap();
        assert!(guard.check_at(open).is_ok());
        assert!(guard.check_at(closed).is_err());
    }

    #[test]
    fn test_business_hours_holiday_and_clock() {
        let holiday = NaiveDate::from_ymd_opt(2025, 12, 25).unwrap();
        let guard = BusinessHoursGuard::new("UTC", 9, 17, weekdays(), vec![holiday])
            .unwrap()
            .with_clock(|| Utc.with_ymd_and_hms(2025, 12, 25, 11, 0, 0).unwrap());
        let err = guard.check(&ctx()).unwrap_err();
        assert!(err.message.contains("holiday"));
    }

    #[test]
    fn test_business_hours_overnight_window() {
        let guard = BusinessHoursGuard::new("UTC", 22, 6, weekdays(), vec![]).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 3, 5, 23, 0, 0).unwrap();
        let midday = Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap();
        assert!(guard.check_at(late).is_ok());
        assert!(guard.check_at(midday).is_err());
    }

    #[test]
    fn test_business_hours_rejects_bad_config() {
        assert!(BusinessHoursGuard::new("Mars/Olympus", 9, 17, weekdays(), vec![]).is_err());
        assert!(BusinessHoursGuard::new("UTC", 9, 9, weekdays(), vec![]).is_err());
        assert!(BusinessHoursGuard::new("UTC", 9, 25, weekdays(), vec![]).is_err());
    }

    #[test]
    fn test_required_fields() {
        let guard = RequiredFieldsGuard::new(vec!["amount".into(), "currency".into()]);
        let mut ctx = ctx();
        ctx.set_state("amount", 10i64);
        ctx.set_state("currency", "  ");
        let err = guard.check(&ctx).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("currency"));
        assert_eq!(err.details["missing"], json!(["currency"]));

        ctx.set_state("currency", "EUR");
        assert!(guard.check(&ctx).is_ok());
    }

    #[test]
    fn test_pattern_guard() {
        let guard = PatternGuard::new("iban", r"^[A-Z]{2}\d{2}[A-Z0-9]{10,30}$", false).unwrap();
        let mut ctx = ctx();
        assert!(guard.check(&ctx).is_err());
        ctx.set_state("iban", "DE89370400440532013000");
        assert!(guard.check(&ctx).is_ok());
        ctx.set_state("iban", "not-an-iban");
        let err = guard.check(&ctx).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("iban"));

        let lenient = PatternGuard::new("iban", "^x$", true).unwrap();
        let empty = ExecutionContext::new("wf", "1", Uuid::now_v7(), StateValue::Null);
        assert!(lenient.check(&empty).is_ok());
        assert!(PatternGuard::new("f", "(", false).is_err());
    }

    #[test]
    fn test_numeric_range_bounds() {
        let guard = NumericRangeGuard::new("amount", Some(0.0), Some(100.0), false, true).unwrap();
        let mut ctx = ctx();

        ctx.set_state("amount", 0i64);
        assert!(guard.check(&ctx).is_err(), "exclusive lower bound");
        ctx.set_state("amount", 100i64);
        assert!(guard.check(&ctx).is_ok(), "inclusive upper bound");
        ctx.set_state("amount", 100.01);
        assert!(guard.check(&ctx).is_err());
        ctx.set_state("amount", "42.5");
        assert!(guard.check(&ctx).is_ok(), "numeric strings are accepted");
        ctx.set_state("amount", true);
        let err = guard.check(&ctx).unwrap_err();
        assert!(err.message.contains("not numeric"));

        let unbounded = NumericRangeGuard::new("amount", None, None, true, true).unwrap();
        for bad in [StateValue::from("NaN"), StateValue::from(f64::NAN), StateValue::from(f64::INFINITY)] {
            ctx.set_state("amount", bad.clone());
            let err = guard.check(&ctx).unwrap_err();
            assert!(err.message.contains("not a finite number"), "{bad:?}");
            assert!(unbounded.check(&ctx).is_err(), "{bad:?}");
        }

        assert!(NumericRangeGuard::new("x", Some(5.0), Some(1.0), true, true).is_err());
    }

    #[test]
    fn test_authorization_guard() {
        let guard = AuthorizationGuard::new("payments:approve", vec!["finance".into(), "admin".into()]);
        let mut ctx = ctx();
        assert!(guard.check(&ctx).is_err());

        ctx.set_state("auth.permissions", vec!["payments:approve"]);
        let err = guard.check(&ctx).unwrap_err();
        assert!(err.message.contains("roles"));

        ctx.set_state("auth.roles", vec!["admin"]);
        assert!(guard.check(&ctx).is_ok());

        let any_role = AuthorizationGuard::new("payments:approve", vec![]);
        ctx.remove_state("auth.roles");
        assert!(any_role.check(&ctx).is_ok());
    }
}

use crate::error::StorefrontError;
use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, TimeZone, Utc};

// 印度标准时间 (UTC+05:30)，订单收据与日志统一使用
pub const IST_OFFSET: FixedOffset = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Receipt-friendly local time, e.g. `2026-01-20 15:50:30`.
pub fn to_ist_string(dt: &DateTime<Utc>) -> String {
    dt.with_timezone(&IST_OFFSET)
        .format(DATETIME_FORMAT)
        .to_string()
}

/// Storage format: RFC3339 in UTC with a `Z` suffix.
pub fn to_db_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accepts RFC3339 first, then the legacy `YYYY-MM-DD HH:mm:ss` form read as IST.
pub fn parse_db_string(s: &str) -> crate::error::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .map_err(|e| StorefrontError::TimeParse(e.to_string()))?;
    let local = IST_OFFSET
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| StorefrontError::TimeParse("Invalid local datetime".into()))?;
    Ok(local.with_timezone(&Utc))
}

/// Adapter for row mappers: surfaces a bad timestamp as a conversion error
/// on column `idx`.
pub(crate) fn column_time(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    parse_db_string(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
        )
    })
}

// tracing_subscriber 自定义时间格式：输出 IST，与收据一致
pub struct IstTimer;

impl tracing_subscriber::fmt::time::FormatTime for IstTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", to_ist_string(&Utc::now()))
    }
}

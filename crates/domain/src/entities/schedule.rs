use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use sheetsync_errors::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Frequency {
    #[serde(rename = "ONCE")]
    Once,
    #[serde(rename = "HOURLY")]
    Hourly,
    #[serde(rename = "DAILY")]
    Daily,
    #[serde(rename = "WEEKLY")]
    Weekly,
    #[serde(rename = "MONTHLY")]
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Once => "ONCE",
            Frequency::Hourly => "HOURLY",
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
        }
    }

    pub fn parse(s: &str) -> SyncResult<Self> {
        match s {
            "ONCE" => Ok(Frequency::Once),
            "HOURLY" => Ok(Frequency::Hourly),
            "DAILY" => Ok(Frequency::Daily),
            "WEEKLY" => Ok(Frequency::Weekly),
            "MONTHLY" => Ok(Frequency::Monthly),
            other => Err(SyncError::serialization_error(format!(
                "无效的调度频率: {other}"
            ))),
        }
    }

    /// 基于 now 计算下次执行时间；ONCE 触发后不再有下次
    pub fn next_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Frequency::Once => None,
            Frequency::Hourly => Some(now + Duration::hours(1)),
            Frequency::Daily => Some(now + Duration::days(1)),
            Frequency::Weekly => Some(now + Duration::weeks(1)),
            Frequency::Monthly => now.checked_add_months(Months::new(1)),
        }
    }
}

/// 调度策略 - 判断一个映射的同步是否到期，与实际执行任务的运行器解耦
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncSchedule {
    pub id: i64,
    pub mapping_id: i64,
    pub frequency: Frequency,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub total_runs: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncSchedule {
    pub fn new(mapping_id: i64, frequency: Frequency, first_run: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            mapping_id,
            frequency,
            next_run: Some(first_run),
            last_run: None,
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.next_run.is_some_and(|next| next <= now)
    }

    /// 每次运行结束后（无论成败）立即重算 next_run
    pub fn record_run(&mut self, success: bool, now: DateTime<Utc>) {
        self.total_runs += 1;
        if success {
            self.successful_runs += 1;
        } else {
            self.failed_runs += 1;
        }
        self.last_run = Some(now);
        self.next_run = self.frequency.next_from(now);
        if self.next_run.is_none() {
            // ONCE调度触发后自行停用
            self.active = false;
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_is_due() {
        let now = fixed_now();
        let mut schedule = SyncSchedule::new(1, Frequency::Daily, now - Duration::minutes(5));
        assert!(schedule.is_due(now));

        schedule.active = false;
        assert!(!schedule.is_due(now));

        schedule.active = true;
        schedule.next_run = Some(now + Duration::minutes(1));
        assert!(!schedule.is_due(now));
    }

    #[test]
    fn test_record_run_recomputes_next_run() {
        let now = fixed_now();
        let mut schedule = SyncSchedule::new(1, Frequency::Hourly, now);
        schedule.record_run(true, now);
        assert_eq!(schedule.total_runs, 1);
        assert_eq!(schedule.successful_runs, 1);
        assert_eq!(schedule.next_run, Some(now + Duration::hours(1)));
        assert_eq!(schedule.last_run, Some(now));
    }

    #[test]
    fn test_failed_run_still_reschedules() {
        let now = fixed_now();
        let mut schedule = SyncSchedule::new(1, Frequency::Weekly, now);
        schedule.record_run(false, now);
        assert_eq!(schedule.failed_runs, 1);
        assert_eq!(schedule.next_run, Some(now + Duration::weeks(1)));
    }

    #[test]
    fn test_once_clears_next_run_and_deactivates() {
        let now = fixed_now();
        let mut schedule = SyncSchedule::new(1, Frequency::Once, now);
        assert!(schedule.is_due(now));
        schedule.record_run(true, now);
        assert_eq!(schedule.next_run, None);
        assert!(!schedule.active);
        assert!(!schedule.is_due(now + Duration::days(1)));
    }

    #[test]
    fn test_monthly_advances_by_calendar_month() {
        let now = Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap();
        let next = Frequency::Monthly.next_from(now).unwrap();
        // 1月31日 + 1个月 → 2月28日（chrono截断到月末）
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 2, 28, 0, 0, 0).unwrap());
    }
}

//! Profile analytics: note totals, per-category counts and a zero-filled
//! creation timeline. Dates are bucketed in UTC against an explicit `today`.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{Datelike, Days, Months, NaiveDate};

use crate::errors::Error;
use crate::models::Note;

/// Label used for notes without a category
pub const UNCATEGORIZED: &str = "OTHER";

/// Bucket size of the creation timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeScale {
    Day,
    /// Weeks start on Monday
    Week,
    #[default]
    Month,
    Year,
}

impl TimeScale {
    /// Buckets shown, ending with the current one
    pub fn window(self) -> u32 {
        match self {
            TimeScale::Day => 14,
            TimeScale::Week => 12,
            TimeScale::Month => 6,
            TimeScale::Year => 4,
        }
    }

    /// First day of the bucket holding `date`
    pub fn bucket_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            TimeScale::Day => date,
            TimeScale::Week => date
                .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
                .unwrap_or(date),
            TimeScale::Month => date.with_day(1).unwrap_or(date),
            TimeScale::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
        }
    }

    /// Start of the bucket `steps` buckets before the one starting at `start`
    fn step_back(self, start: NaiveDate, steps: u32) -> Option<NaiveDate> {
        match self {
            TimeScale::Day => start.checked_sub_days(Days::new(u64::from(steps))),
            TimeScale::Week => start.checked_sub_days(Days::new(7 * u64::from(steps))),
            TimeScale::Month => start.checked_sub_months(Months::new(steps)),
            TimeScale::Year => {
                let year = start.year().checked_sub(i32::try_from(steps).ok()?)?;
                NaiveDate::from_ymd_opt(year, 1, 1)
            }
        }
    }

    /// Stable bucket key: `2025-03-04` for days and weeks (the Monday),
    /// `2025-03` for months, `2025` for years
    pub fn key(self, start: NaiveDate) -> String {
        match self {
            TimeScale::Day | TimeScale::Week => start.format("%Y-%m-%d").to_string(),
            TimeScale::Month => start.format("%Y-%m").to_string(),
            TimeScale::Year => start.format("%Y").to_string(),
        }
    }

    /// Short display label such as `04 Mar`, `Mar` or `2025`
    pub fn label(self, start: NaiveDate) -> String {
        match self {
            TimeScale::Day | TimeScale::Week => start.format("%d %b").to_string(),
            TimeScale::Month => start.format("%b").to_string(),
            TimeScale::Year => start.format("%Y").to_string(),
        }
    }
}

impl FromStr for TimeScale {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "day" => Ok(TimeScale::Day),
            "week" => Ok(TimeScale::Week),
            "month" => Ok(TimeScale::Month),
            "year" => Ok(TimeScale::Year),
            other => Err(Error::Invalid(format!("Unknown time scale {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCount {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelinePoint {
    pub key: String,
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileStats {
    pub total: usize,
    /// Most used first
    pub categories: Vec<CategoryCount>,
    /// Oldest bucket first, always `scale.window()` points long
    pub timeline: Vec<TimelinePoint>,
}

/// Notes per category, most used first. Ties keep first-seen order.
pub fn category_counts(notes: &[Note]) -> Vec<CategoryCount> {
    let mut counts: Vec<CategoryCount> = Vec::new();
    for note in notes {
        let label = if note.category.is_empty() {
            UNCATEGORIZED
        } else {
            note.category.as_str()
        };
        match counts.iter_mut().find(|entry| entry.label == label) {
            Some(entry) => entry.count += 1,
            None => counts.push(CategoryCount {
                label: label.to_string(),
                count: 1,
            }),
        }
    }

    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts
}

/// Notes created per bucket over the window ending with the bucket holding `today`.
/// Notes without a creation time, or created outside the window, are not counted.
pub fn timeline(notes: &[Note], scale: TimeScale, today: NaiveDate) -> Vec<TimelinePoint> {
    let mut counts: HashMap<NaiveDate, usize> = HashMap::new();
    for created in notes.iter().filter_map(|note| note.created_at) {
        *counts
            .entry(scale.bucket_start(created.date_naive()))
            .or_default() += 1;
    }

    let current = scale.bucket_start(today);
    (0..scale.window())
        .rev()
        .filter_map(|steps| scale.step_back(current, steps))
        .map(|start| TimelinePoint {
            key: scale.key(start),
            label: scale.label(start),
            count: counts.get(&start).copied().unwrap_or(0),
        })
        .collect()
}

pub fn profile_stats(notes: &[Note], scale: TimeScale, today: NaiveDate) -> ProfileStats {
    ProfileStats {
        total: notes.len(),
        categories: category_counts(notes),
        timeline: timeline(notes, scale, today),
    }
}

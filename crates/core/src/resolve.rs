// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Conflict resolution between a local and a remote version of a record.
//!
//! Resolution rules:
//! - Topic, Subject, ReviewSession, User: last `updated_at` wins in full
//! - LearningItem: field-level merge (see [`resolve_learning_item`])
//! - GamificationStats: every counter takes the max, last review date the latest
//! - DailyStats: every counter is summed
//!
//! Equal timestamps resolve to the remote version. All functions are pure:
//! the same inputs (including `now`) always give the same output.

use chrono::{DateTime, Utc};

use crate::entity::{DailyStats, EntityRecord, GamificationStats, LearningItem, Record, Topic};
use crate::error::{Error, Result};

/// Returns the version with the later `updated_at`, preferring remote on a tie.
pub fn last_write_wins<T: Record>(local: &T, remote: &T) -> T {
    if local.updated_at() > remote.updated_at() {
        local.clone()
    } else {
        remote.clone()
    }
}

/// Topics are resolved whole-record by last write.
pub fn resolve_topic(local: &Topic, remote: &Topic) -> Topic {
    last_write_wins(local, remote)
}

/// Merges two versions of a learning item field by field.
///
/// - `content` and descriptive fields: last write wins
/// - `review_count`: max (never regresses)
/// - `last_reviewed_at`: the later non-null value
/// - `next_review_at`: the earlier one if both are still due in the future,
///   otherwise the more recent one
/// - `ease_factor`, `interval_days`: always remote (scheduler output is server-authoritative)
/// - `updated_at`: stamped to `now`
pub fn resolve_learning_item(
    local: &LearningItem,
    remote: &LearningItem,
    now: DateTime<Utc>,
) -> LearningItem {
    let mut merged = last_write_wins(local, remote);

    merged.review_count = local.review_count.max(remote.review_count);
    merged.last_reviewed_at = local.last_reviewed_at.max(remote.last_reviewed_at);
    merged.next_review_at = match (local.next_review_at, remote.next_review_at) {
        (Some(l), Some(r)) if l > now && r > now => Some(l.min(r)),
        (l, r) => l.max(r),
    };
    merged.ease_factor = remote.ease_factor;
    merged.interval_days = remote.interval_days;
    merged.updated_at = now;

    merged
}

/// Counters are monotonic: each takes the larger of the two values.
pub fn resolve_gamification_stats(
    local: &GamificationStats,
    remote: &GamificationStats,
) -> GamificationStats {
    let mut merged = last_write_wins(local, remote);

    merged.total_points = local.total_points.max(remote.total_points);
    merged.current_level = local.current_level.max(remote.current_level);
    merged.current_streak = local.current_streak.max(remote.current_streak);
    merged.longest_streak = local.longest_streak.max(remote.longest_streak);
    merged.last_review_date = local.last_review_date.max(remote.last_review_date);
    merged.updated_at = local.updated_at.max(remote.updated_at);

    merged
}

/// Daily counters are additive: work done on two devices on the same day adds up.
pub fn resolve_daily_stats(local: &DailyStats, remote: &DailyStats) -> DailyStats {
    let mut merged = last_write_wins(local, remote);

    merged.points_earned = local.points_earned.saturating_add(remote.points_earned);
    merged.reviews_completed = local.reviews_completed.saturating_add(remote.reviews_completed);
    merged.perfect_timing_count =
        local.perfect_timing_count.saturating_add(remote.perfect_timing_count);
    merged.items_mastered = local.items_mastered.saturating_add(remote.items_mastered);
    merged.updated_at = local.updated_at.max(remote.updated_at);

    merged
}

/// Resolves two versions of the same record with the policy of its table.
pub fn resolve(
    local: &EntityRecord,
    remote: &EntityRecord,
    now: DateTime<Utc>,
) -> Result<EntityRecord> {
    use EntityRecord as R;

    if local.id() != remote.id() {
        return Err(mismatch(local, remote));
    }

    let merged = match (local, remote) {
        (R::Topic(l), R::Topic(r)) => R::Topic(resolve_topic(l, r)),
        (R::Subject(l), R::Subject(r)) => R::Subject(last_write_wins(l, r)),
        (R::LearningItem(l), R::LearningItem(r)) => {
            R::LearningItem(resolve_learning_item(l, r, now))
        }
        (R::ReviewSession(l), R::ReviewSession(r)) => R::ReviewSession(last_write_wins(l, r)),
        (R::GamificationStats(l), R::GamificationStats(r)) => {
            R::GamificationStats(resolve_gamification_stats(l, r))
        }
        (R::DailyStats(l), R::DailyStats(r)) => R::DailyStats(resolve_daily_stats(l, r)),
        (R::User(l), R::User(r)) => R::User(last_write_wins(l, r)),
        _ => return Err(mismatch(local, remote)),
    };

    Ok(merged)
}

fn mismatch(local: &EntityRecord, remote: &EntityRecord) -> Error {
    Error::MismatchedRecords {
        local: format!("{}/{}", local.table(), local.id()),
        remote: format!("{}/{}", remote.table(), remote.id()),
    }
}

#[cfg(test)]
#[path = "resolve_tests.rs"]
mod tests;

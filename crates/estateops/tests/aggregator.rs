mod common;

use chrono::{Duration, Utc};
use common::{memory_store, seed_log};
use estateops::logs::{LogAggregator, LogLevel, LogType};
use std::collections::BTreeMap;

#[tokio::test]
async fn counts_by_level_omits_levels_without_entries() {
    let (_mem, store) = memory_store();
    let now = Utc::now();
    let since = now - Duration::hours(1);

    for _ in 0..3 {
        seed_log(&*store, LogLevel::Error, LogType::ApiError, None, now).await;
    }
    seed_log(&*store, LogLevel::Warn, LogType::Performance, None, now).await;
    for i in 0..10 {
        seed_log(&*store, LogLevel::Info, LogType::ApiRequest, None, since - Duration::minutes(i + 1)).await;
    }

    let counts = LogAggregator::new(store).counts_by_level(since).await.unwrap();

    let expected: BTreeMap<LogLevel, i64> =
        [(LogLevel::Error, 3), (LogLevel::Warn, 1)].into_iter().collect();
    assert_eq!(counts, expected);
    assert!(!counts.contains_key(&LogLevel::Info));
}

#[tokio::test]
async fn recent_errors_are_windowed_capped_and_newest_first() {
    let (_mem, store) = memory_store();
    let now = Utc::now();

    for i in 0..5 {
        seed_log(&*store, LogLevel::Error, LogType::SystemError, None, now - Duration::minutes(i)).await;
    }
    seed_log(&*store, LogLevel::Critical, LogType::Database, None, now - Duration::seconds(30)).await;
    seed_log(&*store, LogLevel::Warn, LogType::Performance, None, now).await;
    seed_log(&*store, LogLevel::Error, LogType::SystemError, None, now - Duration::hours(30)).await;

    let agg = LogAggregator::new(store);
    let errors = agg.recent_errors(24, 4).await.unwrap();

    assert_eq!(errors.len(), 4);
    assert!(errors.iter().all(|e| e.level.is_error()));
    assert!(errors.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    assert!(errors.iter().any(|e| e.level == LogLevel::Critical));

    let all_recent = agg.recent_errors(24, 50).await.unwrap();
    assert_eq!(all_recent.len(), 6);
}

#[tokio::test]
async fn totals_and_counts_since() {
    let (_mem, store) = memory_store();
    let now = Utc::now();
    seed_log(&*store, LogLevel::Info, LogType::Auth, None, now - Duration::days(2)).await;
    seed_log(&*store, LogLevel::Info, LogType::Auth, None, now - Duration::hours(2)).await;
    seed_log(&*store, LogLevel::Info, LogType::Auth, None, now).await;

    let agg = LogAggregator::new(store);
    assert_eq!(agg.total_count().await.unwrap(), 3);
    assert_eq!(agg.count_since(now - Duration::hours(24)).await.unwrap(), 2);
}

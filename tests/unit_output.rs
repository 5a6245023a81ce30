// Unit tests for terminal text helpers.

use chrono::{Duration, TimeZone, Utc};

use murmur::output::{plural, relative_time, truncate_chars};

#[test]
fn truncate_keeps_short_text_intact() {
    assert_eq!(truncate_chars("hello", 10), "hello");
    assert_eq!(truncate_chars("hello", 5), "hello");
}

#[test]
fn truncate_counts_characters_not_bytes() {
    let text = "héllo wörld 🎉🎉";
    assert_eq!(truncate_chars(text, 5), "héllo...");
    assert_eq!(truncate_chars("🎉🎉🎉", 2), "🎉🎉...");
}

#[test]
fn relative_time_buckets() {
    let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();

    assert_eq!(relative_time(now, now), "just now");
    assert_eq!(relative_time(now - Duration::seconds(59), now), "just now");
    assert_eq!(relative_time(now - Duration::minutes(5), now), "5m ago");
    assert_eq!(relative_time(now - Duration::hours(3), now), "3h ago");
    assert_eq!(relative_time(now - Duration::days(2), now), "2d ago");
    assert_eq!(relative_time(now - Duration::days(30), now), "2024-05-16");
}

#[test]
fn future_timestamps_read_as_just_now() {
    let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
    assert_eq!(relative_time(now + Duration::minutes(2), now), "just now");
}

#[test]
fn plural_forms() {
    assert_eq!(plural(0, "like"), "0 likes");
    assert_eq!(plural(1, "like"), "1 like");
    assert_eq!(plural(12, "comment"), "12 comments");
}

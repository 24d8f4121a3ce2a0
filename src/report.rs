use crate::calendar::{Calendar, date_key, parse_day_key, week_range_for};
use crate::errors::CoreError;
use crate::models::{DayRange, Event, EventKind};
use crate::store::{EventStore, sort_partition};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

/// Rendered in place of a missing time.
pub const EMPTY_TIME: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedRow {
    pub member_name: String,
    pub date_label: String,
    pub out_time: Option<String>,
    pub in_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub index: usize,
    pub member_name: String,
    pub date_label: String,
    pub out_time: String,
    pub in_time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    Day,
    Week,
    Month,
}

impl FromStr for ReportPeriod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(ReportPeriod::Day),
            "week" => Ok(ReportPeriod::Week),
            "month" => Ok(ReportPeriod::Month),
            other => Err(CoreError::invalid(format!(
                "period must be day, week or month, got `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub group_id: String,
    pub period: ReportPeriod,
    pub start: String,
    pub end: String,
    pub rows: Vec<ReportRow>,
}

struct PendingOut {
    date_label: String,
    time: String,
}

/// Pairs each OUT with the member's next IN.
///
/// Unbalanced input still yields rows: a second OUT closes the earlier one
/// with no IN time, an IN with nothing pending gets no OUT time, and OUTs
/// still open at the end are flushed last. Rows appear in the order they are
/// closed. Events must already be in partition order.
pub fn pair_events(events: &[Event], calendar: &Calendar) -> Vec<PairedRow> {
    let mut rows = Vec::new();
    let mut pending: HashMap<&str, PendingOut> = HashMap::new();
    let mut open_order: Vec<&str> = Vec::new();

    for event in events {
        let name = event.member_name.as_str();
        let time = calendar.time_label(event.timestamp);
        match event.kind {
            EventKind::Out => {
                let fresh = PendingOut {
                    date_label: event.day_key.clone(),
                    time,
                };
                if let Some(previous) = pending.insert(name, fresh) {
                    rows.push(PairedRow {
                        member_name: name.to_string(),
                        date_label: previous.date_label,
                        out_time: Some(previous.time),
                        in_time: None,
                    });
                    open_order.retain(|open| *open != name);
                }
                open_order.push(name);
            }
            EventKind::In => match pending.remove(name) {
                Some(open) => {
                    open_order.retain(|candidate| *candidate != name);
                    rows.push(PairedRow {
                        member_name: name.to_string(),
                        date_label: open.date_label,
                        out_time: Some(open.time),
                        in_time: Some(time),
                    });
                }
                None => rows.push(PairedRow {
                    member_name: name.to_string(),
                    date_label: event.day_key.clone(),
                    out_time: None,
                    in_time: Some(time),
                }),
            },
        }
    }

    for name in open_order {
        if let Some(open) = pending.remove(name) {
            rows.push(PairedRow {
                member_name: name.to_string(),
                date_label: open.date_label,
                out_time: Some(open.time),
                in_time: None,
            });
        }
    }
    rows
}

/// Numbers rows from 1 and fills missing times with [`EMPTY_TIME`].
pub fn export_rows(rows: Vec<PairedRow>) -> Vec<ReportRow> {
    rows.into_iter()
        .enumerate()
        .map(|(offset, row)| ReportRow {
            index: offset + 1,
            member_name: row.member_name,
            date_label: row.date_label,
            out_time: row.out_time.unwrap_or_else(|| EMPTY_TIME.to_string()),
            in_time: row.in_time.unwrap_or_else(|| EMPTY_TIME.to_string()),
        })
        .collect()
}

/// Day keys covered by `period` around `anchor`, plus the keys that count.
/// Week and month reports only count business days.
fn period_days(calendar: &Calendar, period: ReportPeriod, anchor: NaiveDate) -> (DayRange, BTreeSet<String>) {
    match period {
        ReportPeriod::Day => {
            let key = date_key(anchor);
            (DayRange::single(key.clone()), BTreeSet::from([key]))
        }
        ReportPeriod::Week => {
            let (monday, friday) = week_range_for(anchor);
            let days = monday.iter_days().take(5).map(date_key).collect();
            (DayRange::new(date_key(monday), date_key(friday)), days)
        }
        ReportPeriod::Month => {
            let keys = calendar.month_business_day_keys(anchor.year(), anchor.month());
            let range = match (keys.first(), keys.last()) {
                (Some(first), Some(last)) => DayRange::new(first.clone(), last.clone()),
                _ => DayRange::single(date_key(anchor)),
            };
            (range, keys.into_iter().collect())
        }
    }
}

pub async fn build_report<S: EventStore>(
    store: &S,
    calendar: &Calendar,
    group_id: &str,
    period: ReportPeriod,
    anchor: NaiveDate,
) -> Result<Report, CoreError> {
    let (range, days) = period_days(calendar, period, anchor);
    let mut events: Vec<Event> = store
        .query(group_id, &range)
        .await?
        .into_iter()
        .filter(|event| days.contains(&event.day_key))
        .collect();
    sort_partition(&mut events);

    Ok(Report {
        group_id: group_id.to_string(),
        period,
        start: range.start,
        end: range.end,
        rows: export_rows(pair_events(&events, calendar)),
    })
}

pub fn parse_anchor(date: Option<&str>, today: NaiveDate) -> Result<NaiveDate, CoreError> {
    match date {
        Some(key) if !key.trim().is_empty() => parse_day_key(key.trim()),
        _ => Ok(today),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppData;
    use crate::models::NewEvent;
    use crate::storage::StateFile;
    use crate::store::LocalStore;

    fn calendar() -> Calendar {
        Calendar::new(chrono_tz::America::New_York)
    }

    fn day(key: &str) -> NaiveDate {
        parse_day_key(key).unwrap()
    }

    fn event(seq: u64, name: &str, kind: EventKind, day_key: &str, h: u32, m: u32) -> Event {
        Event {
            id: format!("e{seq}"),
            seq,
            group_id: "smith".into(),
            member_id: crate::roster::member_id_from_name(name).unwrap(),
            member_name: name.into(),
            kind,
            timestamp: calendar().at_local(day(day_key), h, m, 0).unwrap(),
            day_key: day_key.into(),
        }
    }

    #[test]
    fn balanced_sequence_pairs_every_out() {
        let events = vec![
            event(1, "Abner M.", EventKind::Out, "2026-10-19", 9, 0),
            event(2, "Angel C.", EventKind::Out, "2026-10-19", 9, 2),
            event(3, "Angel C.", EventKind::In, "2026-10-19", 9, 4),
            event(4, "Abner M.", EventKind::In, "2026-10-19", 9, 5),
        ];
        let rows = pair_events(&events, &calendar());
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.out_time.is_some() && row.in_time.is_some()));
        assert_eq!(rows[0].member_name, "Angel C.");
        assert_eq!(rows[1].member_name, "Abner M.");
    }

    #[test]
    fn single_trip_formats_local_times() {
        let events = vec![
            event(1, "Abner M.", EventKind::Out, "2026-10-19", 9, 0),
            event(2, "Abner M.", EventKind::In, "2026-10-19", 9, 5),
        ];
        let rows = pair_events(&events, &calendar());
        assert_eq!(
            rows,
            vec![PairedRow {
                member_name: "Abner M.".into(),
                date_label: "2026-10-19".into(),
                out_time: Some("09:00:00".into()),
                in_time: Some("09:05:00".into()),
            }]
        );
    }

    #[test]
    fn trailing_out_and_leading_in_stay_unmatched() {
        let events = vec![
            event(1, "Angel C.", EventKind::In, "2026-10-19", 8, 30),
            event(2, "Abner M.", EventKind::Out, "2026-10-19", 9, 0),
        ];
        let rows = pair_events(&events, &calendar());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].member_name, "Angel C.");
        assert_eq!(rows[0].out_time, None);
        assert_eq!(rows[0].in_time.as_deref(), Some("08:30:00"));
        assert_eq!(rows[1].member_name, "Abner M.");
        assert_eq!(rows[1].in_time, None);
    }

    #[test]
    fn double_out_flushes_the_earlier_out() {
        let events = vec![
            event(1, "Abner M.", EventKind::Out, "2026-10-19", 9, 0),
            event(2, "Abner M.", EventKind::Out, "2026-10-19", 9, 10),
            event(3, "Abner M.", EventKind::In, "2026-10-19", 9, 15),
        ];
        let rows = pair_events(&events, &calendar());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].out_time.as_deref(), Some("09:00:00"));
        assert_eq!(rows[0].in_time, None);
        assert_eq!(rows[1].out_time.as_deref(), Some("09:10:00"));
        assert_eq!(rows[1].in_time.as_deref(), Some("09:15:00"));
    }

    #[test]
    fn open_outs_flush_in_the_order_they_opened() {
        let events = vec![
            event(1, "Zed", EventKind::Out, "2026-10-19", 9, 0),
            event(2, "Abner M.", EventKind::Out, "2026-10-19", 9, 1),
        ];
        let names: Vec<String> = pair_events(&events, &calendar())
            .into_iter()
            .map(|row| row.member_name)
            .collect();
        assert_eq!(names, ["Zed", "Abner M."]);
    }

    #[test]
    fn export_numbers_rows_and_uses_placeholder() {
        let rows = export_rows(vec![PairedRow {
            member_name: "Abner M.".into(),
            date_label: "2026-10-19".into(),
            out_time: Some("09:00:00".into()),
            in_time: None,
        }]);
        assert_eq!(rows[0].index, 1);
        assert_eq!(rows[0].in_time, EMPTY_TIME);
        assert_eq!(rows[0].out_time, "09:00:00");
    }

    #[test]
    fn period_parses_from_query_value() {
        assert_eq!("Week".parse::<ReportPeriod>(), Ok(ReportPeriod::Week));
        assert!("year".parse::<ReportPeriod>().is_err());
    }

    #[test]
    fn anchor_defaults_to_today() {
        let today = day("2026-10-19");
        assert_eq!(parse_anchor(None, today).unwrap(), today);
        assert_eq!(parse_anchor(Some(""), today).unwrap(), today);
        assert_eq!(parse_anchor(Some("2026-10-02"), today).unwrap(), day("2026-10-02"));
        assert!(parse_anchor(Some("yesterday"), today).is_err());
    }

    async fn seeded_store() -> LocalStore {
        let store = LocalStore::new(StateFile::in_memory(AppData::default())).await;
        let cal = calendar();
        for (day_key, name, kind, h) in [
            ("2026-10-16", "Abner M.", EventKind::Out, 10),
            ("2026-10-19", "Abner M.", EventKind::Out, 9),
            ("2026-10-19", "Abner M.", EventKind::In, 10),
            ("2026-10-21", "Angel C.", EventKind::Out, 11),
            ("2026-10-24", "Angel C.", EventKind::In, 12),
        ] {
            store
                .append(NewEvent {
                    group_id: "smith".into(),
                    member_id: crate::roster::member_id_from_name(name).unwrap(),
                    member_name: name.into(),
                    kind,
                    timestamp: cal.at_local(day(day_key), h, 0, 0).unwrap(),
                    day_key: day_key.into(),
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn week_report_covers_business_week_only() {
        let store = seeded_store().await;
        let report = build_report(&store, &calendar(), "smith", ReportPeriod::Week, day("2026-10-24"))
            .await
            .unwrap();
        assert_eq!(report.start, "2026-10-19");
        assert_eq!(report.end, "2026-10-23");
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].member_name, "Abner M.");
        assert_eq!(report.rows[0].in_time, "10:00:00");
        assert_eq!(report.rows[1].member_name, "Angel C.");
        assert_eq!(report.rows[1].in_time, EMPTY_TIME);
    }

    #[tokio::test]
    async fn month_report_skips_weekend_events() {
        let store = seeded_store().await;
        let report = build_report(&store, &calendar(), "smith", ReportPeriod::Month, day("2026-10-05"))
            .await
            .unwrap();
        assert_eq!(report.start, "2026-10-01");
        assert_eq!(report.end, "2026-10-30");
        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.rows[0].date_label, "2026-10-16");
        assert_eq!(report.rows[0].in_time, EMPTY_TIME);
    }

    #[tokio::test]
    async fn day_report_uses_single_partition() {
        let store = seeded_store().await;
        let report = build_report(&store, &calendar(), "smith", ReportPeriod::Day, day("2026-10-19"))
            .await
            .unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].out_time, "09:00:00");
    }
}

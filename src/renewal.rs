use chrono::{Duration, NaiveDate};

/// Attendance mark for one (enrollment, date) pair. Only `Present` consumes
/// a class from the enrollment's package; the other three are equivalent for
/// counting purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    AbsentExcused,
    AbsentUnexcused,
    Holiday,
}

impl AttendanceStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PRESENT" => Some(Self::Present),
            "ABSENT_EXCUSED" => Some(Self::AbsentExcused),
            "ABSENT_UNEXCUSED" => Some(Self::AbsentUnexcused),
            "HOLIDAY" => Some(Self::Holiday),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "PRESENT",
            Self::AbsentExcused => "ABSENT_EXCUSED",
            Self::AbsentUnexcused => "ABSENT_UNEXCUSED",
            Self::Holiday => "HOLIDAY",
        }
    }

    pub fn consumes_class(self) -> bool {
        matches!(self, Self::Present)
    }
}

/// Projected date by which the remaining classes run out, assuming the weekly
/// cadence holds: `ceil(remaining / per_week)` whole weeks past `reference`.
///
/// Returns None when the package is already exhausted or the cadence is not
/// positive; callers branch on `classes_remaining` before consulting the date,
/// so the two cases do not need distinct sentinels.
pub fn renewal_date(
    classes_remaining: i64,
    classes_per_week: i64,
    reference: NaiveDate,
) -> Option<NaiveDate> {
    if classes_remaining <= 0 || classes_per_week <= 0 {
        return None;
    }
    let weeks_needed = (classes_remaining + classes_per_week - 1) / classes_per_week;
    Some(reference + Duration::days(weeks_needed * 7))
}

pub fn days_until_renewal(renewal: Option<NaiveDate>, today: NaiveDate) -> Option<i64> {
    renewal.map(|d| (d - today).num_days())
}

/// Urgent when the package is nearly spent (2 or fewer classes) or the
/// projected exhaustion date is at most 7 days out.
pub fn is_renewal_urgent(
    classes_remaining: i64,
    renewal: Option<NaiveDate>,
    today: NaiveDate,
) -> bool {
    if classes_remaining <= 2 {
        return true;
    }
    matches!(days_until_renewal(renewal, today), Some(d) if d <= 7)
}

/// One of four countdown variants, first match wins:
/// exhausted / critically low / renew-by date / steady state.
pub fn renewal_message(
    classes_remaining: i64,
    renewal: Option<NaiveDate>,
    today: NaiveDate,
) -> String {
    if classes_remaining <= 0 {
        return "⚠️ No classes remaining - Please renew now!".to_string();
    }
    if classes_remaining <= 2 {
        return format!(
            "⚠️ Only {} class{} left - Renewal needed soon!",
            classes_remaining,
            if classes_remaining == 1 { "" } else { "es" }
        );
    }
    if let Some(date) = renewal {
        let days = (date - today).num_days();
        if days <= 7 {
            return format!(
                "⚠️ {} classes left - Renew by {}",
                classes_remaining,
                date.format("%Y-%m-%d")
            );
        }
        return format!(
            "✅ {} classes remaining - Renewal due {}",
            classes_remaining,
            date.format("%Y-%m-%d")
        );
    }
    format!("✅ {} classes remaining", classes_remaining)
}

/// Delta applied to `classes_remaining` when an attendance record moves from
/// `old` (None on first mark) to `new`. The state machine collapses to two
/// classes: {Present} and everything else.
pub fn count_delta(old: Option<AttendanceStatus>, new: AttendanceStatus) -> i64 {
    let was_present = old.map(|s| s.consumes_class()).unwrap_or(false);
    let is_present = new.consumes_class();
    match (was_present, is_present) {
        (false, true) => -1,
        (true, false) => 1,
        _ => 0,
    }
}

/// Count after applying `delta`, floored at zero. A decrement from an empty
/// package records the attendance but does not drive the count negative.
pub fn apply_count_delta(classes_remaining: i64, delta: i64) -> i64 {
    (classes_remaining + delta).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date literal")
    }

    #[test]
    fn renewal_date_is_ceiling_division_of_weeks() {
        let reference = d("2026-03-02");
        // 8 classes at 2/week -> 4 weeks.
        assert_eq!(renewal_date(8, 2, reference), Some(d("2026-03-30")));
        // 9 classes at 2/week -> 5 weeks (ceil).
        assert_eq!(renewal_date(9, 2, reference), Some(d("2026-04-06")));
        // 1 class at 3/week still needs a full week.
        assert_eq!(renewal_date(1, 3, reference), Some(d("2026-03-09")));
    }

    #[test]
    fn renewal_date_never_precedes_reference() {
        let reference = d("2026-01-15");
        for remaining in 1..=40 {
            for per_week in 1..=6 {
                let date = renewal_date(remaining, per_week, reference)
                    .expect("positive inputs project a date");
                assert!(date >= reference);
                let weeks = ((date - reference).num_days()) / 7;
                let expected = (remaining + per_week - 1) / per_week;
                assert_eq!(weeks, expected, "remaining={remaining} per_week={per_week}");
            }
        }
    }

    #[test]
    fn renewal_date_null_for_exhausted_or_invalid_cadence() {
        let reference = d("2026-03-02");
        assert_eq!(renewal_date(0, 2, reference), None);
        assert_eq!(renewal_date(-3, 2, reference), None);
        assert_eq!(renewal_date(5, 0, reference), None);
        assert_eq!(renewal_date(0, 0, reference), None);
    }

    #[test]
    fn urgency_boundaries() {
        let today = d("2026-03-02");
        assert!(is_renewal_urgent(2, None, today));
        assert!(is_renewal_urgent(0, None, today));
        assert!(!is_renewal_urgent(3, Some(d("2026-03-20")), today));
        assert!(is_renewal_urgent(3, Some(d("2026-03-09")), today));
        // Exactly 7 days out counts as urgent; 8 does not.
        assert!(is_renewal_urgent(5, Some(d("2026-03-09")), today));
        assert!(!is_renewal_urgent(5, Some(d("2026-03-10")), today));
        assert!(!is_renewal_urgent(3, None, today));
    }

    #[test]
    fn message_variants_cover_expected_shapes() {
        let today = d("2026-03-02");
        assert_eq!(
            renewal_message(0, None, today),
            "⚠️ No classes remaining - Please renew now!"
        );
        assert_eq!(
            renewal_message(1, Some(d("2026-03-09")), today),
            "⚠️ Only 1 class left - Renewal needed soon!"
        );
        assert_eq!(
            renewal_message(2, None, today),
            "⚠️ Only 2 classes left - Renewal needed soon!"
        );
        assert_eq!(
            renewal_message(4, Some(d("2026-03-06")), today),
            "⚠️ 4 classes left - Renew by 2026-03-06"
        );
        assert_eq!(
            renewal_message(8, Some(d("2026-04-27")), today),
            "✅ 8 classes remaining - Renewal due 2026-04-27"
        );
        assert_eq!(renewal_message(8, None, today), "✅ 8 classes remaining");
    }

    #[test]
    fn message_selection_is_unambiguous_across_input_sweep() {
        // Exactly one variant should claim each input: classify by prefix and
        // check the classification matches the first-match ordering.
        let today = d("2026-03-02");
        for remaining in -1..=12 {
            for offset in [-2i64, 0, 3, 7, 8, 30] {
                for with_date in [false, true] {
                    let renewal = with_date.then(|| today + Duration::days(offset));
                    let msg = renewal_message(remaining, renewal, today);
                    let expected = if remaining <= 0 {
                        "exhausted"
                    } else if remaining <= 2 {
                        "low"
                    } else if renewal.is_some() && offset <= 7 {
                        "renew_by"
                    } else {
                        "steady"
                    };
                    let got = if msg.contains("No classes remaining") {
                        "exhausted"
                    } else if msg.contains("Renewal needed soon") {
                        "low"
                    } else if msg.contains("Renew by") {
                        "renew_by"
                    } else {
                        "steady"
                    };
                    assert_eq!(got, expected, "remaining={remaining} offset={offset} with_date={with_date}");
                }
            }
        }
    }

    #[test]
    fn count_delta_two_class_state_machine() {
        use AttendanceStatus::*;
        assert_eq!(count_delta(None, Present), -1);
        assert_eq!(count_delta(None, AbsentExcused), 0);
        assert_eq!(count_delta(None, Holiday), 0);
        assert_eq!(count_delta(Some(Present), AbsentExcused), 1);
        assert_eq!(count_delta(Some(Present), AbsentUnexcused), 1);
        assert_eq!(count_delta(Some(AbsentExcused), Present), -1);
        assert_eq!(count_delta(Some(Present), Present), 0);
        assert_eq!(count_delta(Some(AbsentExcused), AbsentUnexcused), 0);
        assert_eq!(count_delta(Some(Holiday), AbsentExcused), 0);
    }

    #[test]
    fn apply_count_delta_floors_at_zero() {
        assert_eq!(apply_count_delta(3, -1), 2);
        assert_eq!(apply_count_delta(0, -1), 0);
        assert_eq!(apply_count_delta(0, 1), 1);
        assert_eq!(apply_count_delta(1, 0), 1);
    }

    #[test]
    fn status_round_trips_wire_names() {
        for raw in ["PRESENT", "ABSENT_EXCUSED", "ABSENT_UNEXCUSED", "HOLIDAY"] {
            let status = AttendanceStatus::parse(raw).expect("known status");
            assert_eq!(status.as_str(), raw);
        }
        assert_eq!(AttendanceStatus::parse("LATE"), None);
        assert_eq!(AttendanceStatus::parse("present"), None);
    }
}

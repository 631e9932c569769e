mod test_support;

use chrono::{Duration, Utc};
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{login, request_ok, seeded_workspace, str_field};

fn expected_renewal(days: i64) -> String {
    (Utc::now().date_naive() + Duration::days(days))
        .format("%Y-%m-%d")
        .to_string()
}

fn chess_renewal_notes(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
) -> Vec<serde_json::Value> {
    let listed = request_ok(stdin, reader, id, "notifications.list", json!({}));
    listed["notifications"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter(|n| {
            n["type"] == json!("MEMBERSHIP_RENEWAL")
                && n["message"].as_str().unwrap_or("").contains("Chess Club")
        })
        .collect()
}

#[test]
fn present_marks_move_the_package_count_and_projection() {
    let (mut child, mut stdin, mut reader, workspace, seeded) =
        seeded_workspace("classportal-attendance");
    let enrollment_id = str_field(&seeded, "enrollmentId");

    let _ = login(
        &mut stdin,
        &mut reader,
        "1",
        "teacher@example.com",
        "teacher123",
    );

    // Seeded package: 8 remaining at 2 classes/week.
    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.mark",
        json!({ "enrollmentId": enrollment_id, "date": "2026-08-10", "status": "PRESENT" }),
    );
    assert_eq!(marked["enrollment"]["classesRemaining"], json!(7));
    assert_eq!(
        marked["enrollment"]["renewalDate"],
        json!(expected_renewal(28)),
        "ceil(7/2) = 4 weeks"
    );
    assert_eq!(marked["attendance"]["updated"], json!(false));

    // Re-marking the same day PRESENT is a no-op on the count.
    let remarked = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.mark",
        json!({ "enrollmentId": enrollment_id, "date": "2026-08-10", "status": "PRESENT" }),
    );
    assert_eq!(remarked["enrollment"]["classesRemaining"], json!(7));
    assert_eq!(remarked["attendance"]["updated"], json!(true));

    // A second session consumed: 6 remaining, 3 weeks out.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.mark",
        json!({ "enrollmentId": enrollment_id, "date": "2026-08-12", "status": "PRESENT" }),
    );
    assert_eq!(second["enrollment"]["classesRemaining"], json!(6));
    assert_eq!(second["enrollment"]["renewalDate"], json!(expected_renewal(21)));

    // PRESENT -> excused hands the class back.
    let excused = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.mark",
        json!({ "enrollmentId": enrollment_id, "date": "2026-08-12", "status": "ABSENT_EXCUSED" }),
    );
    assert_eq!(excused["enrollment"]["classesRemaining"], json!(7));
    assert_eq!(excused["enrollment"]["renewalDate"], json!(expected_renewal(28)));

    // Excused -> unexcused stays on the non-consuming side of the machine.
    let unexcused = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.mark",
        json!({ "enrollmentId": enrollment_id, "date": "2026-08-12", "status": "ABSENT_UNEXCUSED" }),
    );
    assert_eq!(unexcused["enrollment"]["classesRemaining"], json!(7));
    assert_eq!(unexcused["attendance"]["updated"], json!(true));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn empty_package_floors_at_zero_and_still_records_attendance() {
    let (mut child, mut stdin, mut reader, workspace, seeded) =
        seeded_workspace("classportal-attendance-floor");
    let student_id = str_field(&seeded, "studentId");
    let science_class_id = str_field(&seeded, "scienceClassId");

    let _ = login(&mut stdin, &mut reader, "1", "admin@example.com", "admin123");
    let enrollment = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "enrollments.create",
        json!({
            "studentId": student_id,
            "classId": science_class_id,
            "totalClasses": 5,
            "classesRemaining": 0,
            "classesPerWeek": 1
        }),
    );
    let enrollment_id = str_field(&enrollment, "enrollmentId");
    assert_eq!(enrollment["renewalDate"], json!(null));

    let _ = login(
        &mut stdin,
        &mut reader,
        "3",
        "teacher@example.com",
        "teacher123",
    );
    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.mark",
        json!({ "enrollmentId": enrollment_id, "date": "2026-08-11", "status": "PRESENT" }),
    );
    assert_eq!(
        marked["enrollment"]["classesRemaining"],
        json!(0),
        "never goes negative"
    );
    assert_eq!(marked["enrollment"]["renewalDate"], json!(null));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.list",
        json!({ "classId": science_class_id }),
    );
    assert_eq!(listed["attendance"].as_array().map(|a| a.len()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn threshold_crossing_notifies_parent_once_per_window() {
    let (mut child, mut stdin, mut reader, workspace, seeded) =
        seeded_workspace("classportal-attendance-threshold");
    let student_id = str_field(&seeded, "studentId");

    let _ = login(&mut stdin, &mut reader, "1", "admin@example.com", "admin123");
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Chess Club" }),
    );
    let class_id = str_field(&created, "classId");
    let enrollment = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "enrollments.create",
        json!({
            "studentId": student_id,
            "classId": class_id,
            "totalClasses": 10,
            "classesRemaining": 3,
            "classesPerWeek": 1
        }),
    );
    let enrollment_id = str_field(&enrollment, "enrollmentId");

    let _ = login(
        &mut stdin,
        &mut reader,
        "4",
        "teacher@example.com",
        "teacher123",
    );
    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.mark",
        json!({ "enrollmentId": enrollment_id, "date": "2026-08-10", "status": "PRESENT" }),
    );
    assert_eq!(marked["enrollment"]["classesRemaining"], json!(2));

    let _ = login(
        &mut stdin,
        &mut reader,
        "6",
        "parent@example.com",
        "parent123",
    );
    let first = chess_renewal_notes(&mut stdin, &mut reader, "7");
    assert_eq!(first.len(), 1, "threshold crossing warns the parent");
    assert!(first[0]["message"]
        .as_str()
        .unwrap_or("")
        .contains("2 classes remaining"));

    // Another consuming mark inside the dedup window stays quiet.
    let _ = login(
        &mut stdin,
        &mut reader,
        "8",
        "teacher@example.com",
        "teacher123",
    );
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.mark",
        json!({ "enrollmentId": enrollment_id, "date": "2026-08-11", "status": "PRESENT" }),
    );
    assert_eq!(again["enrollment"]["classesRemaining"], json!(1));

    let _ = login(
        &mut stdin,
        &mut reader,
        "10",
        "parent@example.com",
        "parent123",
    );
    let second = chess_renewal_notes(&mut stdin, &mut reader, "11");
    assert_eq!(second.len(), 1, "window dedup suppresses the repeat");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

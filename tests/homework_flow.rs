mod test_support;

use chrono::{Duration, Utc};
use serde_json::json;
use test_support::{login, request_err_code, request_ok, seeded_workspace, str_field};

#[test]
fn create_and_bulk_create_fan_out_to_enrolled_parents() {
    let (mut child, mut stdin, mut reader, workspace, seeded) =
        seeded_workspace("classportal-homework");
    let math_class_id = str_field(&seeded, "mathClassId");
    let student_id = str_field(&seeded, "studentId");

    let _ = login(
        &mut stdin,
        &mut reader,
        "1",
        "teacher@example.com",
        "teacher123",
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "homework.create",
        json!({
            "classId": math_class_id,
            "title": "Fractions Worksheet",
            "description": "Problems 1-10",
            "dueDate": "2026-08-20"
        }),
    );
    assert_eq!(created["notified"], json!(1));
    let assignment_id = str_field(&created, "assignmentId");

    // Mathematics 101 meets Mon/Wed; from Monday 2026-09-07 the first four
    // sessions are 9/7, 9/9, 9/14, 9/16, each due the evening before.
    let bulk = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "homework.bulkCreate",
        json!({
            "classId": math_class_id,
            "unitName": "Unit 3",
            "description": "Weekly drill",
            "numberOfClasses": 4,
            "startDate": "2026-09-07"
        }),
    );
    assert_eq!(bulk["count"], json!(4));
    let assignments = bulk["assignments"].as_array().expect("assignments");
    let due: Vec<&str> = assignments
        .iter()
        .map(|a| a["dueDate"].as_str().unwrap_or(""))
        .collect();
    assert_eq!(due, vec!["2026-09-06", "2026-09-08", "2026-09-13", "2026-09-15"]);
    assert_eq!(assignments[0]["title"], json!("Unit 3 - Lesson 1"));
    assert_eq!(assignments[3]["title"], json!("Unit 3 - Lesson 4"));

    // Parent sees the creation notifications and the assignment list.
    let _ = login(
        &mut stdin,
        &mut reader,
        "4",
        "parent@example.com",
        "parent123",
    );
    let notes = request_ok(&mut stdin, &mut reader, "5", "notifications.list", json!({}));
    let homework_notes = notes["notifications"]
        .as_array()
        .expect("notifications array")
        .iter()
        .filter(|n| n["type"] == json!("NEW_HOMEWORK"))
        .count();
    assert_eq!(homework_notes, 5, "one single + four bulk");

    let listed = request_ok(&mut stdin, &mut reader, "6", "homework.list", json!({}));
    let titles: Vec<String> = listed["homework"]
        .as_array()
        .expect("homework array")
        .iter()
        .map(|h| h["title"].as_str().unwrap_or("").to_string())
        .collect();
    assert!(titles.contains(&"Fractions Worksheet".to_string()));
    assert!(titles.contains(&"Unit 3 - Lesson 4".to_string()));

    // Submission: happy path, then the validation gates.
    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "submissions.create",
        json!({
            "assignmentId": assignment_id,
            "studentId": student_id,
            "fileName": "fractions answers.pdf",
            "contentType": "application/pdf",
            "fileSize": 123456
        }),
    );
    let file_url = str_field(&submitted, "fileUrl");
    assert!(file_url.contains("fractions_answers.pdf"));

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "8",
        "submissions.create",
        json!({
            "assignmentId": assignment_id,
            "studentId": student_id,
            "fileName": "payload.exe",
            "contentType": "application/x-msdownload",
            "fileSize": 10
        }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "9",
        "submissions.create",
        json!({
            "assignmentId": assignment_id,
            "studentId": student_id,
            "fileName": "movie.mp4",
            "contentType": "video/mp4",
            "fileSize": 60 * 1024 * 1024
        }),
    );
    assert_eq!(code, "bad_params");

    let mine = request_ok(&mut stdin, &mut reader, "10", "submissions.list", json!({}));
    assert_eq!(mine["submissions"].as_array().map(|a| a.len()), Some(1));

    // Another parent cannot submit on behalf of this student.
    let _ = login(&mut stdin, &mut reader, "11", "admin@example.com", "admin123");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "users.create",
        json!({
            "email": "other@example.com",
            "name": "Other Parent",
            "password": "other123",
            "role": "PARENT"
        }),
    );
    let _ = login(
        &mut stdin,
        &mut reader,
        "13",
        "other@example.com",
        "other123",
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "14",
        "submissions.create",
        json!({
            "assignmentId": assignment_id,
            "studentId": student_id,
            "fileName": "sneaky.pdf",
            "contentType": "application/pdf",
            "fileSize": 10
        }),
    );
    assert_eq!(code, "forbidden");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn homework_reminder_sweep_skips_submitted_and_dedups_daily() {
    let (mut child, mut stdin, mut reader, workspace, seeded) =
        seeded_workspace("classportal-homework-sweep");
    let science_class_id = str_field(&seeded, "scienceClassId");
    let student_id = str_field(&seeded, "studentId");

    // Science has no enrollments yet, so creating the assignment notifies
    // nobody; the enrollment lands afterwards and only the sweep can remind.
    let _ = login(
        &mut stdin,
        &mut reader,
        "1",
        "teacher@example.com",
        "teacher123",
    );
    let tomorrow = (Utc::now().date_naive() + Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "homework.create",
        json!({
            "classId": science_class_id,
            "title": "Lab Report",
            "description": "Write up the density experiment",
            "dueDate": tomorrow
        }),
    );
    assert_eq!(created["notified"], json!(0));

    let _ = login(&mut stdin, &mut reader, "3", "admin@example.com", "admin123");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "enrollments.create",
        json!({
            "studentId": student_id,
            "classId": science_class_id,
            "totalClasses": 10,
            "classesPerWeek": 1
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({ "cronSecret": "hw-secret" }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "cron.checkHomework",
        json!({ "secret": "hw-secret" }),
    );
    assert!(first["homeworkChecked"].as_i64().unwrap_or(0) >= 1);
    assert_eq!(first["notificationsSent"], json!(1));

    let _ = login(
        &mut stdin,
        &mut reader,
        "7",
        "parent@example.com",
        "parent123",
    );
    let notes = request_ok(&mut stdin, &mut reader, "8", "notifications.list", json!({}));
    let reminders: Vec<&serde_json::Value> = notes["notifications"]
        .as_array()
        .expect("notifications array")
        .iter()
        .filter(|n| n["title"] == json!("Homework Due Soon"))
        .collect();
    assert_eq!(reminders.len(), 1);
    assert!(reminders[0]["message"]
        .as_str()
        .unwrap_or("")
        .contains("Lab Report"));

    // Within 24 hours the reminder is not repeated.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "cron.checkHomework",
        json!({ "secret": "hw-secret" }),
    );
    assert_eq!(second["notificationsSent"], json!(0));

    // A submission removes the student from any further reminder runs.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "submissions.create",
        json!({
            "assignmentId": str_field(&created, "assignmentId"),
            "studentId": student_id,
            "fileName": "report.pdf",
            "contentType": "application/pdf",
            "fileSize": 4096
        }),
    );
    let third = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "cron.checkHomework",
        json!({ "secret": "hw-secret" }),
    );
    assert_eq!(third["notificationsSent"], json!(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

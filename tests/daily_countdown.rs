mod test_support;

use serde_json::json;
use test_support::{login, request_ok, seeded_workspace, str_field};

#[test]
fn countdown_formats_per_enrollment_and_sends_once_per_day() {
    let (mut child, mut stdin, mut reader, workspace, seeded) =
        seeded_workspace("classportal-countdown");
    let science_class_id = str_field(&seeded, "scienceClassId");

    let _ = login(&mut stdin, &mut reader, "1", "admin@example.com", "admin123");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "cronSecret": "countdown-secret" }),
    );

    // A second family with an urgent package.
    let parent2 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.create",
        json!({
            "email": "parent2@example.com",
            "name": "Second Parent",
            "password": "parent456",
            "role": "PARENT"
        }),
    );
    let student2 = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "parentId": str_field(&parent2, "userId"), "name": "Second Student" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "enrollments.create",
        json!({
            "studentId": str_field(&student2, "studentId"),
            "classId": science_class_id,
            "totalClasses": 10,
            "classesRemaining": 1,
            "classesPerWeek": 1
        }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "cron.dailyCountdown",
        json!({ "secret": "countdown-secret" }),
    );
    assert_eq!(first["enrollmentsChecked"], json!(2));
    assert_eq!(first["notificationsSent"], json!(2));

    // Steady-state family.
    let _ = login(
        &mut stdin,
        &mut reader,
        "7",
        "parent@example.com",
        "parent123",
    );
    let listed = request_ok(&mut stdin, &mut reader, "8", "notifications.list", json!({}));
    let countdowns: Vec<&serde_json::Value> = listed["notifications"]
        .as_array()
        .expect("notifications array")
        .iter()
        .filter(|n| {
            n["title"]
                .as_str()
                .unwrap_or("")
                .contains("Class Update for Student Demo")
        })
        .collect();
    assert_eq!(countdowns.len(), 1);
    let message = countdowns[0]["message"].as_str().unwrap_or("");
    assert!(message.starts_with("Mathematics 101:"));
    assert!(message.contains("8 classes remaining - Renewal due"));

    // Urgent family.
    let _ = login(
        &mut stdin,
        &mut reader,
        "9",
        "parent2@example.com",
        "parent456",
    );
    let listed = request_ok(&mut stdin, &mut reader, "10", "notifications.list", json!({}));
    let urgent: Vec<&serde_json::Value> = listed["notifications"]
        .as_array()
        .expect("notifications array")
        .iter()
        .filter(|n| {
            n["title"]
                .as_str()
                .unwrap_or("")
                .contains("Class Update for Second Student")
        })
        .collect();
    assert_eq!(urgent.len(), 1);
    assert!(urgent[0]["message"]
        .as_str()
        .unwrap_or("")
        .contains("Only 1 class left"));

    // Same calendar day: no repeats.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "cron.dailyCountdown",
        json!({ "secret": "countdown-secret" }),
    );
    assert_eq!(second["enrollmentsChecked"], json!(2));
    assert_eq!(second["notificationsSent"], json!(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

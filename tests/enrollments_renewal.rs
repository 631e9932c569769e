mod test_support;

use chrono::{Duration, Utc};
use serde_json::json;
use test_support::{login, request_err_code, request_ok, seeded_workspace, str_field};

fn days_out(days: i64) -> String {
    (Utc::now().date_naive() + Duration::days(days))
        .format("%Y-%m-%d")
        .to_string()
}

#[test]
fn package_lifecycle_projects_and_reprojects_renewal() {
    let (mut child, mut stdin, mut reader, workspace, seeded) =
        seeded_workspace("classportal-enrollments");
    let student_id = str_field(&seeded, "studentId");
    let science_class_id = str_field(&seeded, "scienceClassId");
    let seed_enrollment_id = str_field(&seeded, "enrollmentId");

    let _ = login(&mut stdin, &mut reader, "1", "admin@example.com", "admin123");

    // 12 classes at 3/week: exhausted in 4 weeks.
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "enrollments.create",
        json!({
            "studentId": student_id,
            "classId": science_class_id,
            "totalClasses": 12,
            "classesPerWeek": 3
        }),
    );
    assert_eq!(created["classesRemaining"], json!(12));
    assert_eq!(created["renewalDate"], json!(days_out(28)));
    let science_enrollment_id = str_field(&created, "enrollmentId");

    // One enrollment per (student, class).
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "enrollments.create",
        json!({
            "studentId": student_id,
            "classId": science_class_id,
            "totalClasses": 4
        }),
    );
    assert_eq!(code, "bad_params");

    // Top-up is the sanctioned non-attendance count mutation:
    // 8 + 5 = 13 remaining at 2/week -> 7 weeks.
    let renewed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "enrollments.renew",
        json!({ "enrollmentId": seed_enrollment_id, "addClasses": 5 }),
    );
    assert_eq!(renewed["classesRemaining"], json!(13));
    assert_eq!(renewed["totalClasses"], json!(15));
    assert_eq!(renewed["renewalDate"], json!(days_out(49)));

    // Deactivation hides the enrollment from the parent's view.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "enrollments.deactivate",
        json!({ "enrollmentId": science_enrollment_id }),
    );
    let _ = login(
        &mut stdin,
        &mut reader,
        "6",
        "parent@example.com",
        "parent123",
    );
    let students = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    let enrollments = students["students"][0]["enrollments"]
        .as_array()
        .expect("enrollments array");
    assert_eq!(enrollments.len(), 1);
    assert_eq!(enrollments[0]["className"], json!("Mathematics 101"));
    assert_eq!(enrollments[0]["classesRemaining"], json!(13));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn zero_remaining_has_no_projection() {
    let (mut child, mut stdin, mut reader, workspace, seeded) =
        seeded_workspace("classportal-enrollments-zero");
    let student_id = str_field(&seeded, "studentId");
    let science_class_id = str_field(&seeded, "scienceClassId");

    let _ = login(&mut stdin, &mut reader, "1", "admin@example.com", "admin123");
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "enrollments.create",
        json!({
            "studentId": student_id,
            "classId": science_class_id,
            "totalClasses": 6,
            "classesRemaining": 0,
            "classesPerWeek": 2
        }),
    );
    assert_eq!(created["renewalDate"], json!(null));

    // Renewal brings the projection back.
    let renewed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "enrollments.renew",
        json!({ "enrollmentId": str_field(&created, "enrollmentId"), "addClasses": 4 }),
    );
    assert_eq!(renewed["classesRemaining"], json!(4));
    assert_eq!(renewed["renewalDate"], json!(days_out(14)));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

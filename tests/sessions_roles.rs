mod test_support;

use serde_json::json;
use test_support::{
    login, request, request_err_code, request_ok, seeded_workspace, spawn_sidecar, temp_dir,
};

#[test]
fn role_gates_hold_across_the_surface() {
    let (mut child, mut stdin, mut reader, workspace, seeded) =
        seeded_workspace("classportal-roles");
    let enrollment_id = seeded["enrollmentId"].as_str().expect("enrollmentId");

    // Nobody signed in yet.
    let code = request_err_code(&mut stdin, &mut reader, "1", "classes.list", json!({}));
    assert_eq!(code, "unauthorized");
    let whoami = request_ok(&mut stdin, &mut reader, "2", "session.whoami", json!({}));
    assert_eq!(whoami, json!(null));

    let bad = request(
        &mut stdin,
        &mut reader,
        "3",
        "session.login",
        json!({ "email": "parent@example.com", "password": "nope" }),
    );
    assert_eq!(bad["ok"], json!(false));
    assert_eq!(bad["error"]["code"], json!("unauthorized"));

    // Parent: read-only surface, no staff verbs.
    let me = login(
        &mut stdin,
        &mut reader,
        "4",
        "parent@example.com",
        "parent123",
    );
    assert_eq!(me["role"], json!("PARENT"));
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.mark",
        json!({ "enrollmentId": enrollment_id, "date": "2026-08-10", "status": "PRESENT" }),
    );
    assert_eq!(code, "forbidden");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "6",
        "classes.create",
        json!({ "name": "Hack Class" }),
    );
    assert_eq!(code, "forbidden");
    let code = request_err_code(&mut stdin, &mut reader, "7", "users.list", json!({}));
    assert_eq!(code, "forbidden");
    let code = request_err_code(&mut stdin, &mut reader, "8", "dashboard.admin", json!({}));
    assert_eq!(code, "forbidden");

    // Teacher: marks attendance, but class administration is admin-only.
    let _ = login(
        &mut stdin,
        &mut reader,
        "9",
        "teacher@example.com",
        "teacher123",
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "10",
        "classes.create",
        json!({ "name": "Teacher Class" }),
    );
    assert_eq!(code, "forbidden");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "attendance.mark",
        json!({ "enrollmentId": enrollment_id, "date": "2026-08-10", "status": "HOLIDAY" }),
    );

    // Admin: full administration.
    let _ = login(&mut stdin, &mut reader, "12", "admin@example.com", "admin123");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "classes.create",
        json!({ "name": "Admin Class" }),
    );

    // Logout drops the actor.
    let _ = request_ok(&mut stdin, &mut reader, "14", "session.logout", json!({}));
    let whoami = request_ok(&mut stdin, &mut reader, "15", "session.whoami", json!({}));
    assert_eq!(whoami, json!(null));
    let code = request_err_code(&mut stdin, &mut reader, "16", "classes.list", json!({}));
    assert_eq!(code, "unauthorized");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn first_account_bootstraps_then_creation_locks_down() {
    let workspace = temp_dir("classportal-bootstrap");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Empty workspace: the first account needs no session.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({
            "email": "founder@example.com",
            "name": "Founder",
            "password": "founder123",
            "role": "ADMIN"
        }),
    );

    // From now on account creation is admin-gated.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "users.create",
        json!({
            "email": "intruder@example.com",
            "name": "Intruder",
            "password": "intruder123",
            "role": "ADMIN"
        }),
    );
    assert_eq!(code, "unauthorized");

    let _ = login(
        &mut stdin,
        &mut reader,
        "4",
        "founder@example.com",
        "founder123",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "users.create",
        json!({
            "email": "teacher@example.com",
            "name": "Hired Teacher",
            "password": "teach123",
            "role": "TEACHER"
        }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

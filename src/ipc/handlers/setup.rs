use chrono::Duration;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use super::users::hash_password;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::require_role;
use crate::ipc::types::{AppState, Request, Role};
use crate::mailer;
use crate::notify;
use crate::renewal;

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Admin]) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut result = json!({});
    for (out_key, key) in [
        ("cronSecret", "cron.secret"),
        ("storage", "storage"),
        ("emailProvider", "email.provider"),
    ] {
        match db::settings_get_json(conn, key) {
            Ok(v) => result[out_key] = v.unwrap_or(serde_json::Value::Null),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, result)
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Admin]) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut touched_email = false;
    for (in_key, key) in [
        ("cronSecret", "cron.secret"),
        ("storage", "storage"),
        ("emailProvider", "email.provider"),
    ] {
        if let Some(value) = req.params.get(in_key) {
            if let Err(e) = db::settings_set_json(conn, key, value) {
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
            if key == "email.provider" {
                touched_email = true;
            }
        }
    }

    if touched_email {
        if let Some(conn) = state.db.as_ref() {
            state.mailer = mailer::from_settings(conn);
        }
    }
    ok(&req.id, json!({ "ok": true }))
}

fn user_id_by_email(conn: &Connection, email: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT id FROM users WHERE email = ?", [email], |r| {
        r.get(0)
    })
    .optional()
}

fn seed_user(
    conn: &Connection,
    email: &str,
    name: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    let hash = hash_password(password)?;
    conn.execute(
        "INSERT INTO users(id, email, name, password_hash, role, email_preferences, created_at)
         VALUES(?, ?, ?, ?, ?, 1, ?)",
        (&id, email, name, &hash, role, notify::now_rfc3339()),
    )?;
    Ok(id)
}

/// Demo fixture for a fresh workspace: accounts for every role, one student,
/// two classes, an enrollment mid-package, lessons, homework, an announcement
/// and an upcoming holiday. Open on an empty workspace (there is nobody to
/// sign in yet), admin-only afterwards.
fn handle_setup_seed_demo(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let user_count: i64 = match conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if user_count > 0 {
        if let Err(resp) = require_role(state, req, &[Role::Admin]) {
            return resp;
        }
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match user_id_by_email(conn, "teacher@example.com") {
        Ok(Some(_)) => return ok(&req.id, json!({ "alreadySeeded": true })),
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let seeded = (|| -> anyhow::Result<serde_json::Value> {
        let admin_id = seed_user(&tx, "admin@example.com", "Admin Demo", "admin123", "ADMIN")?;
        let teacher_id = seed_user(
            &tx,
            "teacher@example.com",
            "Teacher Demo",
            "teacher123",
            "TEACHER",
        )?;
        let parent_id = seed_user(
            &tx,
            "parent@example.com",
            "Parent Demo",
            "parent123",
            "PARENT",
        )?;

        let student_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO students(id, parent_id, name, english_level, target_exam, created_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &student_id,
                &parent_id,
                "Student Demo",
                Some("B1"),
                Option::<String>::None,
                notify::now_rfc3339(),
            ),
        )?;

        let math_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO classes(id, name, description, schedule, days_of_week, start_time, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &math_id,
                "Mathematics 101",
                "Introduction to algebra and geometry",
                "Monday & Wednesday 3:00 PM - 4:30 PM",
                "[1,3]",
                "15:00",
                notify::now_rfc3339(),
            ),
        )?;
        let science_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO classes(id, name, description, schedule, days_of_week, start_time, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &science_id,
                "Science 101",
                "Physical and life sciences",
                "Tuesday & Thursday 3:00 PM - 4:30 PM",
                "[2,4]",
                "15:00",
                notify::now_rfc3339(),
            ),
        )?;

        let today = notify::today_utc();
        let enrollment_id = Uuid::new_v4().to_string();
        let renewal = renewal::renewal_date(8, 2, today).map(|d| d.format("%Y-%m-%d").to_string());
        tx.execute(
            "INSERT INTO enrollments(id, student_id, class_id, classes_remaining, total_classes,
                                     classes_per_week, renewal_date, is_active, created_at)
             VALUES(?, ?, ?, 8, 10, 2, ?, 1, ?)",
            (&enrollment_id, &student_id, &math_id, &renewal, notify::now_rfc3339()),
        )?;

        for (offset, unit, topics, lesson_notes) in [
            (
                7,
                "Unit 1: Algebra Basics",
                r#"["Variables","Linear Equations","Graphing"]"#,
                "Students showed good understanding of variables",
            ),
            (
                2,
                "Unit 1: Algebra Basics",
                r#"["Solving Equations","Word Problems"]"#,
                "Practice more word problems at home",
            ),
        ] {
            tx.execute(
                "INSERT INTO lessons(id, class_id, date, unit, topics, notes, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &math_id,
                    (today - Duration::days(offset)).format("%Y-%m-%d").to_string(),
                    unit,
                    topics,
                    lesson_notes,
                    notify::now_rfc3339(),
                ),
            )?;
        }

        tx.execute(
            "INSERT INTO homework_assignments(id, class_id, title, description, due_date, created_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &math_id,
                "Algebra Practice Worksheet",
                "Complete problems 1-20 on page 45. Show all work.",
                (today + Duration::days(7)).format("%Y-%m-%d").to_string(),
                notify::now_rfc3339(),
            ),
        )?;

        tx.execute(
            "INSERT INTO announcements(id, title, content, category, priority, created_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                "Welcome to Classroom Portal!",
                "This is your new parent portal where you can track homework, view lessons, and stay updated on class activities.",
                "general",
                "high",
                notify::now_rfc3339(),
            ),
        )?;

        tx.execute(
            "INSERT INTO holidays(id, name, date, description, created_at)
             VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                "Term Break",
                (today + Duration::days(30)).format("%Y-%m-%d").to_string(),
                "No classes during the term break week",
                notify::now_rfc3339(),
            ),
        )?;

        Ok(json!({
            "adminId": admin_id,
            "teacherId": teacher_id,
            "parentId": parent_id,
            "studentId": student_id,
            "mathClassId": math_id,
            "scienceClassId": science_id,
            "enrollmentId": enrollment_id,
        }))
    })();

    let seeded = match seeded {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, seeded)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        "setup.seedDemo" => Some(handle_setup_seed_demo(state, req)),
        _ => None,
    }
}

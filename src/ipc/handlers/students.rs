use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, opt_str, require_role, required_str};
use crate::ipc::types::{AppState, Request, Role};
use crate::notify;

fn active_enrollments_json(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<serde_json::Value>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.class_id, c.name, c.schedule, e.classes_remaining, e.total_classes,
                e.classes_per_week, e.renewal_date
         FROM enrollments e
         JOIN classes c ON c.id = e.class_id
         WHERE e.student_id = ? AND e.is_active = 1
         ORDER BY c.name",
    )?;
    stmt.query_map([student_id], |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "classId": r.get::<_, String>(1)?,
            "className": r.get::<_, String>(2)?,
            "schedule": r.get::<_, Option<String>>(3)?,
            "classesRemaining": r.get::<_, i64>(4)?,
            "totalClasses": r.get::<_, i64>(5)?,
            "classesPerWeek": r.get::<_, i64>(6)?,
            "renewalDate": r.get::<_, Option<String>>(7)?,
        }))
    })
    .and_then(|it| it.collect())
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match require_role(state, req, &[Role::Admin, Role::Teacher, Role::Parent]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    // Parents see only their own children; staff see everyone with the
    // parent's contact details attached.
    let (sql, param): (&str, Option<&str>) = if actor.role == Role::Parent {
        (
            "SELECT s.id, s.name, s.english_level, s.target_exam, s.parent_id, u.name, u.email
             FROM students s JOIN users u ON u.id = s.parent_id
             WHERE s.parent_id = ? ORDER BY s.name",
            Some(actor.user_id.as_str()),
        )
    } else {
        (
            "SELECT s.id, s.name, s.english_level, s.target_exam, s.parent_id, u.name, u.email
             FROM students s JOIN users u ON u.id = s.parent_id
             ORDER BY s.name",
            None,
        )
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<(String, serde_json::Value)> {
        let id: String = r.get(0)?;
        let row = json!({
            "id": id,
            "name": r.get::<_, String>(1)?,
            "englishLevel": r.get::<_, Option<String>>(2)?,
            "targetExam": r.get::<_, Option<String>>(3)?,
            "parent": {
                "id": r.get::<_, String>(4)?,
                "name": r.get::<_, String>(5)?,
                "email": r.get::<_, String>(6)?,
            },
        });
        Ok((id, row))
    };
    let base = match param {
        Some(p) => stmt
            .query_map([p], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    };
    let base = match base {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut students = Vec::with_capacity(base.len());
    for (id, mut row) in base {
        let enrollments = match active_enrollments_json(conn, &id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        row["enrollments"] = json!(enrollments);
        students.push(row);
    }

    ok(&req.id, json!({ "students": students }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Admin]) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let parent_id = match required_str(req, "parentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let english_level = opt_str(&req.params, "englishLevel");
    let target_exam = opt_str(&req.params, "targetExam");

    let parent_ok: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ? AND role = 'PARENT'",
            [&parent_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if parent_ok.is_none() {
        return err(&req.id, "not_found", "parent account not found", None);
    }

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, parent_id, name, english_level, target_exam, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &parent_id,
            &name,
            &english_level,
            &target_exam,
            notify::now_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id, "name": name }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        _ => None,
    }
}

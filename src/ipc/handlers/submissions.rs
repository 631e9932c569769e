use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, opt_str, require_role, required_i64, required_str};
use crate::ipc::types::{AppState, Request, Role};
use crate::notify;
use crate::storage;

fn handle_submissions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match require_role(state, req, &[Role::Parent]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let file_name = match required_str(req, "fileName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let content_type = match required_str(req, "contentType") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let file_size = match required_i64(req, "fileSize") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let notes = opt_str(&req.params, "notes");

    if let Err(reason) = storage::validate_upload(&content_type, file_size) {
        return err(&req.id, "bad_params", reason, None);
    }

    // The student must belong to the submitting parent.
    let parent_id: Option<String> = match conn
        .query_row(
            "SELECT parent_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match parent_id {
        None => return err(&req.id, "not_found", "student not found", None),
        Some(pid) if pid != actor.user_id => {
            return err(&req.id, "forbidden", "student belongs to another parent", None)
        }
        Some(_) => {}
    }

    let assignment_ok: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM homework_assignments WHERE id = ?",
            [&assignment_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if assignment_ok.is_none() {
        return err(&req.id, "not_found", "homework not found", None);
    }

    // The upload itself happens out of band against the object store; the
    // daemon records the resulting key as a public URL.
    let file_key = match opt_str(&req.params, "fileKey") {
        Some(k) => k,
        None => storage::generate_unique_key(&actor.user_id, &assignment_id, &file_name),
    };
    let settings = storage::load_settings(conn);
    let file_url = storage::public_url(&settings, &file_key);

    let submission_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO homework_submissions(id, assignment_id, student_id, file_url, file_name,
                                          file_size, notes, submitted_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &submission_id,
            &assignment_id,
            &student_id,
            &file_url,
            &file_name,
            file_size,
            &notes,
            notify::now_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "homework_submissions" })),
        );
    }

    ok(
        &req.id,
        json!({
            "submissionId": submission_id,
            "assignmentId": assignment_id,
            "studentId": student_id,
            "fileUrl": file_url,
        }),
    )
}

fn handle_submissions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match require_role(state, req, &[Role::Teacher, Role::Parent]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let (sql, param): (&str, Option<&str>) = if actor.role == Role::Parent {
        (
            "SELECT hs.id, hs.assignment_id, h.title, c.name, hs.student_id, s.name,
                    hs.file_url, hs.file_name, hs.file_size, hs.notes, hs.submitted_at
             FROM homework_submissions hs
             JOIN homework_assignments h ON h.id = hs.assignment_id
             JOIN classes c ON c.id = h.class_id
             JOIN students s ON s.id = hs.student_id
             WHERE s.parent_id = ?
             ORDER BY hs.submitted_at DESC",
            Some(actor.user_id.as_str()),
        )
    } else {
        (
            "SELECT hs.id, hs.assignment_id, h.title, c.name, hs.student_id, s.name,
                    hs.file_url, hs.file_name, hs.file_size, hs.notes, hs.submitted_at
             FROM homework_submissions hs
             JOIN homework_assignments h ON h.id = hs.assignment_id
             JOIN classes c ON c.id = h.class_id
             JOIN students s ON s.id = hs.student_id
             ORDER BY hs.submitted_at DESC",
            None,
        )
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "assignmentId": r.get::<_, String>(1)?,
            "assignmentTitle": r.get::<_, String>(2)?,
            "className": r.get::<_, String>(3)?,
            "studentId": r.get::<_, String>(4)?,
            "studentName": r.get::<_, String>(5)?,
            "fileUrl": r.get::<_, String>(6)?,
            "fileName": r.get::<_, String>(7)?,
            "fileSize": r.get::<_, i64>(8)?,
            "notes": r.get::<_, Option<String>>(9)?,
            "submittedAt": r.get::<_, String>(10)?,
        }))
    };
    let rows = match param {
        Some(p) => stmt
            .query_map([p], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    };

    match rows {
        Ok(submissions) => ok(&req.id, json!({ "submissions": submissions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "submissions.create" => Some(handle_submissions_create(state, req)),
        "submissions.list" => Some(handle_submissions_list(state, req)),
        _ => None,
    }
}

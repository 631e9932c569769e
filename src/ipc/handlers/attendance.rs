use chrono::NaiveDate;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_role, required_date, required_str};
use crate::ipc::types::{Actor, AppState, Request, Role};
use crate::mailer::Mailer;
use crate::notify;
use crate::renewal::{self, AttendanceStatus};

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn db(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

struct EnrollmentRow {
    student_id: String,
    class_id: String,
    classes_remaining: i64,
    classes_per_week: i64,
    parent_id: String,
    student_name: String,
    class_name: String,
}

fn load_enrollment(conn: &Connection, enrollment_id: &str) -> Result<EnrollmentRow, HandlerErr> {
    conn.query_row(
        "SELECT e.student_id, e.class_id, e.classes_remaining, e.classes_per_week,
                s.parent_id, s.name, c.name
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         JOIN classes c ON c.id = e.class_id
         WHERE e.id = ?",
        [enrollment_id],
        |r| {
            Ok(EnrollmentRow {
                student_id: r.get(0)?,
                class_id: r.get(1)?,
                classes_remaining: r.get(2)?,
                classes_per_week: r.get(3)?,
                parent_id: r.get(4)?,
                student_name: r.get(5)?,
                class_name: r.get(6)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "enrollment not found".to_string(),
        details: None,
    })
}

/// The attendance transition: upsert the (enrollment, date) mark, move the
/// package count per the two-class state machine, reproject the renewal date,
/// and notify the parent once per window when the count crosses the renewal
/// threshold. Runs entirely inside the caller's transaction.
fn apply_mark(
    tx: &Connection,
    mailer: &dyn Mailer,
    actor: &Actor,
    enrollment_id: &str,
    date: NaiveDate,
    new_status: AttendanceStatus,
    notes: Option<&str>,
) -> Result<serde_json::Value, HandlerErr> {
    let enrollment = load_enrollment(tx, enrollment_id)?;
    let date_str = date.format("%Y-%m-%d").to_string();

    let existing: Option<(String, String)> = tx
        .query_row(
            "SELECT id, status FROM attendance WHERE enrollment_id = ? AND date = ?",
            (enrollment_id, &date_str),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;

    let (attendance_id, old_status) = match existing {
        Some((id, raw)) => {
            let old = AttendanceStatus::parse(&raw).ok_or_else(|| HandlerErr {
                code: "internal",
                message: format!("stored attendance status invalid: {raw}"),
                details: None,
            })?;
            tx.execute(
                "UPDATE attendance SET status = ?, notes = ?, marked_by = ? WHERE id = ?",
                (new_status.as_str(), notes, &actor.user_id, &id),
            )
            .map_err(|e| HandlerErr {
                code: "db_update_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "attendance" })),
            })?;
            (id, Some(old))
        }
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO attendance(id, enrollment_id, class_id, student_id, date, status,
                                        notes, marked_by, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    enrollment_id,
                    &enrollment.class_id,
                    &enrollment.student_id,
                    &date_str,
                    new_status.as_str(),
                    notes,
                    &actor.user_id,
                    notify::now_rfc3339(),
                ),
            )
            .map_err(|e| HandlerErr {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "attendance" })),
            })?;
            (id, None)
        }
    };

    let delta = renewal::count_delta(old_status, new_status);
    let (classes_remaining, renewal_date) = if delta != 0 {
        let new_count = renewal::apply_count_delta(enrollment.classes_remaining, delta);
        let projected = renewal::renewal_date(
            new_count,
            enrollment.classes_per_week,
            notify::today_utc(),
        )
        .map(|d| d.format("%Y-%m-%d").to_string());
        tx.execute(
            "UPDATE enrollments SET classes_remaining = ?, renewal_date = ? WHERE id = ?",
            (new_count, &projected, enrollment_id),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "enrollments" })),
        })?;

        // Threshold crossing on a decrement warns the parent, but at most
        // once per window for this class (same dedup as the scheduled sweep).
        if delta < 0 && new_count <= 2 {
            let already = notify::has_recent_notification(
                tx,
                &enrollment.parent_id,
                notify::NotificationKind::MembershipRenewal,
                &enrollment.class_name,
                &notify::since_days_ago(7),
            )
            .map_err(|e| HandlerErr {
                code: "db_query_failed",
                message: e.to_string(),
                details: None,
            })?;
            if !already {
                notify::membership_renewal(
                    tx,
                    mailer,
                    &enrollment.parent_id,
                    &enrollment.student_name,
                    &enrollment.class_name,
                    new_count,
                )
                .map_err(|e| HandlerErr {
                    code: "db_insert_failed",
                    message: e.to_string(),
                    details: Some(json!({ "table": "notifications" })),
                })?;
            }
        }
        (new_count, projected)
    } else {
        let stored: Option<String> = tx
            .query_row(
                "SELECT renewal_date FROM enrollments WHERE id = ?",
                [enrollment_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db)?
            .flatten();
        (enrollment.classes_remaining, stored)
    };

    Ok(json!({
        "attendance": {
            "id": attendance_id,
            "enrollmentId": enrollment_id,
            "studentId": enrollment.student_id,
            "classId": enrollment.class_id,
            "date": date_str,
            "status": new_status.as_str(),
            "updated": old_status.is_some(),
        },
        "enrollment": {
            "classesRemaining": classes_remaining,
            "renewalDate": renewal_date,
        },
    }))
}

fn handle_attendance_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match require_role(state, req, &[Role::Teacher, Role::Admin]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status_raw = match required_str(req, "status") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(status) = AttendanceStatus::parse(&status_raw) else {
        return err(
            &req.id,
            "bad_params",
            "status must be one of PRESENT, ABSENT_EXCUSED, ABSENT_UNEXCUSED, HOLIDAY",
            None,
        );
    };
    let notes = req
        .params
        .get("notes")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let result = match apply_mark(
        &tx,
        state.mailer.as_ref(),
        &actor,
        &enrollment_id,
        date,
        status,
        notes,
    ) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return e.response(&req.id);
        }
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, result)
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match require_role(state, req, &[Role::Admin, Role::Teacher, Role::Parent]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut clauses: Vec<&str> = Vec::new();
    let mut params: Vec<Value> = Vec::new();
    if let Some(class_id) = req.params.get("classId").and_then(|v| v.as_str()) {
        clauses.push("a.class_id = ?");
        params.push(class_id.to_string().into());
    }
    if let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_str()) {
        clauses.push("a.student_id = ?");
        params.push(student_id.to_string().into());
    }
    if let Some(date) = req.params.get("date").and_then(|v| v.as_str()) {
        clauses.push("a.date = ?");
        params.push(date.to_string().into());
    }
    if actor.role == Role::Parent {
        clauses.push("s.parent_id = ?");
        params.push(actor.user_id.clone().into());
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT a.id, a.enrollment_id, a.class_id, a.student_id, a.date, a.status, a.notes,
                s.name, c.name
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         JOIN classes c ON c.id = a.class_id
         {}
         ORDER BY a.date DESC",
        where_sql
    );

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(params), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "enrollmentId": r.get::<_, String>(1)?,
                "classId": r.get::<_, String>(2)?,
                "studentId": r.get::<_, String>(3)?,
                "date": r.get::<_, String>(4)?,
                "status": r.get::<_, String>(5)?,
                "notes": r.get::<_, Option<String>>(6)?,
                "studentName": r.get::<_, String>(7)?,
                "className": r.get::<_, String>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(attendance) => ok(&req.id, json!({ "attendance": attendance })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(handle_attendance_mark(state, req)),
        "attendance.list" => Some(handle_attendance_list(state, req)),
        _ => None,
    }
}

use chrono::{Datelike, Duration, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, parse_days_of_week, require_role, required_date, required_i64, required_str,
};
use crate::ipc::types::{AppState, Request, Role};
use crate::notify;

/// Parents of the class's active enrollments, one entry per enrollment.
fn enrolled_parent_ids(conn: &Connection, class_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT s.parent_id
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.class_id = ? AND e.is_active = 1",
    )?;
    stmt.query_map([class_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect())
}

/// Next `count` calendar dates on which the class meets, walking forward one
/// day at a time from `start` over its ISO weekday pattern.
fn class_dates(start: NaiveDate, days_of_week: &[u32], count: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(count);
    let mut current = start;
    while dates.len() < count {
        if days_of_week.contains(&current.weekday().number_from_monday()) {
            dates.push(current);
        }
        current += Duration::days(1);
    }
    dates
}

fn handle_homework_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Teacher]) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let description = match required_str(req, "description") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let due_date = match required_date(req, "dueDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let class_name: Option<String> = match conn
        .query_row("SELECT name FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(class_name) = class_name else {
        return err(&req.id, "not_found", "class not found", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let assignment_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO homework_assignments(id, class_id, title, description, due_date, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &assignment_id,
            &class_id,
            &title,
            &description,
            due_date.format("%Y-%m-%d").to_string(),
            notify::now_rfc3339(),
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "homework_assignments" })),
        );
    }

    let parent_ids = match enrolled_parent_ids(&tx, &class_id) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };
    let message = format!("New homework assigned in {}: {}", class_name, title);
    for parent_id in &parent_ids {
        if let Err(e) = notify::create_notification(
            &tx,
            parent_id,
            notify::NotificationKind::NewHomework,
            "New Homework Assignment",
            &message,
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "notifications" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "assignmentId": assignment_id,
            "classId": class_id,
            "className": class_name,
            "title": title,
            "dueDate": due_date.format("%Y-%m-%d").to_string(),
            "notified": parent_ids.len(),
        }),
    )
}

fn handle_homework_bulk_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Teacher, Role::Admin]) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let unit_name = match required_str(req, "unitName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let description = match required_str(req, "description") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let number_of_classes = match required_i64(req, "numberOfClasses") {
        Ok(v) if (1..=20).contains(&v) => v as usize,
        Ok(_) => {
            return err(
                &req.id,
                "bad_params",
                "numberOfClasses must be between 1 and 20",
                None,
            )
        }
        Err(resp) => return resp,
    };
    let start_date = match required_date(req, "startDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let class_row: Option<(String, Option<String>)> = match conn
        .query_row(
            "SELECT name, days_of_week FROM classes WHERE id = ?",
            [&class_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((class_name, days_raw)) = class_row else {
        return err(&req.id, "not_found", "class not found", None);
    };
    let mut days_of_week = parse_days_of_week(days_raw.as_deref());
    if days_of_week.is_empty() {
        // Classes without an explicit pattern default to Mon/Wed/Fri.
        days_of_week = vec![1, 3, 5];
    }

    let dates = class_dates(start_date, &days_of_week, number_of_classes);

    let parent_ids = match enrolled_parent_ids(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let mut assignments = Vec::with_capacity(dates.len());
    for (i, class_date) in dates.iter().enumerate() {
        // Due the day before the class meets.
        let due_date = *class_date - Duration::days(1);
        let title = format!("{} - Lesson {}", unit_name, i + 1);
        let body = format!(
            "{}\n\n(Part {} of {})",
            description,
            i + 1,
            number_of_classes
        );

        let assignment_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO homework_assignments(id, class_id, title, description, due_date, created_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &assignment_id,
                &class_id,
                &title,
                &body,
                due_date.format("%Y-%m-%d").to_string(),
                notify::now_rfc3339(),
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "homework_assignments" })),
            );
        }

        let message = format!(
            "{} assigned for {}. Due: {}",
            title,
            class_name,
            due_date.format("%Y-%m-%d")
        );
        for parent_id in &parent_ids {
            if let Err(e) = notify::create_notification(
                &tx,
                parent_id,
                notify::NotificationKind::NewHomework,
                "New Homework Assignment",
                &message,
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "notifications" })),
                );
            }
        }

        assignments.push(json!({
            "assignmentId": assignment_id,
            "title": title,
            "dueDate": due_date.format("%Y-%m-%d").to_string(),
        }));
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "count": assignments.len(),
            "assignments": assignments,
        }),
    )
}

fn submissions_json(
    conn: &Connection,
    assignment_id: &str,
    parent_filter: Option<&str>,
) -> rusqlite::Result<Vec<serde_json::Value>> {
    let sql = match parent_filter {
        Some(_) => {
            "SELECT hs.id, hs.student_id, s.name, hs.file_url, hs.file_name, hs.file_size,
                    hs.notes, hs.submitted_at
             FROM homework_submissions hs
             JOIN students s ON s.id = hs.student_id
             WHERE hs.assignment_id = ? AND s.parent_id = ?
             ORDER BY hs.submitted_at DESC"
        }
        None => {
            "SELECT hs.id, hs.student_id, s.name, hs.file_url, hs.file_name, hs.file_size,
                    hs.notes, hs.submitted_at
             FROM homework_submissions hs
             JOIN students s ON s.id = hs.student_id
             WHERE hs.assignment_id = ?
             ORDER BY hs.submitted_at DESC"
        }
    };
    let mut stmt = conn.prepare(sql)?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "studentId": r.get::<_, String>(1)?,
            "studentName": r.get::<_, String>(2)?,
            "fileUrl": r.get::<_, String>(3)?,
            "fileName": r.get::<_, String>(4)?,
            "fileSize": r.get::<_, i64>(5)?,
            "notes": r.get::<_, Option<String>>(6)?,
            "submittedAt": r.get::<_, String>(7)?,
        }))
    };
    match parent_filter {
        Some(parent_id) => stmt
            .query_map((assignment_id, parent_id), map_row)
            .and_then(|it| it.collect()),
        None => stmt
            .query_map([assignment_id], map_row)
            .and_then(|it| it.collect()),
    }
}

fn handle_homework_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match require_role(state, req, &[Role::Teacher, Role::Parent]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    // Parents: homework for enrolled classes, soonest due first, with their
    // own children's submissions. Teachers: everything, latest due first.
    let (sql, param): (&str, Option<&str>) = if actor.role == Role::Parent {
        (
            "SELECT h.id, h.class_id, c.name, h.title, h.description, h.due_date
             FROM homework_assignments h
             JOIN classes c ON c.id = h.class_id
             WHERE h.class_id IN (
               SELECT e.class_id FROM enrollments e
               JOIN students s ON s.id = e.student_id
               WHERE s.parent_id = ? AND e.is_active = 1
             )
             ORDER BY h.due_date ASC",
            Some(actor.user_id.as_str()),
        )
    } else {
        (
            "SELECT h.id, h.class_id, c.name, h.title, h.description, h.due_date
             FROM homework_assignments h
             JOIN classes c ON c.id = h.class_id
             ORDER BY h.due_date DESC",
            None,
        )
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    type HwRow = (String, String, String, String, String, String);
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<HwRow> {
        Ok((
            r.get(0)?,
            r.get(1)?,
            r.get(2)?,
            r.get(3)?,
            r.get(4)?,
            r.get(5)?,
        ))
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

    let parent_filter = (actor.role == Role::Parent).then_some(actor.user_id.as_str());
    let mut homework = Vec::with_capacity(base.len());
    for (id, class_id, class_name, title, description, due_date) in base {
        let submissions = match submissions_json(conn, &id, parent_filter) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        homework.push(json!({
            "id": id,
            "classId": class_id,
            "className": class_name,
            "title": title,
            "description": description,
            "dueDate": due_date,
            "submissions": submissions,
        }));
    }

    ok(&req.id, json!({ "homework": homework }))
}

fn handle_homework_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Admin, Role::Teacher, Role::Parent]) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let row: Option<(String, String, String, String, String)> = match conn
        .query_row(
            "SELECT h.class_id, c.name, h.title, h.description, h.due_date
             FROM homework_assignments h
             JOIN classes c ON c.id = h.class_id
             WHERE h.id = ?",
            [&assignment_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                ))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((class_id, class_name, title, description, due_date)) = row else {
        return err(&req.id, "not_found", "homework not found", None);
    };

    let submissions = match submissions_json(conn, &assignment_id, None) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "id": assignment_id,
            "classId": class_id,
            "className": class_name,
            "title": title,
            "description": description,
            "dueDate": due_date,
            "submissions": submissions,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "homework.create" => Some(handle_homework_create(state, req)),
        "homework.bulkCreate" => Some(handle_homework_bulk_create(state, req)),
        "homework.list" => Some(handle_homework_list(state, req)),
        "homework.get" => Some(handle_homework_get(state, req)),
        _ => None,
    }
}

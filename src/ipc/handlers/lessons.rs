use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, opt_str, require_role, required_date, required_str};
use crate::ipc::types::{AppState, Request, Role};
use crate::notify;

fn parse_topics(req: &Request) -> Result<String, serde_json::Value> {
    let Some(raw) = req.params.get("topics") else {
        return Ok("[]".to_string());
    };
    let Some(arr) = raw.as_array() else {
        return Err(err(
            &req.id,
            "bad_params",
            "topics must be an array of strings",
            None,
        ));
    };
    let mut topics = Vec::with_capacity(arr.len());
    for v in arr {
        match v.as_str() {
            Some(s) if !s.trim().is_empty() => topics.push(s.trim().to_string()),
            _ => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "topics must be an array of strings",
                    None,
                ))
            }
        }
    }
    Ok(serde_json::to_string(&topics).unwrap_or_else(|_| "[]".to_string()))
}

fn handle_lessons_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let unit = match required_str(req, "unit") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let topics = match parse_topics(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let notes = opt_str(&req.params, "notes");

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

    let lesson_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO lessons(id, class_id, date, unit, topics, notes, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &lesson_id,
            &class_id,
            date.format("%Y-%m-%d").to_string(),
            &unit,
            &topics,
            &notes,
            notify::now_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "lessons" })),
        );
    }

    ok(
        &req.id,
        json!({
            "lessonId": lesson_id,
            "classId": class_id,
            "className": class_name,
            "unit": unit,
        }),
    )
}

fn handle_lessons_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match require_role(state, req, &[Role::Teacher, Role::Parent]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    // Parents see lessons for classes their children are actively enrolled
    // in; teachers see everything.
    let (sql, param): (&str, Option<&str>) = if actor.role == Role::Parent {
        (
            "SELECT l.id, l.class_id, c.name, l.date, l.unit, l.topics, l.notes
             FROM lessons l
             JOIN classes c ON c.id = l.class_id
             WHERE l.class_id IN (
               SELECT e.class_id FROM enrollments e
               JOIN students s ON s.id = e.student_id
               WHERE s.parent_id = ? AND e.is_active = 1
             )
             ORDER BY l.date DESC",
            Some(actor.user_id.as_str()),
        )
    } else {
        (
            "SELECT l.id, l.class_id, c.name, l.date, l.unit, l.topics, l.notes
             FROM lessons l
             JOIN classes c ON c.id = l.class_id
             ORDER BY l.date DESC",
            None,
        )
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        let topics_raw: String = r.get(5)?;
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "classId": r.get::<_, String>(1)?,
            "className": r.get::<_, String>(2)?,
            "date": r.get::<_, String>(3)?,
            "unit": r.get::<_, String>(4)?,
            "topics": serde_json::from_str::<serde_json::Value>(&topics_raw)
                .unwrap_or_else(|_| json!([])),
            "notes": r.get::<_, Option<String>>(6)?,
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
        Ok(lessons) => ok(&req.id, json!({ "lessons": lessons })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lessons.create" => Some(handle_lessons_create(state, req)),
        "lessons.list" => Some(handle_lessons_list(state, req)),
        _ => None,
    }
}

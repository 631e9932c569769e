use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, opt_str, require_role, required_str};
use crate::ipc::types::{AppState, Request, Role};
use crate::notify;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Admin, Role::Teacher, Role::Parent]) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    // Correlated subqueries for counts, so joined rows are not double-counted.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.description,
           c.schedule,
           c.days_of_week,
           c.start_time,
           (SELECT COUNT(*) FROM enrollments e WHERE e.class_id = c.id AND e.is_active = 1) AS enrollment_count,
           (SELECT COUNT(*) FROM lessons l WHERE l.class_id = c.id) AS lesson_count,
           (SELECT COUNT(*) FROM homework_assignments h WHERE h.class_id = c.id) AS homework_count
         FROM classes c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "description": row.get::<_, Option<String>>(2)?,
                "schedule": row.get::<_, Option<String>>(3)?,
                "daysOfWeek": row.get::<_, Option<String>>(4)?
                    .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok()),
                "startTime": row.get::<_, Option<String>>(5)?,
                "enrollmentCount": row.get::<_, i64>(6)?,
                "lessonCount": row.get::<_, i64>(7)?,
                "homeworkCount": row.get::<_, i64>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Admin]) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let description = opt_str(&req.params, "description");
    let schedule = opt_str(&req.params, "schedule");
    let start_time = opt_str(&req.params, "startTime");
    let days_of_week = match parse_days_param(&req.id, req.params.get("daysOfWeek")) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, description, schedule, days_of_week, start_time, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &class_id,
            &name,
            &description,
            &schedule,
            &days_of_week,
            &start_time,
            notify::now_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

fn parse_days_param(
    req_id: &str,
    raw: Option<&serde_json::Value>,
) -> Result<Option<String>, serde_json::Value> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let Some(arr) = raw.as_array() else {
        return Err(err(
            req_id,
            "bad_params",
            "daysOfWeek must be an array of 1-7",
            None,
        ));
    };
    let mut days = Vec::with_capacity(arr.len());
    for v in arr {
        match v.as_u64() {
            Some(d) if (1..=7).contains(&d) => days.push(d),
            _ => {
                return Err(err(
                    req_id,
                    "bad_params",
                    "daysOfWeek must be an array of 1-7",
                    None,
                ))
            }
        }
    }
    Ok(Some(serde_json::to_string(&days).unwrap_or_default()))
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Admin]) {
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

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(name) = patch.get("name").and_then(|v| v.as_str()) {
        let name = name.trim();
        if name.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        sets.push("name = ?".to_string());
        values.push(name.to_string().into());
    }
    for (key, column) in [
        ("description", "description"),
        ("schedule", "schedule"),
        ("startTime", "start_time"),
    ] {
        if let Some(v) = patch.get(key) {
            sets.push(format!("{column} = ?"));
            match v.as_str() {
                Some(s) => values.push(s.trim().to_string().into()),
                None => values.push(rusqlite::types::Value::Null),
            }
        }
    }
    if patch.contains_key("daysOfWeek") {
        let encoded = match parse_days_param(&req.id, patch.get("daysOfWeek")) {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        sets.push("days_of_week = ?".to_string());
        match encoded {
            Some(s) => values.push(s.into()),
            None => values.push(rusqlite::types::Value::Null),
        }
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "patch has no recognized fields", None);
    }

    let sql = format!("UPDATE classes SET {} WHERE id = ?", sets.join(", "));
    values.push(class_id.clone().into());
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(values)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Admin]) {
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

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicit deletes in dependency order (no ON DELETE CASCADE).
    let steps: &[(&str, &str)] = &[
        (
            "DELETE FROM homework_submissions
             WHERE assignment_id IN (SELECT id FROM homework_assignments WHERE class_id = ?)",
            "homework_submissions",
        ),
        (
            "DELETE FROM homework_assignments WHERE class_id = ?",
            "homework_assignments",
        ),
        ("DELETE FROM attendance WHERE class_id = ?", "attendance"),
        ("DELETE FROM lessons WHERE class_id = ?", "lessons"),
        ("DELETE FROM enrollments WHERE class_id = ?", "enrollments"),
        ("DELETE FROM classes WHERE id = ?", "classes"),
    ];
    for (sql, table) in steps {
        if let Err(e) = tx.execute(sql, [&class_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}

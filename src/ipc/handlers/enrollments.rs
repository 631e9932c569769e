use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, opt_i64, require_role, required_i64, required_str};
use crate::ipc::types::{AppState, Request, Role};
use crate::notify;
use crate::renewal;

fn handle_enrollments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Admin]) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let total_classes = match required_i64(req, "totalClasses") {
        Ok(v) if v > 0 => v,
        Ok(_) => return err(&req.id, "bad_params", "totalClasses must be positive", None),
        Err(resp) => return resp,
    };
    let classes_per_week = match opt_i64(&req.params, "classesPerWeek") {
        Some(v) if v > 0 => v,
        Some(_) => {
            return err(
                &req.id,
                "bad_params",
                "classesPerWeek must be positive",
                None,
            )
        }
        None => 1,
    };
    let classes_remaining = match opt_i64(&req.params, "classesRemaining") {
        Some(v) if (0..=total_classes).contains(&v) => v,
        Some(_) => {
            return err(
                &req.id,
                "bad_params",
                "classesRemaining must be between 0 and totalClasses",
                None,
            )
        }
        None => total_classes,
    };

    let student_ok: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_ok.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }
    let class_ok: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_ok.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }
    let already: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE student_id = ? AND class_id = ?",
            (&student_id, &class_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if already.is_some() {
        return err(
            &req.id,
            "bad_params",
            "student is already enrolled in this class",
            None,
        );
    }

    let renewal_date = renewal::renewal_date(classes_remaining, classes_per_week, notify::today_utc())
        .map(|d| d.format("%Y-%m-%d").to_string());

    let enrollment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO enrollments(id, student_id, class_id, classes_remaining, total_classes,
                                 classes_per_week, renewal_date, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &enrollment_id,
            &student_id,
            &class_id,
            classes_remaining,
            total_classes,
            classes_per_week,
            &renewal_date,
            notify::now_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }

    ok(
        &req.id,
        json!({
            "enrollmentId": enrollment_id,
            "classesRemaining": classes_remaining,
            "totalClasses": total_classes,
            "classesPerWeek": classes_per_week,
            "renewalDate": renewal_date,
        }),
    )
}

fn handle_enrollments_renew(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Admin]) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let add_classes = match required_i64(req, "addClasses") {
        Ok(v) if v > 0 => v,
        Ok(_) => return err(&req.id, "bad_params", "addClasses must be positive", None),
        Err(resp) => return resp,
    };

    let row: Option<(i64, i64, i64)> = match conn
        .query_row(
            "SELECT classes_remaining, total_classes, classes_per_week
             FROM enrollments WHERE id = ?",
            [&enrollment_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((remaining, total, per_week)) = row else {
        return err(&req.id, "not_found", "enrollment not found", None);
    };

    // Package top-up is the only count mutation outside attendance marking.
    let new_remaining = remaining + add_classes;
    let new_total = total + add_classes;
    let renewal_date = renewal::renewal_date(new_remaining, per_week, notify::today_utc())
        .map(|d| d.format("%Y-%m-%d").to_string());

    if let Err(e) = conn.execute(
        "UPDATE enrollments
         SET classes_remaining = ?, total_classes = ?, renewal_date = ?, is_active = 1
         WHERE id = ?",
        (new_remaining, new_total, &renewal_date, &enrollment_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }

    ok(
        &req.id,
        json!({
            "enrollmentId": enrollment_id,
            "classesRemaining": new_remaining,
            "totalClasses": new_total,
            "renewalDate": renewal_date,
        }),
    )
}

fn handle_enrollments_deactivate(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Admin]) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let changed = match conn.execute(
        "UPDATE enrollments SET is_active = 0 WHERE id = ?",
        [&enrollment_id],
    ) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "enrollments" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "enrollment not found", None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.create" => Some(handle_enrollments_create(state, req)),
        "enrollments.renew" => Some(handle_enrollments_renew(state, req)),
        "enrollments.deactivate" => Some(handle_enrollments_deactivate(state, req)),
        _ => None,
    }
}

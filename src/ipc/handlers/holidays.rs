use serde_json::json;
use uuid::Uuid;

use super::announcements::all_parent_ids;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, opt_str, require_role, required_date, required_str};
use crate::ipc::types::{AppState, Request, Role};
use crate::notify;

fn handle_holidays_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Teacher]) {
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
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let description = opt_str(&req.params, "description");

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let holiday_id = Uuid::new_v4().to_string();
    let date_str = date.format("%Y-%m-%d").to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO holidays(id, name, date, description, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&holiday_id, &name, &date_str, &description, notify::now_rfc3339()),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "holidays" })),
        );
    }

    let message = match &description {
        Some(d) => format!("{} on {}: {}", name, date_str, d),
        None => format!("{} on {}", name, date_str),
    };
    let parents = match all_parent_ids(&tx) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };
    for parent_id in &parents {
        if let Err(e) = notify::create_notification(
            &tx,
            parent_id,
            notify::NotificationKind::HolidayReminder,
            "Holiday Announcement",
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
        json!({ "holidayId": holiday_id, "name": name, "date": date_str, "notified": parents.len() }),
    )
}

fn handle_holidays_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Admin, Role::Teacher, Role::Parent]) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let today = notify::today_utc().format("%Y-%m-%d").to_string();
    let mut stmt = match conn.prepare(
        "SELECT id, name, date, description FROM holidays WHERE date >= ? ORDER BY date ASC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&today], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "date": r.get::<_, String>(2)?,
                "description": r.get::<_, Option<String>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(holidays) => ok(&req.id, json!({ "holidays": holidays })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "holidays.create" => Some(handle_holidays_create(state, req)),
        "holidays.list" => Some(handle_holidays_list(state, req)),
        _ => None,
    }
}

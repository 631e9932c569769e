use rusqlite::OptionalExtension;
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, opt_bool, require_role, required_str};
use crate::ipc::types::{AppState, Request, Role};

fn handle_notifications_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match require_role(state, req, &[Role::Admin, Role::Teacher, Role::Parent]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let unread_only = opt_bool(&req.params, "unreadOnly", false);

    let sql = if unread_only {
        "SELECT id, type, title, message, read, email_sent, created_at
         FROM notifications WHERE user_id = ? AND read = 0
         ORDER BY created_at DESC"
    } else {
        "SELECT id, type, title, message, read, email_sent, created_at
         FROM notifications WHERE user_id = ?
         ORDER BY created_at DESC"
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&actor.user_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "type": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "message": r.get::<_, String>(3)?,
                "read": r.get::<_, i64>(4)? != 0,
                "emailSent": r.get::<_, i64>(5)? != 0,
                "createdAt": r.get::<_, String>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(notifications) => ok(&req.id, json!({ "notifications": notifications })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_notifications_mark_read(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match require_role(state, req, &[Role::Admin, Role::Teacher, Role::Parent]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let notification_id = match required_str(req, "notificationId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let owner: Option<String> = match conn
        .query_row(
            "SELECT user_id FROM notifications WHERE id = ?",
            [&notification_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match owner {
        None => return err(&req.id, "not_found", "notification not found", None),
        Some(uid) if uid != actor.user_id => {
            return err(&req.id, "forbidden", "not your notification", None)
        }
        Some(_) => {}
    }

    if let Err(e) = conn.execute(
        "UPDATE notifications SET read = 1 WHERE id = ?",
        [&notification_id],
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "notifications" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_notifications_mark_all_read(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match require_role(state, req, &[Role::Admin, Role::Teacher, Role::Parent]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let changed = match conn.execute(
        "UPDATE notifications SET read = 1 WHERE user_id = ? AND read = 0",
        [&actor.user_id],
    ) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "notifications" })),
            )
        }
    };
    ok(&req.id, json!({ "marked": changed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.list" => Some(handle_notifications_list(state, req)),
        "notifications.markRead" => Some(handle_notifications_mark_read(state, req)),
        "notifications.markAllRead" => Some(handle_notifications_mark_all_read(state, req)),
        _ => None,
    }
}

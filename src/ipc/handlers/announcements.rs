use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, opt_str, require_role, required_str};
use crate::ipc::types::{AppState, Request, Role};
use crate::notify;

pub(super) fn all_parent_ids(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM users WHERE role = 'PARENT'")?;
    stmt.query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect())
}

fn handle_announcements_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Teacher]) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let content = match required_str(req, "content") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let category = opt_str(&req.params, "category").unwrap_or_else(|| "general".to_string());
    let priority = opt_str(&req.params, "priority").unwrap_or_else(|| "normal".to_string());

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let announcement_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO announcements(id, title, content, category, priority, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &announcement_id,
            &title,
            &content,
            &category,
            &priority,
            notify::now_rfc3339(),
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "announcements" })),
        );
    }

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
            notify::NotificationKind::NewAnnouncement,
            "New Announcement",
            &title,
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
            "announcementId": announcement_id,
            "title": title,
            "notified": parents.len(),
        }),
    )
}

fn handle_announcements_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Admin, Role::Teacher, Role::Parent]) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, title, content, category, priority, created_at
         FROM announcements ORDER BY created_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "content": r.get::<_, String>(2)?,
                "category": r.get::<_, String>(3)?,
                "priority": r.get::<_, String>(4)?,
                "createdAt": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(announcements) => ok(&req.id, json!({ "announcements": announcements })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "announcements.create" => Some(handle_announcements_create(state, req)),
        "announcements.list" => Some(handle_announcements_list(state, req)),
        _ => None,
    }
}

use chrono::{Duration, NaiveDate};
use log::{info, warn};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::notify::{self, NotificationKind};
use crate::renewal;

/// Sweeps carry a bearer secret instead of a session; the scheduler is not a
/// portal user.
fn check_cron_secret(conn: &Connection, req: &Request) -> Result<(), serde_json::Value> {
    let expected = db::settings_get_json(conn, "cron.secret")
        .ok()
        .flatten()
        .and_then(|v| v.as_str().map(str::to_string));
    let Some(expected) = expected.filter(|s| !s.is_empty()) else {
        return Err(err(&req.id, "unauthorized", "cron secret not configured", None));
    };
    let provided = req.params.get("secret").and_then(|v| v.as_str());
    if provided != Some(expected.as_str()) {
        return Err(err(&req.id, "unauthorized", "invalid cron secret", None));
    }
    Ok(())
}

struct SweepRow {
    classes_remaining: i64,
    renewal_date: Option<String>,
    parent_id: String,
    student_name: String,
    class_name: String,
}

fn sweep_rows(conn: &Connection, where_sql: &str) -> rusqlite::Result<Vec<SweepRow>> {
    let sql = format!(
        "SELECT e.classes_remaining, e.renewal_date, s.parent_id, s.name, c.name
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         JOIN classes c ON c.id = e.class_id
         WHERE e.is_active = 1 AND {}",
        where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_map([], |r| {
        Ok(SweepRow {
            classes_remaining: r.get(0)?,
            renewal_date: r.get(1)?,
            parent_id: r.get(2)?,
            student_name: r.get(3)?,
            class_name: r.get(4)?,
        })
    })
    .and_then(|it| it.collect())
}

fn handle_check_memberships(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = check_cron_secret(conn, req) {
        return resp;
    }

    let low_balance = match sweep_rows(conn, "e.classes_remaining > 0 AND e.classes_remaining <= 2")
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut notifications_sent: i64 = 0;
    let window = notify::since_days_ago(7);

    for row in &low_balance {
        // Check-and-create under one transaction so overlapping sweeps cannot
        // both pass the existence probe.
        let tx = match conn.unchecked_transaction() {
            Ok(t) => t,
            Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
        };
        let already = match notify::has_recent_notification(
            &tx,
            &row.parent_id,
            NotificationKind::MembershipRenewal,
            &row.class_name,
            &window,
        ) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if !already {
            if let Err(e) = notify::membership_renewal(
                &tx,
                state.mailer.as_ref(),
                &row.parent_id,
                &row.student_name,
                &row.class_name,
                row.classes_remaining,
            ) {
                return err(&req.id, "db_insert_failed", e.to_string(), None);
            }
            notifications_sent += 1;
        }
        if let Err(e) = tx.commit() {
            return err(&req.id, "db_commit_failed", e.to_string(), None);
        }
    }

    // Second scan: projections landing inside the next week.
    let today = notify::today_utc();
    let horizon = today + Duration::days(7);
    let expiring_where = format!(
        "e.renewal_date IS NOT NULL AND e.renewal_date >= '{}' AND e.renewal_date <= '{}'",
        today.format("%Y-%m-%d"),
        horizon.format("%Y-%m-%d")
    );
    let expiring = match sweep_rows(conn, &expiring_where) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    for row in &expiring {
        let tx = match conn.unchecked_transaction() {
            Ok(t) => t,
            Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
        };
        let already = match notify::has_recent_notification(
            &tx,
            &row.parent_id,
            NotificationKind::MembershipRenewal,
            &row.class_name,
            &window,
        ) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if !already {
            let date = row.renewal_date.as_deref().unwrap_or("soon");
            let message = format!(
                "{}'s membership for {} expires on {}. Please renew soon.",
                row.student_name, row.class_name, date
            );
            if let Err(e) = notify::create_notification(
                &tx,
                &row.parent_id,
                NotificationKind::MembershipRenewal,
                "Class Membership Expiring Soon",
                &message,
            ) {
                return err(&req.id, "db_insert_failed", e.to_string(), None);
            }
            notifications_sent += 1;
        }
        if let Err(e) = tx.commit() {
            return err(&req.id, "db_commit_failed", e.to_string(), None);
        }
    }

    info!(
        "event=sweep_memberships low_balance={} expiring={} sent={}",
        low_balance.len(),
        expiring.len(),
        notifications_sent
    );
    ok(
        &req.id,
        json!({
            "success": true,
            "notificationsSent": notifications_sent,
            "lowBalanceCount": low_balance.len(),
            "expiringCount": expiring.len(),
        }),
    )
}

fn handle_daily_countdown(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = check_cron_secret(conn, req) {
        return resp;
    }

    let enrollments = match sweep_rows(conn, "e.classes_remaining > 0") {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let today = notify::today_utc();
    let midnight = notify::since_start_of_today();
    let mut notifications_sent: i64 = 0;

    for row in &enrollments {
        let tx = match conn.unchecked_transaction() {
            Ok(t) => t,
            Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
        };
        // At most one countdown per student per calendar day.
        let already = match notify::has_recent_notification(
            &tx,
            &row.parent_id,
            NotificationKind::MembershipRenewal,
            &row.student_name,
            &midnight,
        ) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if already {
            if let Err(e) = tx.commit() {
                return err(&req.id, "db_commit_failed", e.to_string(), None);
            }
            continue;
        }

        let projected = row
            .renewal_date
            .as_deref()
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
        let countdown = renewal::renewal_message(row.classes_remaining, projected, today);
        let title = format!("📚 Class Update for {}", row.student_name);
        let message = format!("{}: {}", row.class_name, countdown);
        let notification_id = match notify::create_notification(
            &tx,
            &row.parent_id,
            NotificationKind::MembershipRenewal,
            &title,
            &message,
        ) {
            Ok(id) => id,
            Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
        };
        notifications_sent += 1;

        // Urgent countdowns also go out by email when the parent opted in.
        if row.classes_remaining <= 2 {
            let contact: Option<(String, bool)> = match tx
                .query_row(
                    "SELECT email, email_preferences FROM users WHERE id = ?",
                    [&row.parent_id],
                    |r| Ok((r.get(0)?, r.get::<_, i64>(1)? != 0)),
                )
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            if let Some((email, true)) = contact {
                let subject = format!("Class Membership Renewal Reminder - {}", row.class_name);
                let html = format!(
                    "<html><body><p>{}</p></body></html>",
                    message.replace('<', "&lt;")
                );
                match state.mailer.send(&email, &subject, &html) {
                    Ok(()) => {
                        if let Err(e) = tx.execute(
                            "UPDATE notifications SET email_sent = 1 WHERE id = ?",
                            [&notification_id],
                        ) {
                            return err(&req.id, "db_update_failed", e.to_string(), None);
                        }
                    }
                    Err(e) => warn!("countdown email to {email} failed: {e}"),
                }
            }
        }

        if let Err(e) = tx.commit() {
            return err(&req.id, "db_commit_failed", e.to_string(), None);
        }
    }

    info!(
        "event=sweep_countdown checked={} sent={}",
        enrollments.len(),
        notifications_sent
    );
    ok(
        &req.id,
        json!({
            "success": true,
            "notificationsSent": notifications_sent,
            "enrollmentsChecked": enrollments.len(),
        }),
    )
}

fn handle_check_homework(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = check_cron_secret(conn, req) {
        return resp;
    }

    let today = notify::today_utc();
    let horizon = today + Duration::days(2);
    let assignments: Vec<(String, String, String, String)> = {
        let mut stmt = match conn.prepare(
            "SELECT h.id, h.title, h.due_date, c.name
             FROM homework_assignments h
             JOIN classes c ON c.id = h.class_id
             WHERE h.due_date >= ? AND h.due_date <= ?",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map(
                (
                    today.format("%Y-%m-%d").to_string(),
                    horizon.format("%Y-%m-%d").to_string(),
                ),
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let day = notify::since_days_ago(1);
    let mut notifications_sent: i64 = 0;

    for (assignment_id, title, due_date, class_name) in &assignments {
        // Parents of active enrollments whose student has not submitted yet.
        let pending: Vec<String> = {
            let mut stmt = match conn.prepare(
                "SELECT DISTINCT s.parent_id
                 FROM enrollments e
                 JOIN students s ON s.id = e.student_id
                 JOIN homework_assignments h ON h.class_id = e.class_id
                 WHERE h.id = ? AND e.is_active = 1
                   AND e.student_id NOT IN (
                     SELECT student_id FROM homework_submissions WHERE assignment_id = ?
                   )",
            ) {
                Ok(s) => s,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            let rows = stmt
                .query_map((assignment_id, assignment_id), |r| r.get::<_, String>(0))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>());
            match rows {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
        };

        for parent_id in &pending {
            let tx = match conn.unchecked_transaction() {
                Ok(t) => t,
                Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
            };
            let already = match notify::has_recent_notification(
                &tx,
                parent_id,
                NotificationKind::NewHomework,
                title,
                &day,
            ) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            if !already {
                let message = format!(
                    "Reminder: {} for {} is due on {}.",
                    title, class_name, due_date
                );
                if let Err(e) = notify::create_notification(
                    &tx,
                    parent_id,
                    NotificationKind::NewHomework,
                    "Homework Due Soon",
                    &message,
                ) {
                    return err(&req.id, "db_insert_failed", e.to_string(), None);
                }
                notifications_sent += 1;
            }
            if let Err(e) = tx.commit() {
                return err(&req.id, "db_commit_failed", e.to_string(), None);
            }
        }
    }

    info!(
        "event=sweep_homework checked={} sent={}",
        assignments.len(),
        notifications_sent
    );
    ok(
        &req.id,
        json!({
            "success": true,
            "notificationsSent": notifications_sent,
            "homeworkChecked": assignments.len(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cron.checkMemberships" => Some(handle_check_memberships(state, req)),
        "cron.dailyCountdown" => Some(handle_daily_countdown(state, req)),
        "cron.checkHomework" => Some(handle_check_homework(state, req)),
        _ => None,
    }
}

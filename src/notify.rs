use chrono::{NaiveDate, Utc};
use log::warn;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::mailer::Mailer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    MembershipRenewal,
    NewHomework,
    NewAnnouncement,
    HolidayReminder,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MembershipRenewal => "MEMBERSHIP_RENEWAL",
            Self::NewHomework => "NEW_HOMEWORK",
            Self::NewAnnouncement => "NEW_ANNOUNCEMENT",
            Self::HolidayReminder => "HOLIDAY_REMINDER",
        }
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// Inserts a notification row for `user_id`. Returns the new row id.
pub fn create_notification(
    conn: &Connection,
    user_id: &str,
    kind: NotificationKind,
    title: &str,
    message: &str,
) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO notifications(id, user_id, type, title, message, read, email_sent, created_at)
         VALUES(?, ?, ?, ?, ?, 0, 0, ?)",
        (&id, user_id, kind.as_str(), title, message, now_rfc3339()),
    )?;
    Ok(id)
}

/// Dedup probe: does `user_id` already have a notification of `kind` that
/// mentions `needle` (in the message or the title), created at or after
/// `since` (RFC 3339)? Callers run this and the subsequent insert inside one
/// transaction so the check-and-create pair is atomic.
pub fn has_recent_notification(
    conn: &Connection,
    user_id: &str,
    kind: NotificationKind,
    needle: &str,
    since: &str,
) -> anyhow::Result<bool> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM notifications
             WHERE user_id = ?1 AND type = ?2 AND created_at >= ?3
               AND (message LIKE '%' || ?4 || '%' OR title LIKE '%' || ?4 || '%')
             LIMIT 1",
            (user_id, kind.as_str(), since, needle),
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

/// RFC 3339 timestamp `days` ago, for dedup-window comparisons.
pub fn since_days_ago(days: i64) -> String {
    (Utc::now() - chrono::Duration::days(days)).to_rfc3339()
}

/// RFC 3339 timestamp for UTC midnight today (the "already sent today" probe).
pub fn since_start_of_today() -> String {
    let midnight = today_utc().and_hms_opt(0, 0, 0).expect("midnight exists");
    midnight.and_utc().to_rfc3339()
}

struct ParentContact {
    email: String,
    name: String,
    email_preferences: bool,
}

fn parent_contact(conn: &Connection, user_id: &str) -> anyhow::Result<Option<ParentContact>> {
    Ok(conn
        .query_row(
            "SELECT email, name, email_preferences FROM users WHERE id = ?",
            [user_id],
            |r| {
                Ok(ParentContact {
                    email: r.get(0)?,
                    name: r.get(1)?,
                    email_preferences: r.get::<_, i64>(2)? != 0,
                })
            },
        )
        .optional()?)
}

/// Creates the MEMBERSHIP_RENEWAL notification for a parent and, when they
/// opted in, fires the renewal email. Mail failures are logged and swallowed.
pub fn membership_renewal(
    conn: &Connection,
    mailer: &dyn Mailer,
    parent_id: &str,
    student_name: &str,
    class_name: &str,
    classes_remaining: i64,
) -> anyhow::Result<()> {
    let title = "Class Membership Renewal Required";
    let message = format!(
        "{}'s membership for {} has {} class{} remaining. Please renew soon.",
        student_name,
        class_name,
        classes_remaining,
        if classes_remaining == 1 { "" } else { "es" }
    );
    let notification_id = create_notification(
        conn,
        parent_id,
        NotificationKind::MembershipRenewal,
        title,
        &message,
    )?;

    let Some(contact) = parent_contact(conn, parent_id)? else {
        return Ok(());
    };
    if !contact.email_preferences {
        return Ok(());
    }
    let subject = format!("Class Membership Renewal Reminder - {}", class_name);
    let html = renewal_email_html(&contact.name, student_name, class_name, classes_remaining);
    match mailer.send(&contact.email, &subject, &html) {
        Ok(()) => {
            conn.execute(
                "UPDATE notifications SET email_sent = 1 WHERE id = ?",
                [&notification_id],
            )?;
        }
        Err(e) => warn!("renewal email to {} failed: {e}", contact.email),
    }
    Ok(())
}

fn renewal_email_html(
    parent_name: &str,
    student_name: &str,
    class_name: &str,
    classes_remaining: i64,
) -> String {
    format!(
        "<html><body>\
         <h2>Class Membership Renewal Reminder</h2>\
         <p>Hello {parent_name},</p>\
         <p><strong>Action required:</strong> {student_name}'s membership for \
         <strong>{class_name}</strong> is running low.</p>\
         <p><strong>Classes remaining:</strong> {classes_remaining}</p>\
         <p>To ensure uninterrupted learning, please renew the class membership soon. \
         Contact your teacher to add more classes to the membership.</p>\
         <p style=\"color:#6b7280;font-size:12px\">This is an automated reminder from Classroom Portal.</p>\
         </body></html>"
    )
}

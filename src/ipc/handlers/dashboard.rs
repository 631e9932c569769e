use chrono::{Datelike, Duration, NaiveDate};
use rusqlite::Connection;
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_days_of_week, require_role};
use crate::ipc::types::{AppState, Request, Role};
use crate::notify;

fn count(conn: &Connection, sql: &str) -> rusqlite::Result<i64> {
    conn.query_row(sql, [], |r| r.get(0))
}

fn recent_submissions(conn: &Connection, limit: i64) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT hs.id, s.name, h.title, c.name, hs.submitted_at
         FROM homework_submissions hs
         JOIN students s ON s.id = hs.student_id
         JOIN homework_assignments h ON h.id = hs.assignment_id
         JOIN classes c ON c.id = h.class_id
         ORDER BY hs.submitted_at DESC
         LIMIT ?",
    )?;
    stmt.query_map([limit], |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "studentName": r.get::<_, String>(1)?,
            "assignmentTitle": r.get::<_, String>(2)?,
            "className": r.get::<_, String>(3)?,
            "submittedAt": r.get::<_, String>(4)?,
        }))
    })
    .and_then(|it| it.collect())
}

fn recent_lessons(conn: &Connection, limit: i64) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT l.id, l.unit, c.name, l.date, l.created_at
         FROM lessons l
         JOIN classes c ON c.id = l.class_id
         ORDER BY l.date DESC
         LIMIT ?",
    )?;
    stmt.query_map([limit], |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "unit": r.get::<_, String>(1)?,
            "className": r.get::<_, String>(2)?,
            "date": r.get::<_, String>(3)?,
            "createdAt": r.get::<_, String>(4)?,
        }))
    })
    .and_then(|it| it.collect())
}

fn upcoming_homework(
    conn: &Connection,
    today: &str,
    limit: Option<i64>,
) -> rusqlite::Result<Vec<serde_json::Value>> {
    let base = "SELECT h.id, h.title, h.due_date, c.name,
                (SELECT COUNT(*) FROM homework_submissions hs WHERE hs.assignment_id = h.id)
         FROM homework_assignments h
         JOIN classes c ON c.id = h.class_id
         WHERE h.due_date >= ?
         ORDER BY h.due_date ASC";
    let sql = match limit {
        Some(n) => format!("{} LIMIT {}", base, n),
        None => base.to_string(),
    };
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_map([today], |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "title": r.get::<_, String>(1)?,
            "dueDate": r.get::<_, String>(2)?,
            "className": r.get::<_, String>(3)?,
            "submissionCount": r.get::<_, i64>(4)?,
        }))
    })
    .and_then(|it| it.collect())
}

fn handle_dashboard_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Teacher, Role::Admin]) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let classes: Vec<serde_json::Value> = {
        let mut stmt = match conn.prepare(
            "SELECT c.id, c.name,
                    (SELECT COUNT(*) FROM lessons l WHERE l.class_id = c.id),
                    (SELECT COUNT(*) FROM homework_assignments h WHERE h.class_id = c.id)
             FROM classes c ORDER BY c.name",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let base = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, i64>(3)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        let base = match base {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };

        let mut roster_stmt = match conn.prepare(
            "SELECT e.id, e.student_id, s.name, e.classes_remaining
             FROM enrollments e
             JOIN students s ON s.id = e.student_id
             WHERE e.class_id = ? AND e.is_active = 1
             ORDER BY s.name",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let mut out = Vec::with_capacity(base.len());
        for (id, name, lesson_count, homework_count) in base {
            let roster = roster_stmt
                .query_map([&id], |r| {
                    Ok(json!({
                        "enrollmentId": r.get::<_, String>(0)?,
                        "studentId": r.get::<_, String>(1)?,
                        "studentName": r.get::<_, String>(2)?,
                        "classesRemaining": r.get::<_, i64>(3)?,
                    }))
                })
                .and_then(|it| it.collect::<Result<Vec<_>, _>>());
            let roster = match roster {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            out.push(json!({
                "id": id,
                "name": name,
                "lessonCount": lesson_count,
                "homeworkCount": homework_count,
                "enrollments": roster,
            }));
        }
        out
    };

    let total_students = match count(conn, "SELECT COUNT(*) FROM students") {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let submissions = match recent_submissions(conn, 10) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let today = notify::today_utc().format("%Y-%m-%d").to_string();
    let homework = match upcoming_homework(conn, &today, Some(5)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let lessons = match recent_lessons(conn, 5) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "classes": classes,
            "totalStudents": total_students,
            "recentSubmissions": submissions,
            "upcomingHomework": homework,
            "recentLessons": lessons,
        }),
    )
}

fn handle_dashboard_admin(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Admin]) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let totals = [
        ("totalParents", "SELECT COUNT(*) FROM users WHERE role = 'PARENT'"),
        ("totalTeachers", "SELECT COUNT(*) FROM users WHERE role = 'TEACHER'"),
        ("totalStudents", "SELECT COUNT(*) FROM students"),
        ("totalClasses", "SELECT COUNT(*) FROM classes"),
    ];
    let mut result = json!({});
    for (key, sql) in totals {
        match count(conn, sql) {
            Ok(v) => result[key] = json!(v),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let submissions = match recent_submissions(conn, 5) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let lessons = match recent_lessons(conn, 5) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Interleave the two feeds, newest first.
    let mut activity: Vec<serde_json::Value> = Vec::with_capacity(10);
    for s in submissions {
        activity.push(json!({
            "type": "Submission",
            "description": format!(
                "{} submitted {}",
                s["studentName"].as_str().unwrap_or(""),
                s["assignmentTitle"].as_str().unwrap_or("")
            ),
            "createdAt": s["submittedAt"],
        }));
    }
    for l in lessons {
        activity.push(json!({
            "type": "Lesson",
            "description": format!(
                "New lesson posted: {} in {}",
                l["unit"].as_str().unwrap_or(""),
                l["className"].as_str().unwrap_or("")
            ),
            "createdAt": l["createdAt"],
        }));
    }
    activity.sort_by(|a, b| {
        let ka = a["createdAt"].as_str().unwrap_or("");
        let kb = b["createdAt"].as_str().unwrap_or("");
        kb.cmp(ka)
    });
    activity.truncate(10);
    result["recentActivity"] = json!(activity);

    ok(&req.id, result)
}

fn handle_reports_admin(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Admin]) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let totals = [
        (
            "totalEnrollments",
            "SELECT COUNT(*) FROM enrollments WHERE is_active = 1",
        ),
        ("totalLessons", "SELECT COUNT(*) FROM lessons"),
        ("totalHomework", "SELECT COUNT(*) FROM homework_assignments"),
        ("totalSubmissions", "SELECT COUNT(*) FROM homework_submissions"),
    ];
    let mut result = json!({});
    for (key, sql) in totals {
        match count(conn, sql) {
            Ok(v) => result[key] = json!(v),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let alerts = {
        let mut stmt = match conn.prepare(
            "SELECT s.name, c.name, e.classes_remaining, u.name, u.email
             FROM enrollments e
             JOIN students s ON s.id = e.student_id
             JOIN classes c ON c.id = e.class_id
             JOIN users u ON u.id = s.parent_id
             WHERE e.is_active = 1 AND e.classes_remaining <= 2
             ORDER BY e.classes_remaining ASC, s.name",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([], |r| {
                Ok(json!({
                    "studentName": r.get::<_, String>(0)?,
                    "className": r.get::<_, String>(1)?,
                    "classesRemaining": r.get::<_, i64>(2)?,
                    "parentName": r.get::<_, String>(3)?,
                    "parentEmail": r.get::<_, String>(4)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };
    result["renewalAlerts"] = json!(alerts);

    let submissions = match recent_submissions(conn, 5) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let activity: Vec<serde_json::Value> = submissions
        .iter()
        .map(|s| {
            json!({
                "description": format!(
                    "{} submitted {}",
                    s["studentName"].as_str().unwrap_or(""),
                    s["assignmentTitle"].as_str().unwrap_or("")
                ),
                "createdAt": s["submittedAt"],
            })
        })
        .collect();
    result["recentActivity"] = json!(activity);

    ok(&req.id, result)
}

fn handle_calendar_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let actor = match require_role(state, req, &[Role::Teacher, Role::Parent]) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let today = notify::today_utc().format("%Y-%m-%d").to_string();
    let holidays = {
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
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    if actor.role == Role::Parent {
        let homework = {
            let mut stmt = match conn.prepare(
                "SELECT h.id, h.title, h.due_date, c.name
                 FROM homework_assignments h
                 JOIN classes c ON c.id = h.class_id
                 WHERE h.due_date >= ?1 AND h.class_id IN (
                   SELECT e.class_id FROM enrollments e
                   JOIN students s ON s.id = e.student_id
                   WHERE s.parent_id = ?2 AND e.is_active = 1
                 )
                 ORDER BY h.due_date ASC",
            ) {
                Ok(s) => s,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            let rows = stmt
                .query_map((&today, &actor.user_id), |r| {
                    Ok(json!({
                        "id": r.get::<_, String>(0)?,
                        "title": r.get::<_, String>(1)?,
                        "dueDate": r.get::<_, String>(2)?,
                        "className": r.get::<_, String>(3)?,
                    }))
                })
                .and_then(|it| it.collect::<Result<Vec<_>, _>>());
            match rows {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
        };

        let lessons = {
            let mut stmt = match conn.prepare(
                "SELECT l.id, l.unit, l.date, c.name
                 FROM lessons l
                 JOIN classes c ON c.id = l.class_id
                 WHERE l.class_id IN (
                   SELECT e.class_id FROM enrollments e
                   JOIN students s ON s.id = e.student_id
                   WHERE s.parent_id = ? AND e.is_active = 1
                 )
                 ORDER BY l.date DESC
                 LIMIT 30",
            ) {
                Ok(s) => s,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            let rows = stmt
                .query_map([&actor.user_id], |r| {
                    Ok(json!({
                        "id": r.get::<_, String>(0)?,
                        "unit": r.get::<_, String>(1)?,
                        "date": r.get::<_, String>(2)?,
                        "className": r.get::<_, String>(3)?,
                    }))
                })
                .and_then(|it| it.collect::<Result<Vec<_>, _>>());
            match rows {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
        };

        return ok(
            &req.id,
            json!({ "holidays": holidays, "upcomingHomework": homework, "lessons": lessons }),
        );
    }

    let homework = match upcoming_homework(conn, &today, None) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let lessons = match recent_lessons(conn, 50) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({ "holidays": holidays, "upcomingHomework": homework, "lessons": lessons }),
    )
}

fn classes_on_day(
    conn: &Connection,
    date: NaiveDate,
) -> rusqlite::Result<Vec<serde_json::Value>> {
    let weekday = date.weekday().number_from_monday();
    let mut stmt = conn.prepare(
        "SELECT id, name, days_of_week, start_time FROM classes ORDER BY name",
    )?;
    let classes = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut roster_stmt = conn.prepare(
        "SELECT e.id, e.student_id, s.name
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.class_id = ? AND e.is_active = 1
         ORDER BY s.name",
    )?;

    let mut out = Vec::new();
    for (id, name, days_raw, start_time) in classes {
        let days = parse_days_of_week(days_raw.as_deref());
        if !days.contains(&weekday) {
            continue;
        }
        let students = roster_stmt
            .query_map([&id], |r| {
                Ok(json!({
                    "enrollmentId": r.get::<_, String>(0)?,
                    "id": r.get::<_, String>(1)?,
                    "name": r.get::<_, String>(2)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
        out.push(json!({
            "classId": id,
            "className": name,
            "date": date.format("%Y-%m-%d").to_string(),
            "time": start_time.unwrap_or_else(|| "TBD".to_string()),
            "students": students,
        }));
    }
    Ok(out)
}

fn handle_upcoming_classes(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Teacher, Role::Admin]) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let today = notify::today_utc();
    let tomorrow = today + Duration::days(1);
    let today_classes = match classes_on_day(conn, today) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let tomorrow_classes = match classes_on_day(conn, tomorrow) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({ "today": today_classes, "tomorrow": tomorrow_classes }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.teacher" => Some(handle_dashboard_teacher(state, req)),
        "dashboard.admin" => Some(handle_dashboard_admin(state, req)),
        "reports.admin" => Some(handle_reports_admin(state, req)),
        "calendar.open" => Some(handle_calendar_open(state, req)),
        "upcomingClasses.open" => Some(handle_upcoming_classes(state, req)),
        _ => None,
    }
}

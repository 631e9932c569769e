use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
use argon2::Argon2;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, opt_bool, require_role, required_str};
use crate::ipc::types::{AppState, Request, Role};
use crate::notify;

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hash failed: {e}"))?;
    Ok(hash.to_string())
}

fn users_table_is_empty(conn: &rusqlite::Connection) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
    Ok(count == 0)
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    // Bootstrap rule: the first account of a fresh workspace may be created
    // without a session; after that, only admins manage accounts.
    let empty = match users_table_is_empty(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !empty {
        if let Err(resp) = require_role(state, req, &[Role::Admin]) {
            return resp;
        }
    }

    let email = match required_str(req, "email") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let role_raw = match required_str(req, "role") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(role) = Role::parse(&role_raw) else {
        return err(
            &req.id,
            "bad_params",
            "role must be one of ADMIN, TEACHER, PARENT",
            None,
        );
    };
    let email_preferences = opt_bool(&req.params, "emailPreferences", true);

    let password_hash = match hash_password(&password) {
        Ok(h) => h,
        Err(e) => return err(&req.id, "internal", e.to_string(), None),
    };

    let user_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, email, name, password_hash, role, email_preferences, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &email,
            &name,
            &password_hash,
            role.as_str(),
            email_preferences as i64,
            notify::now_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    ok(
        &req.id,
        json!({ "userId": user_id, "email": email, "role": role.as_str() }),
    )
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Admin]) {
        return resp;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let teachers = {
        let mut stmt = match conn.prepare(
            "SELECT id, email, name, created_at FROM users WHERE role = 'TEACHER' ORDER BY name",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([], |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "email": r.get::<_, String>(1)?,
                    "name": r.get::<_, String>(2)?,
                    "createdAt": r.get::<_, String>(3)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let parents = {
        let mut stmt = match conn.prepare(
            "SELECT id, email, name, created_at FROM users WHERE role = 'PARENT' ORDER BY name",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let base = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        let base = match base {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };

        let mut stud_stmt = match conn.prepare(
            "SELECT id, name, english_level, target_exam FROM students WHERE parent_id = ? ORDER BY name",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let mut out = Vec::with_capacity(base.len());
        for (id, email, name, created_at) in base {
            let students = stud_stmt
                .query_map([&id], |r| {
                    Ok(json!({
                        "id": r.get::<_, String>(0)?,
                        "name": r.get::<_, String>(1)?,
                        "englishLevel": r.get::<_, Option<String>>(2)?,
                        "targetExam": r.get::<_, Option<String>>(3)?,
                    }))
                })
                .and_then(|it| it.collect::<Result<Vec<_>, _>>());
            let students = match students {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            out.push(json!({
                "id": id,
                "email": email,
                "name": name,
                "createdAt": created_at,
                "students": students,
            }));
        }
        out
    };

    ok(&req.id, json!({ "teachers": teachers, "parents": parents }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        _ => None,
    }
}

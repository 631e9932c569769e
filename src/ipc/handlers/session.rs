use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use log::info;
use rusqlite::OptionalExtension;
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{Actor, AppState, Request, Role};

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let row: Option<(String, String, String, String)> = match conn
        .query_row(
            "SELECT id, name, password_hash, role FROM users WHERE email = ?",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Same error for unknown email and wrong password.
    let Some((user_id, name, password_hash, role_raw)) = row else {
        return err(&req.id, "unauthorized", "invalid credentials", None);
    };
    let parsed_hash = match PasswordHash::new(&password_hash) {
        Ok(h) => h,
        Err(e) => return err(&req.id, "internal", format!("stored hash invalid: {e}"), None),
    };
    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return err(&req.id, "unauthorized", "invalid credentials", None);
    }
    let Some(role) = Role::parse(&role_raw) else {
        return err(&req.id, "internal", format!("unknown role {role_raw}"), None);
    };

    info!("event=login user={user_id} role={role_raw}");
    state.actor = Some(Actor {
        user_id: user_id.clone(),
        name: name.clone(),
        role,
    });
    ok(
        &req.id,
        json!({ "userId": user_id, "name": name, "role": role.as_str() }),
    )
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.actor = None;
    ok(&req.id, json!({ "ok": true }))
}

fn handle_whoami(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.actor.as_ref() {
        Some(actor) => ok(
            &req.id,
            json!({
                "userId": actor.user_id,
                "name": actor.name,
                "role": actor.role.as_str()
            }),
        ),
        None => ok(&req.id, json!(null)),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.login" => Some(handle_login(state, req)),
        "session.logout" => Some(handle_logout(state, req)),
        "session.whoami" => Some(handle_whoami(state, req)),
        _ => None,
    }
}

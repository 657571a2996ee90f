use chrono::Duration;
use http::{Method, StatusCode};
use serde::Serialize;

use crate::config::*;
use crate::context::{AppContext, RequestContext};
use crate::core::db::Db;
use crate::core::errors::Result;
use crate::core::helpers::{
    cookie, full_path, hash_password, header_str, redirect, set_cookie, verify_password, Request,
    Response,
};
use crate::forms::{self, FormErrors};
use crate::models::models::{TokenData, User};
use crate::templates;
use crate::users;

pub const INVALID_LOGIN: &str =
    "Пожалуйста, введите правильные имя пользователя и пароль. Оба поля могут быть чувствительны к регистру.";
pub const WRONG_OLD_PASSWORD: &str = "Ваш старый пароль введен неправильно. Пожалуйста, введите его снова.";

// === Tokens ===

pub fn issue_token(app: &AppContext, user_id: &str) -> Result<String> {
    let token = uuid::Uuid::new_v4().to_string();
    let data = TokenData {
        user_id: user_id.to_string(),
        created_at: app.clock.now(),
    };
    let _guard = app.db.write_guard();
    app.db.set_json(&token_key(&token), &data)?;
    app.db.list_push_back(&user_tokens_key(user_id), token.clone())?;
    Ok(token)
}

pub fn revoke_token(db: &Db, token: &str) -> Result<()> {
    let _guard = db.write_guard();
    if let Some(data) = db.get_json::<TokenData>(&token_key(token))? {
        db.list_remove(&user_tokens_key(&data.user_id), &token.to_string())?;
    }
    db.delete(&token_key(token))
}

/// Drop every token of `user_id`, optionally sparing one.
pub fn revoke_user_tokens(db: &Db, user_id: &str, except: Option<&str>) -> Result<()> {
    let _guard = db.write_guard();
    let tokens: Vec<String> = db.get_list(&user_tokens_key(user_id))?;
    let mut kept = Vec::new();
    for token in tokens {
        if Some(token.as_str()) == except {
            kept.push(token);
        } else {
            db.delete(&token_key(&token))?;
        }
    }
    if kept.is_empty() {
        db.delete(&user_tokens_key(user_id))
    } else {
        db.set_json(&user_tokens_key(user_id), &kept)
    }
}

fn request_token(req: &Request) -> Option<&str> {
    if let Some(bearer) = header_str(req, "Authorization").and_then(|h| h.strip_prefix("Bearer ")) {
        return Some(bearer.trim());
    }
    cookie(req, SESSION_COOKIE)
}

/// Resolve the authenticated user behind a request, if any. Expired tokens are
/// revoked on sight; they and tokens of deleted users count as anonymous.
pub fn viewer_from_request(app: &AppContext, req: &Request) -> Result<Option<User>> {
    let Some(token) = request_token(req) else {
        return Ok(None);
    };
    let Some(data) = app.db.get_json::<TokenData>(&token_key(token))? else {
        return Ok(None);
    };

    let age = app.clock.now() - data.created_at;
    if age > Duration::hours(app.settings.token_expiration_hours) {
        tracing::debug!(user_id = %data.user_id, age_secs = age.num_seconds(), "session token expired");
        revoke_token(&app.db, token)?;
        return Ok(None);
    }

    users::get_user(&app.db, &data.user_id)
}

pub fn attach_session(resp: &mut Response, token: &str) {
    set_cookie(
        resp,
        &format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, token),
    );
}

fn clear_session(resp: &mut Response) {
    set_cookie(
        resp,
        &format!("{}=; Path=/; HttpOnly; Max-Age=0", SESSION_COOKIE),
    );
}

/// Where anonymous visitors of protected pages are sent.
pub fn login_url(next: &str) -> String {
    format!("{}?next={}", LOGIN_URL, urlencoding::encode(next).replace("%2F", "/"))
}

pub fn redirect_to_login(req: &Request) -> Response {
    redirect(&login_url(&full_path(req)))
}

/// Only local absolute paths are followed after login. Browsers read `//host`
/// and `/\host` as another site.
fn is_local_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.starts_with("//")
        && !path.contains('\\')
        && !path.chars().any(char::is_control)
}

fn safe_next(next: Option<&str>) -> String {
    match next {
        Some(path) if is_local_path(path) => path.to_string(),
        _ => "/".to_string(),
    }
}

// === Views ===

#[derive(Serialize)]
pub struct LoginContext {
    pub username: String,
    pub next: String,
    pub errors: FormErrors,
}

pub fn login(rc: &RequestContext) -> Result<Response> {
    let query = crate::core::query_params::parse_query_params(&full_path(rc.req));

    if rc.req.method() != Method::POST {
        let ctx = LoginContext {
            username: String::new(),
            next: query.get("next").cloned().unwrap_or_default(),
            errors: FormErrors::default(),
        };
        return templates::render_login(rc, StatusCode::OK, &ctx);
    }

    let data = forms::parse_form(rc.req)?;
    let username = data.field("username").unwrap_or("").trim().to_string();
    let password = data.field("password").unwrap_or("");
    let next = data
        .field("next")
        .map(str::to_string)
        .or_else(|| query.get("next").cloned());

    let user = users::find_by_username(rc.db(), &username)?
        .filter(|u| verify_password(password, &u.password));

    let Some(user) = user else {
        tracing::info!(%username, "failed login");
        let mut errors = FormErrors::default();
        errors.add("__all__", INVALID_LOGIN);
        let ctx = LoginContext {
            username,
            next: next.unwrap_or_default(),
            errors,
        };
        return templates::render_login(rc, StatusCode::OK, &ctx);
    };

    let token = issue_token(rc.app, &user.id)?;
    tracing::info!(username = %user.username, "user logged in");

    let mut resp = redirect(&safe_next(next.as_deref()));
    attach_session(&mut resp, &token);
    Ok(resp)
}

pub fn logout(rc: &RequestContext) -> Result<Response> {
    if let Some(token) = request_token(rc.req) {
        revoke_token(rc.db(), token)?;
    }
    let mut resp = templates::render_simple(rc, "users/logged_out.html", "Вы вышли из системы")?;
    clear_session(&mut resp);
    Ok(resp)
}

#[derive(Serialize)]
pub struct PasswordChangeContext {
    pub errors: FormErrors,
}

pub fn password_change(rc: &RequestContext) -> Result<Response> {
    let user = match rc.viewer() {
        Some(user) => user,
        None => return Ok(redirect_to_login(rc.req)),
    };

    if rc.req.method() != Method::POST {
        let ctx = PasswordChangeContext {
            errors: FormErrors::default(),
        };
        return templates::render_password_change(rc, &ctx);
    }

    let data = forms::parse_form(rc.req)?;
    let old_password = data.field("old_password").unwrap_or("");
    let new_password1 = data.field("new_password1").unwrap_or("");
    let new_password2 = data.field("new_password2").unwrap_or("");

    let mut errors = FormErrors::default();
    if !verify_password(old_password, &user.password) {
        errors.add("old_password", WRONG_OLD_PASSWORD);
    }
    if new_password1.is_empty() {
        errors.add("new_password1", forms::REQUIRED);
    } else if new_password1 != new_password2 {
        errors.add("new_password2", users::PASSWORD_MISMATCH);
    } else if new_password1.chars().count() < MIN_PASSWORD_LENGTH {
        errors.add("new_password2", users::PASSWORD_TOO_SHORT);
    }
    if !errors.is_empty() {
        return templates::render_password_change(rc, &PasswordChangeContext { errors });
    }

    let mut updated = user.clone();
    updated.password = hash_password(new_password1)?;
    users::save_user(rc.db(), &updated)?;

    // Other sessions end; this one carries on.
    revoke_user_tokens(rc.db(), &user.id, request_token(rc.req))?;
    tracing::info!(username = %user.username, "password changed");

    Ok(redirect("/auth/password_change/done/"))
}

pub fn password_change_done(rc: &RequestContext) -> Result<Response> {
    if rc.viewer().is_none() {
        return Ok(redirect_to_login(rc.req));
    }
    templates::render_simple(rc, "users/password_change_done.html", "Пароль изменён")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::helpers::ManualClock;
    use crate::config::Settings;
    use chrono::Utc;
    use std::sync::Arc;

    fn app_with_clock() -> (AppContext, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let app = AppContext::with_clock(Db::in_memory(), Settings::default(), clock.clone());
        (app, clock)
    }

    fn request_with(header: &str, value: &str) -> Request {
        http::Request::builder()
            .uri("/")
            .header(header, value)
            .body(Vec::new())
            .unwrap()
    }

    #[test]
    fn resolves_viewer_from_cookie_and_bearer() {
        let (app, _) = app_with_clock();
        let user = User::new("vasya", "v@example.com", Utc::now());
        users::insert_user(&app.db, &user).unwrap();
        let token = issue_token(&app, &user.id).unwrap();

        let by_cookie = request_with("Cookie", &format!("sessionid={}", token));
        assert_eq!(viewer_from_request(&app, &by_cookie).unwrap(), Some(user.clone()));

        let by_header = request_with("Authorization", &format!("Bearer {}", token));
        assert_eq!(viewer_from_request(&app, &by_header).unwrap(), Some(user));

        let bogus = request_with("Cookie", "sessionid=nope");
        assert_eq!(viewer_from_request(&app, &bogus).unwrap(), None);
    }

    #[test]
    fn expired_tokens_are_anonymous() {
        let (app, clock) = app_with_clock();
        let user = User::new("vasya", "v@example.com", Utc::now());
        users::insert_user(&app.db, &user).unwrap();
        let token = issue_token(&app, &user.id).unwrap();
        let req = request_with("Cookie", &format!("sessionid={}", token));

        clock.advance(Duration::hours(app.settings.token_expiration_hours + 1));
        assert_eq!(viewer_from_request(&app, &req).unwrap(), None);
    }

    #[test]
    fn token_expires_on_the_exact_limit_and_is_removed() {
        let (app, clock) = app_with_clock();
        let user = User::new("vasya", "v@example.com", Utc::now());
        users::insert_user(&app.db, &user).unwrap();
        let token = issue_token(&app, &user.id).unwrap();
        let req = request_with("Cookie", &format!("sessionid={}", token));

        clock.advance(Duration::hours(app.settings.token_expiration_hours));
        assert_eq!(viewer_from_request(&app, &req).unwrap(), Some(user.clone()));
        assert!(app.db.exists(&token_key(&token)).unwrap());

        clock.advance(Duration::minutes(30));
        assert_eq!(viewer_from_request(&app, &req).unwrap(), None);
        assert!(!app.db.exists(&token_key(&token)).unwrap());
        assert!(app.db.get_list::<String>(&user_tokens_key(&user.id)).unwrap().is_empty());
    }

    #[test]
    fn revoking_user_tokens_spares_the_current_one() {
        let (app, _) = app_with_clock();
        let keep = issue_token(&app, "u1").unwrap();
        let drop = issue_token(&app, "u1").unwrap();
        revoke_user_tokens(&app.db, "u1", Some(&keep)).unwrap();
        assert!(app.db.exists(&token_key(&keep)).unwrap());
        assert!(!app.db.exists(&token_key(&drop)).unwrap());
    }

    #[test]
    fn login_url_keeps_slashes_and_encodes_query() {
        assert_eq!(
            login_url("/posts/1/comment/?text=test_comment"),
            "/auth/login/?next=/posts/1/comment/%3Ftext%3Dtest_comment"
        );
    }

    #[test]
    fn next_must_be_local() {
        assert_eq!(safe_next(Some("/create/")), "/create/");
        assert_eq!(safe_next(Some("//evil.example.com/")), "/");
        assert_eq!(safe_next(Some("https://evil.example.com/")), "/");
        assert_eq!(safe_next(Some("/\\evil.example.com")), "/");
        assert_eq!(safe_next(Some("/posts/\\x")), "/");
        assert_eq!(safe_next(Some("/\r\nLocation: //evil")), "/");
        assert_eq!(safe_next(None), "/");
    }
}

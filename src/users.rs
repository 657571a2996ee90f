use http::{Method, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::auth;
use crate::config::*;
use crate::context::RequestContext;
use crate::core::db::Db;
use crate::core::errors::{AppError, Result};
use crate::core::helpers::{hash_password, redirect, Response};
use crate::follow;
use crate::forms::{self, FormErrors};
use crate::models::models::User;
use crate::posts;
use crate::templates;

pub const USERNAME_TAKEN: &str = "Пользователь с таким именем уже существует.";
pub const INVALID_USERNAME: &str =
    "Введите правильное имя пользователя. Оно может содержать только буквы, цифры и знаки @/./+/-/_.";
pub const PASSWORD_MISMATCH: &str = "Введенные пароли не совпадают.";
pub const PASSWORD_TOO_SHORT: &str =
    "Введённый пароль слишком короткий. Он должен содержать как минимум 8 символов.";

// === Repository ===

pub fn get_user(db: &Db, user_id: &str) -> Result<Option<User>> {
    db.get_json(&user_key(user_id))
}

pub fn find_by_username(db: &Db, username: &str) -> Result<Option<User>> {
    match db.get_json::<String>(&username_key(username))? {
        Some(id) => get_user(db, &id),
        None => Ok(None),
    }
}

pub fn get_by_username(db: &Db, username: &str) -> Result<User> {
    find_by_username(db, username)?
        .ok_or_else(|| AppError::not_found(format!("No user named {}", username)))
}

/// Persist a new user. Usernames are unique.
pub fn insert_user(db: &Db, user: &User) -> Result<()> {
    let _guard = db.write_guard();
    if db.exists(&username_key(&user.username))? {
        return Err(AppError::Conflict(format!("Username {} exists", user.username)));
    }
    db.set_json(&user_key(&user.id), user)?;
    db.set_json(&username_key(&user.username), &user.id)?;
    db.list_push_back(USERS_LIST_KEY, user.id.clone())?;
    Ok(())
}

pub fn save_user(db: &Db, user: &User) -> Result<()> {
    db.set_json(&user_key(&user.id), user)
}

/// Remove a user together with everything they own: posts (and their
/// comments), their own comments, follow edges in both directions and tokens.
pub fn delete_user(db: &Db, user_id: &str) -> Result<()> {
    let Some(user) = get_user(db, user_id)? else {
        return Ok(());
    };

    for post_id in db.get_list::<u64>(&author_posts_key(user_id))? {
        posts::delete_post(db, post_id)?;
    }
    for comment_id in db.get_list::<u64>(&author_comments_key(user_id))? {
        posts::delete_comment(db, comment_id)?;
    }
    follow::drop_all_edges(db, user_id)?;
    auth::revoke_user_tokens(db, user_id, None)?;

    let _guard = db.write_guard();
    db.delete(&author_posts_key(user_id))?;
    db.delete(&author_comments_key(user_id))?;
    db.delete(&username_key(&user.username))?;
    db.delete(&user_key(user_id))?;
    db.list_remove(USERS_LIST_KEY, &user.id)?;

    tracing::info!(username = %user.username, "user deleted");
    Ok(())
}

fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username.chars().count() <= MAX_USERNAME_LENGTH
        && username
            .chars()
            .all(|c| c.is_alphanumeric() || "@.+-_".contains(c))
}

// === Signup ===

#[derive(Serialize)]
pub struct SignupContext {
    pub values: BTreeMap<String, String>,
    pub errors: FormErrors,
}

pub fn signup(rc: &RequestContext) -> Result<Response> {
    if rc.req.method() != Method::POST {
        let ctx = SignupContext {
            values: BTreeMap::new(),
            errors: FormErrors::default(),
        };
        return templates::render_signup(rc, StatusCode::OK, &ctx);
    }

    let data = forms::parse_form(rc.req)?;
    let field = |name: &str| data.field(name).map(str::trim).unwrap_or("").to_string();
    let username = field("username");
    let email = field("email");
    let password1 = data.field("password1").unwrap_or("").to_string();
    let password2 = data.field("password2").unwrap_or("").to_string();

    let mut errors = FormErrors::default();
    if username.is_empty() {
        errors.add("username", forms::REQUIRED);
    } else if !is_valid_username(&username) {
        errors.add("username", INVALID_USERNAME);
    } else if find_by_username(rc.db(), &username)?.is_some() {
        errors.add("username", USERNAME_TAKEN);
    }
    if password1.is_empty() {
        errors.add("password1", forms::REQUIRED);
    }
    if password2.is_empty() {
        errors.add("password2", forms::REQUIRED);
    } else if password1 != password2 {
        errors.add("password2", PASSWORD_MISMATCH);
    } else if password1.chars().count() < MIN_PASSWORD_LENGTH {
        errors.add("password2", PASSWORD_TOO_SHORT);
    }

    if !errors.is_empty() {
        let values = ["first_name", "last_name", "username", "email"]
            .iter()
            .map(|name| (name.to_string(), field(name)))
            .collect();
        let ctx = SignupContext { values, errors };
        return templates::render_signup(rc, StatusCode::OK, &ctx);
    }

    let mut user = User::new(&username, &email, rc.app.clock.now());
    user.first_name = field("first_name");
    user.last_name = field("last_name");
    user.password = hash_password(&password1)?;

    match insert_user(rc.db(), &user) {
        Ok(()) => {}
        Err(AppError::Conflict(_)) => {
            let mut errors = FormErrors::default();
            errors.add("username", USERNAME_TAKEN);
            let ctx = SignupContext {
                values: BTreeMap::new(),
                errors,
            };
            return templates::render_signup(rc, StatusCode::OK, &ctx);
        }
        Err(err) => return Err(err),
    }
    tracing::info!(username = %user.username, "user signed up");

    let token = auth::issue_token(rc.app, &user.id)?;
    let mut resp = redirect("/");
    auth::attach_session(&mut resp, &token);
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn usernames_are_unique() {
        let db = Db::in_memory();
        insert_user(&db, &User::new("vasya", "a@example.com", Utc::now())).unwrap();
        let dup = insert_user(&db, &User::new("vasya", "b@example.com", Utc::now()));
        assert!(matches!(dup, Err(AppError::Conflict(_))));
        assert_eq!(db.get_list::<String>(USERS_LIST_KEY).unwrap().len(), 1);
    }

    #[test]
    fn lookup_by_username() {
        let db = Db::in_memory();
        let user = User::new("petya", "p@example.com", Utc::now());
        insert_user(&db, &user).unwrap();
        assert_eq!(get_by_username(&db, "petya").unwrap(), user);
        assert!(matches!(get_by_username(&db, "nobody"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn deleting_user_cascades() {
        use crate::forms::{CommentInput, PostInput};

        let db = Db::in_memory();
        let leo = User::new("leo", "", Utc::now());
        let ann = User::new("ann", "", Utc::now());
        insert_user(&db, &leo).unwrap();
        insert_user(&db, &ann).unwrap();

        let own = posts::create_post(
            &db,
            &leo.id,
            PostInput {
                text: "пост льва".to_string(),
                group_id: None,
                image: None,
            },
            Utc::now(),
        )
        .unwrap();
        let other = posts::create_post(
            &db,
            &ann.id,
            PostInput {
                text: "пост анны".to_string(),
                group_id: None,
                image: None,
            },
            Utc::now(),
        )
        .unwrap();
        posts::create_comment(
            &db,
            other.id,
            &leo.id,
            CommentInput {
                text: "комментарий льва".to_string(),
            },
            Utc::now(),
        )
        .unwrap();
        follow::insert_follow(&db, &ann.id, &leo.id).unwrap();

        delete_user(&db, &leo.id).unwrap();
        assert!(find_by_username(&db, "leo").unwrap().is_none());
        assert!(posts::get_post(&db, own.id).unwrap().is_none());
        assert!(posts::list_comments(&db, other.id).unwrap().is_empty());
        assert!(follow::get_followings(&db, &ann.id).unwrap().is_empty());
        assert_eq!(db.get_list::<String>(USERS_LIST_KEY).unwrap(), vec![ann.id.clone()]);
    }

    #[test]
    fn username_charset() {
        assert!(is_valid_username("user.name+tag@x-y_z"));
        assert!(is_valid_username("Вася"));
        assert!(!is_valid_username("with space"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username(&"a".repeat(MAX_USERNAME_LENGTH + 1)));
    }
}

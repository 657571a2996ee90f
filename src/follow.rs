use crate::auth::redirect_to_login;
use crate::config::*;
use crate::context::RequestContext;
use crate::core::db::Db;
use crate::core::errors::{AppError, Result};
use crate::core::helpers::{redirect, Response};
use crate::handlers::profile_url;
use crate::models::models::Follow;
use crate::users;

fn insert_unlocked(db: &Db, user_id: &str, author_id: &str) -> Result<Follow> {
    let key = follow_key(user_id, author_id);
    if db.exists(&key)? {
        return Err(AppError::Conflict(format!(
            "{} already follows {}",
            user_id, author_id
        )));
    }

    let edge = Follow {
        user_id: user_id.to_string(),
        author_id: author_id.to_string(),
    };
    db.set_json(&key, &edge)?;
    db.list_push_back(&followings_key(user_id), author_id.to_string())?;
    db.list_push_back(&followers_key(author_id), user_id.to_string())?;
    Ok(edge)
}

/// Store a new (user -> author) edge. The pair is unique.
pub fn insert_follow(db: &Db, user_id: &str, author_id: &str) -> Result<Follow> {
    let _guard = db.write_guard();
    insert_unlocked(db, user_id, author_id)
}

/// The existing edge, or a freshly stored one. The flag tells which.
pub fn get_or_create_follow(db: &Db, user_id: &str, author_id: &str) -> Result<(Follow, bool)> {
    let _guard = db.write_guard();
    if let Some(edge) = db.get_json::<Follow>(&follow_key(user_id, author_id))? {
        return Ok((edge, false));
    }
    Ok((insert_unlocked(db, user_id, author_id)?, true))
}

fn delete_unlocked(db: &Db, user_id: &str, author_id: &str) -> Result<bool> {
    let key = follow_key(user_id, author_id);
    if !db.exists(&key)? {
        return Ok(false);
    }
    db.delete(&key)?;
    db.list_remove(&followings_key(user_id), &author_id.to_string())?;
    db.list_remove(&followers_key(author_id), &user_id.to_string())?;
    Ok(true)
}

/// Remove the edge if present. Returns whether anything was removed.
pub fn delete_follow(db: &Db, user_id: &str, author_id: &str) -> Result<bool> {
    let _guard = db.write_guard();
    delete_unlocked(db, user_id, author_id)
}

pub fn is_following(db: &Db, user_id: &str, author_id: &str) -> Result<bool> {
    db.exists(&follow_key(user_id, author_id))
}

/// Ids of the authors `user_id` follows.
pub fn get_followings(db: &Db, user_id: &str) -> Result<Vec<String>> {
    db.get_list(&followings_key(user_id))
}

/// Ids of the users following `author_id`.
pub fn get_followers(db: &Db, author_id: &str) -> Result<Vec<String>> {
    db.get_list(&followers_key(author_id))
}

/// Drop every edge touching `user_id`, in both directions.
pub fn drop_all_edges(db: &Db, user_id: &str) -> Result<()> {
    let _guard = db.write_guard();
    for author_id in get_followings(db, user_id)? {
        delete_unlocked(db, user_id, &author_id)?;
    }
    for follower_id in get_followers(db, user_id)? {
        delete_unlocked(db, &follower_id, user_id)?;
    }
    db.delete(&followings_key(user_id))?;
    db.delete(&followers_key(user_id))
}

// === Views ===

pub fn profile_follow(rc: &RequestContext, username: &str) -> Result<Response> {
    let Some(viewer) = rc.viewer() else {
        return Ok(redirect_to_login(rc.req));
    };
    let author = users::get_by_username(rc.db(), username)?;

    if author.id != viewer.id {
        let (_, created) = get_or_create_follow(rc.db(), &viewer.id, &author.id)?;
        if created {
            tracing::info!(follower = %viewer.username, author = %author.username, "followed");
        }
    }
    Ok(redirect(&profile_url(&author.username)))
}

pub fn profile_unfollow(rc: &RequestContext, username: &str) -> Result<Response> {
    let Some(viewer) = rc.viewer() else {
        return Ok(redirect_to_login(rc.req));
    };
    let author = users::get_by_username(rc.db(), username)?;

    if delete_follow(rc.db(), &viewer.id, &author.id)? {
        tracing::info!(follower = %viewer.username, author = %author.username, "unfollowed");
    }
    Ok(redirect(&profile_url(&author.username)))
}

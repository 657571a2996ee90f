//! Routing table: URL patterns, reverse helpers and dispatch.

use http::Method;

use crate::auth;
use crate::context::{AppContext, RequestContext};
use crate::core::errors::{AppError, Result};
use crate::core::helpers::{full_path, moved_permanently, Request, Response};
use crate::follow;
use crate::posts;
use crate::static_server;
use crate::users;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Index,
    GroupPosts(String),
    Profile(String),
    PostDetail(u64),
    PostCreate,
    PostEdit(u64),
    AddComment(u64),
    FollowIndex,
    ProfileFollow(String),
    ProfileUnfollow(String),
    Signup,
    Login,
    Logout,
    PasswordChange,
    PasswordChangeDone,
    AboutAuthor,
    AboutTech,
    Static(String),
    Media(String),
}

const GET: &[&str] = &["GET", "HEAD"];
const GET_POST: &[&str] = &["GET", "HEAD", "POST"];
pub(crate) const POST_ONLY: &[&str] = &["POST"];

impl Route {
    pub fn resolve(path: &str) -> Option<Route> {
        if let Some(rest) = path.strip_prefix("/static/") {
            return (!rest.is_empty()).then(|| Route::Static(rest.to_string()));
        }
        if let Some(rest) = path.strip_prefix("/media/") {
            return (!rest.is_empty()).then(|| Route::Media(rest.to_string()));
        }
        if path == "/" {
            return Some(Route::Index);
        }

        let inner = path.strip_prefix('/')?.strip_suffix('/')?;
        let segments: Vec<&str> = inner.split('/').collect();

        match segments.as_slice() {
            ["group", slug] if is_slug(slug) => Some(Route::GroupPosts(slug.to_string())),
            ["profile", username] => decode_segment(username).map(Route::Profile),
            ["profile", username, "follow"] => decode_segment(username).map(Route::ProfileFollow),
            ["profile", username, "unfollow"] => decode_segment(username).map(Route::ProfileUnfollow),
            ["posts", id] => parse_id(id).map(Route::PostDetail),
            ["posts", id, "edit"] => parse_id(id).map(Route::PostEdit),
            ["posts", id, "comment"] => parse_id(id).map(Route::AddComment),
            ["create"] => Some(Route::PostCreate),
            ["follow"] => Some(Route::FollowIndex),
            ["auth", "signup"] => Some(Route::Signup),
            ["auth", "login"] => Some(Route::Login),
            ["auth", "logout"] => Some(Route::Logout),
            ["auth", "password_change"] => Some(Route::PasswordChange),
            ["auth", "password_change", "done"] => Some(Route::PasswordChangeDone),
            ["about", "author"] => Some(Route::AboutAuthor),
            ["about", "tech"] => Some(Route::AboutTech),
            _ => None,
        }
    }
}

fn is_slug(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn parse_id(value: &str) -> Option<u64> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn decode_segment(value: &str) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    urlencoding::decode(value).ok().map(|s| s.into_owned())
}

// === Reverse helpers ===

pub fn post_detail_url(post_id: u64) -> String {
    format!("/posts/{}/", post_id)
}

pub fn post_edit_url(post_id: u64) -> String {
    format!("/posts/{}/edit/", post_id)
}

pub fn add_comment_url(post_id: u64) -> String {
    format!("/posts/{}/comment/", post_id)
}

pub fn profile_url(username: &str) -> String {
    format!("/profile/{}/", urlencoding::encode(username))
}

pub fn profile_follow_url(username: &str) -> String {
    format!("/profile/{}/follow/", urlencoding::encode(username))
}

pub fn profile_unfollow_url(username: &str) -> String {
    format!("/profile/{}/unfollow/", urlencoding::encode(username))
}

pub fn group_url(slug: &str) -> String {
    format!("/group/{}/", slug)
}

pub fn media_url(path: &str) -> String {
    format!("/media/{}", path)
}

// === Dispatch ===

/// Entry point shared by the Spin component and the native server.
pub fn handle(app: &AppContext, req: Request) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let span = tracing::info_span!("request", %method, %path);
    let _enter = span.enter();

    let viewer = match auth::viewer_from_request(app, &req) {
        Ok(viewer) => viewer,
        Err(err) => return err.into(),
    };
    let rc = RequestContext {
        app,
        req: &req,
        viewer,
    };

    let resp = match dispatch(&rc) {
        Ok(resp) => resp,
        Err(err) => err.into(),
    };
    tracing::debug!(status = resp.status().as_u16(), "response");
    resp
}

fn dispatch(rc: &RequestContext) -> Result<Response> {
    let path = rc.req.uri().path();
    let route = match Route::resolve(path) {
        Some(route) => route,
        None => {
            let slashed = format!("{}/", path);
            if !path.ends_with('/') && Route::resolve(&slashed).is_some() {
                let target = full_path(rc.req).replacen(path, &slashed, 1);
                return Ok(moved_permanently(&target));
            }
            return Err(AppError::not_found(format!("No route for {}", path)));
        }
    };

    let method = rc.req.method();
    match route {
        Route::Index => {
            allow(method, GET)?;
            posts::index(rc)
        }
        Route::GroupPosts(slug) => {
            allow(method, GET)?;
            posts::group_posts(rc, &slug)
        }
        Route::Profile(username) => {
            allow(method, GET)?;
            posts::profile(rc, &username)
        }
        Route::PostDetail(id) => {
            allow(method, GET)?;
            posts::post_detail(rc, id)
        }
        Route::PostCreate => {
            allow(method, GET_POST)?;
            posts::post_create(rc)
        }
        Route::PostEdit(id) => {
            allow(method, GET_POST)?;
            posts::post_edit(rc, id)
        }
        Route::AddComment(id) => posts::add_comment(rc, id),
        Route::FollowIndex => {
            allow(method, GET)?;
            posts::follow_index(rc)
        }
        Route::ProfileFollow(username) => {
            allow(method, GET_POST)?;
            follow::profile_follow(rc, &username)
        }
        Route::ProfileUnfollow(username) => {
            allow(method, GET_POST)?;
            follow::profile_unfollow(rc, &username)
        }
        Route::Signup => {
            allow(method, GET_POST)?;
            users::signup(rc)
        }
        Route::Login => {
            allow(method, GET_POST)?;
            auth::login(rc)
        }
        Route::Logout => {
            allow(method, GET_POST)?;
            auth::logout(rc)
        }
        Route::PasswordChange => {
            allow(method, GET_POST)?;
            auth::password_change(rc)
        }
        Route::PasswordChangeDone => {
            allow(method, GET)?;
            auth::password_change_done(rc)
        }
        Route::AboutAuthor => {
            allow(method, GET)?;
            static_server::about_page(rc, "about/author.html", "Об авторе проекта")
        }
        Route::AboutTech => {
            allow(method, GET)?;
            static_server::about_page(rc, "about/tech.html", "Технологии")
        }
        Route::Static(asset) => {
            allow(method, GET)?;
            static_server::serve_static(&asset)
        }
        Route::Media(media) => {
            allow(method, GET)?;
            static_server::serve_media(rc.db(), &media)
        }
    }
}

pub(crate) fn allow(method: &Method, allowed: &'static [&'static str]) -> Result<()> {
    if allowed.contains(&method.as_str()) {
        Ok(())
    } else {
        Err(AppError::MethodNotAllowed(allowed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_every_named_route() {
        let cases = [
            ("/", Route::Index),
            ("/group/bear/", Route::GroupPosts("bear".into())),
            ("/profile/vasya/", Route::Profile("vasya".into())),
            ("/posts/15/", Route::PostDetail(15)),
            ("/create/", Route::PostCreate),
            ("/posts/15/edit/", Route::PostEdit(15)),
            ("/posts/15/comment/", Route::AddComment(15)),
            ("/follow/", Route::FollowIndex),
            ("/profile/vasya/follow/", Route::ProfileFollow("vasya".into())),
            ("/profile/vasya/unfollow/", Route::ProfileUnfollow("vasya".into())),
            ("/auth/login/", Route::Login),
            ("/about/tech/", Route::AboutTech),
            ("/static/css/main.css", Route::Static("css/main.css".into())),
        ];
        for (path, expected) in cases {
            assert_eq!(Route::resolve(path), Some(expected), "{}", path);
        }
    }

    #[test]
    fn rejects_malformed_paths() {
        for path in ["/404/", "/posts/abc/", "/posts/+5/", "/group/bad slug/", "/posts/1", "/static/"] {
            assert_eq!(Route::resolve(path), None, "{}", path);
        }
    }

    #[test]
    fn usernames_round_trip_through_urls() {
        let url = profile_url("вася");
        assert_eq!(Route::resolve(&url), Some(Route::Profile("вася".into())));
    }

    #[test]
    fn missing_trailing_slash_redirects_permanently() {
        let app = AppContext::in_memory();
        let req = http::Request::builder()
            .uri("/posts/1/edit?x=1")
            .body(Vec::new())
            .unwrap();
        let resp = handle(&app, req);
        assert_eq!(resp.status(), http::StatusCode::MOVED_PERMANENTLY);
        assert_eq!(resp.headers()["Location"], "/posts/1/edit/?x=1");
    }

    #[test]
    fn unknown_route_is_not_found() {
        let app = AppContext::in_memory();
        let req = http::Request::builder().uri("/404/").body(Vec::new()).unwrap();
        assert_eq!(handle(&app, req).status(), http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn wrong_method_is_rejected() {
        let app = AppContext::in_memory();
        let req = http::Request::builder()
            .method("DELETE")
            .uri("/")
            .body(Vec::new())
            .unwrap();
        assert_eq!(handle(&app, req).status(), http::StatusCode::METHOD_NOT_ALLOWED);
    }
}

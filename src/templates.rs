use html_escape::encode_double_quoted_attribute;
use http::header::{HeaderValue, ALLOW};
use http::StatusCode;
use regex::Regex;
use rust_embed::RustEmbed;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::auth::{LoginContext, PasswordChangeContext};
use crate::context::RequestContext;
use crate::core::errors::{AppError, Result};
use crate::core::helpers::{html, json, wants_json, Response};
use crate::core::paginator::PageMeta;
use crate::forms::FormErrors;
use crate::handlers::{add_comment_url, post_edit_url, profile_follow_url, profile_unfollow_url};
use crate::models::models::Group;
use crate::posts::{ListingContext, ListingHeader, PostCard, PostDetailContext, PostFormContext};
use crate::users::SignupContext;

#[derive(RustEmbed)]
#[folder = "templates"]
struct Templates;

fn placeholder_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").expect("Regex should compile"))
}

fn url_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"https?://[^\s<]+").expect("Regex should compile"))
}

/// Values for one template. Everything goes in escaped unless added with
/// [`Vars::html`].
#[derive(Default)]
pub struct Vars(HashMap<&'static str, String>);

impl Vars {
    pub fn text(mut self, name: &'static str, value: &str) -> Self {
        self.0.insert(name, escape(value));
        self
    }

    pub fn html(mut self, name: &'static str, value: String) -> Self {
        self.0.insert(name, value);
        self
    }
}

fn escape(value: &str) -> String {
    encode_double_quoted_attribute(value).into_owned()
}

fn load(name: &str) -> Result<String> {
    let file = Templates::get(name).ok_or_else(|| anyhow::anyhow!("Template {} not found", name))?;
    String::from_utf8(file.data.into_owned())
        .map_err(|e| anyhow::anyhow!("Template {} is not UTF-8: {}", name, e).into())
}

/// Substitute `{{ name }}` placeholders in one pass. Substituted values are
/// never scanned again; unknown names render empty.
pub fn fill(template: &str, vars: &Vars) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &regex::Captures| {
            vars.0.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Escaped post or comment text with links made clickable and line breaks kept.
pub fn text_html(text: &str) -> String {
    let escaped = escape(text);
    let linked = url_regex().replace_all(&escaped, |caps: &regex::Captures| {
        let url = &caps[0];
        format!(r#"<a href="{}" target="_blank" rel="noopener noreferrer">{}</a>"#, url, url)
    });
    linked.replace('\n', "<br>")
}

// === Layout ===

fn nav(rc: &RequestContext) -> String {
    let mut links = vec![
        r#"<a href="/about/author/">Об авторе</a>"#.to_string(),
        r#"<a href="/about/tech/">Технологии</a>"#.to_string(),
    ];
    match rc.viewer() {
        Some(user) => {
            links.push(r#"<a href="/create/">Новая запись</a>"#.to_string());
            links.push(r#"<a href="/follow/">Избранные авторы</a>"#.to_string());
            links.push(r#"<a href="/auth/password_change/">Изменить пароль</a>"#.to_string());
            links.push(r#"<a href="/auth/logout/">Выйти</a>"#.to_string());
            links.push(format!(
                r#"<span class="nav-user">Пользователь: {}</span>"#,
                escape(&user.username)
            ));
        }
        None => {
            links.push(r#"<a href="/auth/login/">Войти</a>"#.to_string());
            links.push(r#"<a href="/auth/signup/">Регистрация</a>"#.to_string());
        }
    }
    links.join("\n")
}

fn layout(title: &str, nav: String, content: String) -> Result<String> {
    let base = load("base.html")?;
    Ok(fill(
        &base,
        &Vars::default()
            .text("title", title)
            .html("nav", nav)
            .html("content", content),
    ))
}

fn render_page(rc: &RequestContext, status: StatusCode, template: &str, title: &str, vars: Vars) -> Result<Response> {
    let content = fill(&load(template)?, &vars.text("title", title));
    Ok(html(status, layout(title, nav(rc), content)?))
}

// === Fragments ===

fn post_card(card: &PostCard, show_group: bool) -> Result<String> {
    let group = match (&card.group, show_group) {
        (Some(group), true) => format!(
            r#"<a href="{}">#{}</a>"#,
            escape(&group.url),
            escape(&group.title)
        ),
        _ => String::new(),
    };
    let image = card
        .image_url
        .as_deref()
        .map(|url| format!(r#"<img class="card-img" src="{}" alt="">"#, escape(url)))
        .unwrap_or_default();

    let vars = Vars::default()
        .text("author_name", &card.author.full_name)
        .text("author_url", &card.author.url)
        .text("pub_date", &card.pub_date.format("%d.%m.%Y %H:%M").to_string())
        .html("group", group)
        .html("image", image)
        .html("text", text_html(&card.text))
        .text("detail_url", &card.url);
    Ok(fill(&load("includes/post_card.html")?, &vars))
}

fn paginator(page: &PageMeta) -> String {
    if page.num_pages <= 1 {
        return String::new();
    }
    let mut parts = Vec::new();
    if page.has_previous {
        parts.push(r#"<a href="?page=1">&laquo; первая</a>"#.to_string());
        parts.push(format!(r#"<a href="?page={}">назад</a>"#, page.number - 1));
    }
    parts.push(format!(
        r#"<span class="current">Страница {} из {}</span>"#,
        page.number, page.num_pages
    ));
    if page.has_next {
        parts.push(format!(r#"<a href="?page={}">вперёд</a>"#, page.number + 1));
        parts.push(r#"<a href="?page=last">последняя &raquo;</a>"#.to_string());
    }
    format!(r#"<nav class="pagination">{}</nav>"#, parts.join(" "))
}

fn field_errors(errors: &FormErrors, field: &str) -> String {
    let messages = errors.get(field);
    if messages.is_empty() {
        return String::new();
    }
    let items: String = messages
        .iter()
        .map(|m| format!("<li>{}</li>", escape(m)))
        .collect();
    format!(r#"<ul class="errorlist">{}</ul>"#, items)
}

fn group_options(groups: &[Group], selected: &str) -> String {
    let mut options = vec![r#"<option value="">---------</option>"#.to_string()];
    for group in groups {
        let id = group.id.to_string();
        let marker = if id == selected { " selected" } else { "" };
        options.push(format!(
            r#"<option value="{}"{}>{}</option>"#,
            id,
            marker,
            escape(&group.title)
        ));
    }
    options.join("\n")
}

// === Pages ===

fn listing_json(ctx: &ListingContext) -> Result<serde_json::Value> {
    let mut value = match serde_json::to_value(&ctx.header)? {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    value.insert("title".to_string(), serde_json::Value::String(ctx.title.clone()));
    value.insert(
        ctx.config.context_object_name.to_string(),
        serde_json::to_value(&ctx.page.items)?,
    );
    value.insert("page".to_string(), serde_json::to_value(ctx.page.meta())?);
    Ok(serde_json::Value::Object(value))
}

pub fn render_listing(rc: &RequestContext, ctx: &ListingContext) -> Result<Response> {
    if wants_json(rc.req) {
        return json(StatusCode::OK, &listing_json(ctx)?);
    }

    let show_group = !matches!(ctx.header, ListingHeader::Group { .. });
    let mut cards = String::new();
    for card in &ctx.page.items {
        cards.push_str(&post_card(card, show_group)?);
    }
    let vars = Vars::default()
        .html("posts", cards)
        .html("paginator", paginator(&ctx.page.meta()));

    let (template, vars) = match &ctx.header {
        ListingHeader::Index {} => ("posts/index.html", vars),
        ListingHeader::Follow {} => ("posts/follow.html", vars),
        ListingHeader::Group { group } => (
            "posts/group_list.html",
            vars.text("group_title", &group.title)
                .html("group_description", text_html(&group.description)),
        ),
        ListingHeader::Profile(info) => {
            let button = match (rc.viewer(), info.is_self, info.following) {
                (Some(_), false, true) => format!(
                    r#"<a class="btn btn-light" href="{}">Отписаться</a>"#,
                    escape(&profile_unfollow_url(&info.author.username))
                ),
                (Some(_), false, false) => format!(
                    r#"<a class="btn btn-primary" href="{}">Подписаться</a>"#,
                    escape(&profile_follow_url(&info.author.username))
                ),
                _ => String::new(),
            };
            (
                "posts/profile.html",
                vars.text("author_name", &info.author.full_name)
                    .text("post_count", &info.post_count.to_string())
                    .text("followers_count", &info.followers_count.to_string())
                    .text("following_count", &info.following_count.to_string())
                    .html("follow_button", button),
            )
        }
    };
    render_page(rc, StatusCode::OK, template, &ctx.title, vars)
}

pub fn render_post_detail(rc: &RequestContext, ctx: &PostDetailContext) -> Result<Response> {
    if wants_json(rc.req) {
        return json(StatusCode::OK, ctx);
    }

    let post = &ctx.post;
    let mut comments = String::new();
    for comment in &ctx.comments {
        comments.push_str(&format!(
            r#"<div class="comment"><h5><a href="{}">{}</a> <small>{}</small></h5><p>{}</p></div>"#,
            escape(&comment.author.url),
            escape(&comment.author.full_name),
            comment.created.format("%d.%m.%Y %H:%M"),
            text_html(&comment.text)
        ));
    }

    let comment_form = match &ctx.comment_form {
        Some(form) => fill(
            &load("includes/comment_form.html")?,
            &Vars::default()
                .text("action", &add_comment_url(post.id))
                .text("text_value", form.value("text"))
                .html("text_errors", field_errors(&form.errors, "text")),
        ),
        None => String::new(),
    };
    let edit_link = if ctx.can_edit {
        format!(
            r#"<a class="btn btn-primary" href="{}">редактировать запись</a>"#,
            escape(&post_edit_url(post.id))
        )
    } else {
        String::new()
    };
    let group = post
        .group
        .as_ref()
        .map(|g| format!(r#"<a href="{}">#{}</a>"#, escape(&g.url), escape(&g.title)))
        .unwrap_or_default();
    let image = post
        .image_url
        .as_deref()
        .map(|url| format!(r#"<img class="card-img" src="{}" alt="">"#, escape(url)))
        .unwrap_or_default();

    let vars = Vars::default()
        .text("pub_date", &post.pub_date.format("%d.%m.%Y %H:%M").to_string())
        .text("author_name", &post.author.full_name)
        .text("author_url", &post.author.url)
        .text("author_post_count", &ctx.author_post_count.to_string())
        .html("group", group)
        .html("image", image)
        .html("text", text_html(&post.text))
        .html("edit_link", edit_link)
        .html("comment_form", comment_form)
        .html("comments", comments);

    let title = format!("Пост {}", post.text.chars().take(30).collect::<String>());
    render_page(rc, StatusCode::OK, "posts/post_detail.html", &title, vars)
}

pub fn render_post_form(rc: &RequestContext, ctx: &PostFormContext) -> Result<Response> {
    if wants_json(rc.req) {
        return json(StatusCode::OK, ctx);
    }

    let (title, action, submit) = match ctx.post_id {
        Some(id) if ctx.is_edit => ("Редактировать пост", post_edit_url(id), "Сохранить"),
        _ => ("Новый пост", "/create/".to_string(), "Добавить"),
    };
    let current_image = ctx
        .current_image
        .as_deref()
        .map(|url| {
            format!(
                r#"<p>На данный момент: <a href="{}">{}</a></p>"#,
                escape(url),
                escape(url)
            )
        })
        .unwrap_or_default();

    let form = &ctx.form;
    let vars = Vars::default()
        .text("action", &action)
        .text("submit", submit)
        .text("text_value", form.value("text"))
        .html("text_errors", field_errors(&form.errors, "text"))
        .html("group_options", group_options(&ctx.groups, form.value("group")))
        .html("group_errors", field_errors(&form.errors, "group"))
        .html("current_image", current_image)
        .html("image_errors", field_errors(&form.errors, "image"));
    render_page(rc, StatusCode::OK, "posts/create_post.html", title, vars)
}

pub fn render_login(rc: &RequestContext, status: StatusCode, ctx: &LoginContext) -> Result<Response> {
    if wants_json(rc.req) {
        return json(status, ctx);
    }
    let vars = Vars::default()
        .text("username", &ctx.username)
        .text("next", &ctx.next)
        .html("errors", field_errors(&ctx.errors, "__all__"));
    render_page(rc, status, "users/login.html", "Войти", vars)
}

pub fn render_signup(rc: &RequestContext, status: StatusCode, ctx: &SignupContext) -> Result<Response> {
    if wants_json(rc.req) {
        return json(status, ctx);
    }
    let value = |name: &str| ctx.values.get(name).map(String::as_str).unwrap_or("");
    let vars = Vars::default()
        .text("first_name", value("first_name"))
        .text("last_name", value("last_name"))
        .text("username", value("username"))
        .text("email", value("email"))
        .html("username_errors", field_errors(&ctx.errors, "username"))
        .html("password1_errors", field_errors(&ctx.errors, "password1"))
        .html("password2_errors", field_errors(&ctx.errors, "password2"));
    render_page(rc, status, "users/signup.html", "Зарегистрироваться", vars)
}

pub fn render_password_change(rc: &RequestContext, ctx: &PasswordChangeContext) -> Result<Response> {
    if wants_json(rc.req) {
        return json(StatusCode::OK, ctx);
    }
    let vars = Vars::default()
        .html("old_password_errors", field_errors(&ctx.errors, "old_password"))
        .html("new_password1_errors", field_errors(&ctx.errors, "new_password1"))
        .html("new_password2_errors", field_errors(&ctx.errors, "new_password2"));
    render_page(rc, StatusCode::OK, "users/password_change_form.html", "Изменить пароль", vars)
}

#[derive(Serialize)]
struct SimplePage<'a> {
    title: &'a str,
}

/// A page with no dynamic content besides the layout.
pub fn render_simple(rc: &RequestContext, template: &str, title: &str) -> Result<Response> {
    if wants_json(rc.req) {
        return json(StatusCode::OK, &SimplePage { title });
    }
    render_page(rc, StatusCode::OK, template, title, Vars::default())
}

/// Error pages never fail: a broken template degrades to a bare heading.
pub fn render_error(err: &AppError) -> Response {
    let status = err.status();
    let (template, title) = match err {
        AppError::NotFound(_) => ("core/404.html", "Страница не найдена"),
        _ if status.is_server_error() => ("core/500.html", "Ошибка сервера"),
        _ => ("core/error.html", status.canonical_reason().unwrap_or("Error")),
    };
    let vars = Vars::default()
        .text("title", title)
        .text("status", status.as_str())
        .text("message", &err.to_string());

    let body = load(template)
        .and_then(|t| layout(title, String::new(), fill(&t, &vars)))
        .unwrap_or_else(|_| format!("<h1>{}</h1>", escape(title)));

    let mut resp = html(status, body);
    if let AppError::MethodNotAllowed(allowed) = err {
        if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
            resp.headers_mut().insert(ALLOW, value);
        }
    }
    resp
}

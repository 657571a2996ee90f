use chrono::{DateTime, Duration, Utc};
use http::{Method, StatusCode};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::auth::redirect_to_login;
use crate::config::*;
use crate::context::RequestContext;
use crate::core::db::Db;
use crate::core::errors::{AppError, Result};
use crate::core::helpers::{full_path, redirect, response, wants_json, Response};
use crate::core::paginator::{paginate, paginate_with, Page, PageRequest};
use crate::core::query_params::parse_query_params;
use crate::follow;
use crate::forms::{self, BoundForm, CommentInput, ImageUpload, PostInput};
use crate::groups;
use crate::handlers::{allow, group_url, media_url, post_detail_url, profile_url, POST_ONLY};
use crate::models::models::{Comment, Group, Post, User};
use crate::templates;
use crate::users;

// === Repository ===

pub fn get_post(db: &Db, id: u64) -> Result<Option<Post>> {
    db.get_json(&post_key(id))
}

pub fn require_post(db: &Db, id: u64) -> Result<Post> {
    get_post(db, id)?.ok_or_else(|| AppError::not_found(format!("No post {}", id)))
}

fn load_indexed(db: &Db, id: u64) -> Result<Post> {
    get_post(db, id)?
        .ok_or_else(|| anyhow::anyhow!("index points at missing post {}", id).into())
}

fn load_at(db: &Db, ids: &[u64], index: usize) -> Result<Option<Post>> {
    match ids.get(index) {
        Some(id) => Ok(Some(load_indexed(db, *id)?)),
        None => Ok(None),
    }
}

/// The first `take` posts of several newest-first id lists, merged newest
/// first. Posts published at the same instant put the higher id first. Only
/// the posts that make it into the result (plus one head per list) are loaded.
fn merge_newest_first(db: &Db, feeds: &[Vec<u64>], take: usize) -> Result<Vec<Post>> {
    let mut cursors = vec![0usize; feeds.len()];
    let mut heads = Vec::with_capacity(feeds.len());
    for feed in feeds {
        heads.push(load_at(db, feed, 0)?);
    }

    let mut merged = Vec::new();
    while merged.len() < take {
        let newest = heads
            .iter()
            .enumerate()
            .filter_map(|(i, head)| head.as_ref().map(|post| (i, post)))
            .max_by_key(|(_, post)| (post.pub_date, post.id))
            .map(|(i, _)| i);
        let Some(i) = newest else {
            break;
        };
        cursors[i] += 1;
        let next = load_at(db, &feeds[i], cursors[i])?;
        if let Some(post) = std::mem::replace(&mut heads[i], next) {
            merged.push(post);
        }
    }
    Ok(merged)
}

/// Keep only the final path component and characters safe in a URL.
fn clean_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Store an upload under `posts/<name>`. A taken name gets a random suffix.
/// Callers must hold the write guard.
fn store_image(db: &Db, upload: &ImageUpload) -> Result<String> {
    let name = clean_file_name(&upload.name);
    let mut path = format!("posts/{}", name);
    if db.exists(&media_key(&path))? {
        let suffix = &uuid::Uuid::new_v4().simple().to_string()[..7];
        path = match name.rsplit_once('.') {
            Some((stem, ext)) => format!("posts/{}_{}.{}", stem, suffix, ext),
            None => format!("posts/{}_{}", name, suffix),
        };
    }
    db.set_bytes(&media_key(&path), &upload.data)?;
    Ok(path)
}

pub fn create_post(db: &Db, author_id: &str, input: PostInput, now: DateTime<Utc>) -> Result<Post> {
    let _guard = db.write_guard();
    let image = match &input.image {
        Some(upload) => Some(store_image(db, upload)?),
        None => None,
    };

    let post = Post {
        id: db.next_id(POST_SEQUENCE)?,
        text: input.text,
        pub_date: now,
        author_id: author_id.to_string(),
        group_id: input.group_id,
        image,
    };
    db.set_json(&post_key(post.id), &post)?;
    db.list_push_front(POSTS_INDEX_KEY, post.id)?;
    db.list_push_front(&author_posts_key(author_id), post.id)?;
    if let Some(group_id) = post.group_id {
        db.list_push_front(&group_posts_key(group_id), post.id)?;
    }

    tracing::info!(post_id = post.id, author_id, "post created");
    Ok(post)
}

/// Apply an author edit. The image is kept unless a new one is uploaded and
/// `pub_date` moves to `now`, which brings the post back to the top of every
/// listing it appears in.
pub fn update_post(db: &Db, post_id: u64, input: PostInput, now: DateTime<Utc>) -> Result<Post> {
    let _guard = db.write_guard();
    let mut post = require_post(db, post_id)?;

    if let Some(old_group) = post.group_id.filter(|g| Some(*g) != input.group_id) {
        db.list_remove(&group_posts_key(old_group), &post.id)?;
    }
    if let Some(upload) = &input.image {
        let path = store_image(db, upload)?;
        if let Some(old) = post.image.replace(path) {
            db.delete(&media_key(&old))?;
        }
    }

    post.text = input.text;
    post.group_id = input.group_id;
    post.pub_date = now;
    db.set_json(&post_key(post.id), &post)?;

    db.list_push_front(POSTS_INDEX_KEY, post.id)?;
    db.list_push_front(&author_posts_key(&post.author_id), post.id)?;
    if let Some(group_id) = post.group_id {
        db.list_push_front(&group_posts_key(group_id), post.id)?;
    }

    tracing::info!(post_id = post.id, "post updated");
    Ok(post)
}

fn delete_comment_unlocked(db: &Db, comment: &Comment) -> Result<()> {
    db.list_remove(&post_comments_key(comment.post_id), &comment.id)?;
    db.list_remove(&author_comments_key(&comment.author_id), &comment.id)?;
    db.delete(&comment_key(comment.id))
}

/// Delete a post with its comments and image.
pub fn delete_post(db: &Db, post_id: u64) -> Result<()> {
    let _guard = db.write_guard();
    let Some(post) = get_post(db, post_id)? else {
        return Ok(());
    };

    for comment_id in db.get_list::<u64>(&post_comments_key(post_id))? {
        if let Some(comment) = db.get_json::<Comment>(&comment_key(comment_id))? {
            delete_comment_unlocked(db, &comment)?;
        }
    }
    db.delete(&post_comments_key(post_id))?;

    db.list_remove(POSTS_INDEX_KEY, &post_id)?;
    db.list_remove(&author_posts_key(&post.author_id), &post_id)?;
    if let Some(group_id) = post.group_id {
        db.list_remove(&group_posts_key(group_id), &post_id)?;
    }
    if let Some(image) = &post.image {
        db.delete(&media_key(image))?;
    }
    db.delete(&post_key(post_id))?;

    tracing::info!(post_id, "post deleted");
    Ok(())
}

pub fn create_comment(
    db: &Db,
    post_id: u64,
    author_id: &str,
    input: CommentInput,
    now: DateTime<Utc>,
) -> Result<Comment> {
    let _guard = db.write_guard();
    let comment = Comment {
        id: db.next_id(COMMENT_SEQUENCE)?,
        post_id,
        author_id: author_id.to_string(),
        text: input.text,
        created: now,
    };
    db.set_json(&comment_key(comment.id), &comment)?;
    db.list_push_front(&post_comments_key(post_id), comment.id)?;
    db.list_push_front(&author_comments_key(author_id), comment.id)?;

    tracing::info!(comment_id = comment.id, post_id, "comment added");
    Ok(comment)
}

pub fn delete_comment(db: &Db, comment_id: u64) -> Result<()> {
    let _guard = db.write_guard();
    if let Some(comment) = db.get_json::<Comment>(&comment_key(comment_id))? {
        delete_comment_unlocked(db, &comment)?;
    }
    Ok(())
}

/// Comments of a post, newest first.
pub fn list_comments(db: &Db, post_id: u64) -> Result<Vec<Comment>> {
    let mut comments = Vec::new();
    for id in db.get_list::<u64>(&post_comments_key(post_id))? {
        if let Some(comment) = db.get_json::<Comment>(&comment_key(id))? {
            comments.push(comment);
        }
    }
    comments.sort_by(|a, b| b.created.cmp(&a.created).then(b.id.cmp(&a.id)));
    Ok(comments)
}

// === Joined views of posts ===

#[derive(Debug, Clone, Serialize)]
pub struct AuthorRef {
    pub username: String,
    pub full_name: String,
    pub url: String,
}

impl From<&User> for AuthorRef {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            full_name: user.full_name(),
            url: profile_url(&user.username),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupRef {
    pub title: String,
    pub slug: String,
    pub url: String,
}

impl From<&Group> for GroupRef {
    fn from(group: &Group) -> Self {
        Self {
            title: group.title.clone(),
            slug: group.slug.clone(),
            url: group_url(&group.slug),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PostCard {
    pub id: u64,
    pub text: String,
    pub pub_date: DateTime<Utc>,
    pub author: AuthorRef,
    pub group: Option<GroupRef>,
    pub image_url: Option<String>,
    pub url: String,
}

/// Resolves authors and groups for a batch of posts, loading each distinct
/// one once.
struct Joiner<'a> {
    db: &'a Db,
    authors: HashMap<String, AuthorRef>,
    groups: HashMap<u64, Option<GroupRef>>,
}

impl<'a> Joiner<'a> {
    fn new(db: &'a Db) -> Self {
        Self {
            db,
            authors: HashMap::new(),
            groups: HashMap::new(),
        }
    }

    fn author(&mut self, user_id: &str) -> Result<AuthorRef> {
        if let Some(author) = self.authors.get(user_id) {
            return Ok(author.clone());
        }
        let user = users::get_user(self.db, user_id)?
            .ok_or_else(|| anyhow::anyhow!("author {} is missing", user_id))?;
        let author = AuthorRef::from(&user);
        self.authors.insert(user_id.to_string(), author.clone());
        Ok(author)
    }

    fn group(&mut self, group_id: u64) -> Result<Option<GroupRef>> {
        if let Some(group) = self.groups.get(&group_id) {
            return Ok(group.clone());
        }
        let group = groups::get_group(self.db, group_id)?.as_ref().map(GroupRef::from);
        self.groups.insert(group_id, group.clone());
        Ok(group)
    }

    fn card(&mut self, post: Post) -> Result<PostCard> {
        let author = self.author(&post.author_id)?;
        let group = match post.group_id {
            Some(id) => self.group(id)?,
            None => None,
        };
        Ok(PostCard {
            id: post.id,
            url: post_detail_url(post.id),
            image_url: post.image.as_deref().map(media_url),
            text: post.text,
            pub_date: post.pub_date,
            author,
            group,
        })
    }
}

// === Listings ===

/// Settings shared by every paginated post listing.
#[derive(Debug, Clone, Copy)]
pub struct ListingConfig {
    pub page_size: usize,
    pub context_object_name: &'static str,
}

pub const LISTING: ListingConfig = ListingConfig {
    page_size: POSTS_PER_PAGE,
    context_object_name: "posts",
};

/// What sits above the post list on each listing page.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ListingHeader {
    Index {},
    Follow {},
    Group { group: Group },
    Profile(ProfileInfo),
}

#[derive(Debug, Serialize)]
pub struct ProfileInfo {
    pub author: AuthorRef,
    pub following: bool,
    pub is_self: bool,
    pub post_count: usize,
    pub followers_count: usize,
    pub following_count: usize,
}

pub struct ListingContext {
    pub config: ListingConfig,
    pub title: String,
    pub header: ListingHeader,
    pub page: Page<PostCard>,
}

fn page_request(rc: &RequestContext) -> Result<PageRequest> {
    let query = parse_query_params(&full_path(rc.req));
    PageRequest::parse(query.get("page").map(String::as_str))
}

/// One page of an id index kept newest first.
fn page_of_ids(rc: &RequestContext, ids: Vec<u64>, config: &ListingConfig) -> Result<Page<PostCard>> {
    let page = paginate(ids, &page_request(rc)?, config.page_size)?;
    let mut joiner = Joiner::new(rc.db());
    page.try_map(|id| joiner.card(load_indexed(rc.db(), id)?))
}

fn render_index(rc: &RequestContext, config: &ListingConfig) -> Result<Response> {
    let ids = rc.db().get_list::<u64>(POSTS_INDEX_KEY)?;
    let ctx = ListingContext {
        config: *config,
        title: "Последние обновления на сайте".to_string(),
        header: ListingHeader::Index {},
        page: page_of_ids(rc, ids, config)?,
    };
    templates::render_listing(rc, &ctx)
}

/// Home page, behind the response cache. Entries are per viewer, per
/// representation and per page; other query parameters share an entry.
pub fn index(rc: &RequestContext) -> Result<Response> {
    let json = wants_json(rc.req);
    let page = match page_request(rc)? {
        PageRequest::Number(n) => n.to_string(),
        PageRequest::Last => "last".to_string(),
    };
    let key = format!(
        "{}:{}:{}:page={}",
        INDEX_CACHE_PREFIX,
        rc.viewer().map(|v| v.id.as_str()).unwrap_or("anon"),
        if json { "json" } else { "html" },
        page
    );

    let body = rc.app.cache.get_or_compute(
        &key,
        Duration::seconds(INDEX_CACHE_TTL_SECS),
        &mut || {
            let resp = render_index(rc, &LISTING)?;
            let cacheable = resp.status() == StatusCode::OK;
            Ok((resp.into_body(), cacheable))
        },
    )?;

    let content_type = if json {
        "application/json"
    } else {
        "text/html; charset=utf-8"
    };
    Ok(response(StatusCode::OK, content_type, body))
}

pub fn group_posts(rc: &RequestContext, slug: &str) -> Result<Response> {
    let group = groups::get_by_slug(rc.db(), slug)?;
    let ids = rc.db().get_list::<u64>(&group_posts_key(group.id))?;
    let ctx = ListingContext {
        config: LISTING,
        title: format!("Записи сообщества {}", group.title),
        page: page_of_ids(rc, ids, &LISTING)?,
        header: ListingHeader::Group { group },
    };
    templates::render_listing(rc, &ctx)
}

pub fn profile(rc: &RequestContext, username: &str) -> Result<Response> {
    let db = rc.db();
    let author = users::get_by_username(db, username)?;
    let ids = db.get_list::<u64>(&author_posts_key(&author.id))?;

    let following = match rc.viewer() {
        Some(viewer) => follow::is_following(db, &viewer.id, &author.id)?,
        None => false,
    };
    let info = ProfileInfo {
        author: AuthorRef::from(&author),
        following,
        is_self: rc.is_viewer(&author.id),
        post_count: ids.len(),
        followers_count: follow::get_followers(db, &author.id)?.len(),
        following_count: follow::get_followings(db, &author.id)?.len(),
    };

    let ctx = ListingContext {
        config: LISTING,
        title: format!("Профайл пользователя {}", author.full_name()),
        header: ListingHeader::Profile(info),
        page: page_of_ids(rc, ids, &LISTING)?,
    };
    templates::render_listing(rc, &ctx)
}

/// Posts of every author the viewer follows.
pub fn follow_index(rc: &RequestContext) -> Result<Response> {
    let Some(viewer) = rc.viewer() else {
        return Ok(redirect_to_login(rc.req));
    };
    let db = rc.db();

    let mut feeds = Vec::new();
    for author_id in follow::get_followings(db, &viewer.id)? {
        feeds.push(db.get_list::<u64>(&author_posts_key(&author_id))?);
    }
    let count = feeds.iter().map(Vec::len).sum();

    let page = paginate_with(count, &page_request(rc)?, LISTING.page_size, |offset, limit| {
        let posts = merge_newest_first(db, &feeds, offset + limit)?;
        Ok(posts.into_iter().skip(offset).collect())
    })?;
    let mut joiner = Joiner::new(db);
    let ctx = ListingContext {
        config: LISTING,
        title: "Избранные авторы".to_string(),
        header: ListingHeader::Follow {},
        page: page.try_map(|post| joiner.card(post))?,
    };
    templates::render_listing(rc, &ctx)
}

// === Detail ===

#[derive(Debug, Serialize)]
pub struct CommentView {
    pub id: u64,
    pub text: String,
    pub created: DateTime<Utc>,
    pub author: AuthorRef,
}

#[derive(Debug, Serialize)]
pub struct PostDetailContext {
    pub post: PostCard,
    pub author_post_count: usize,
    pub can_edit: bool,
    pub comments: Vec<CommentView>,
    /// Present only for authenticated viewers.
    pub comment_form: Option<BoundForm>,
}

fn detail_context(rc: &RequestContext, post: Post, comment_form: Option<BoundForm>) -> Result<PostDetailContext> {
    let db = rc.db();
    let mut joiner = Joiner::new(db);

    let author_post_count = db.get_list::<u64>(&author_posts_key(&post.author_id))?.len();
    let can_edit = rc.is_viewer(&post.author_id);
    let mut comments = Vec::new();
    for comment in list_comments(db, post.id)? {
        comments.push(CommentView {
            author: joiner.author(&comment.author_id)?,
            id: comment.id,
            text: comment.text,
            created: comment.created,
        });
    }

    Ok(PostDetailContext {
        post: joiner.card(post)?,
        author_post_count,
        can_edit,
        comments,
        comment_form: comment_form.or_else(|| rc.viewer().map(|_| BoundForm::default())),
    })
}

pub fn post_detail(rc: &RequestContext, post_id: u64) -> Result<Response> {
    let post = require_post(rc.db(), post_id)?;
    let ctx = detail_context(rc, post, None)?;
    templates::render_post_detail(rc, &ctx)
}

// === Create / edit ===

#[derive(Debug, Serialize)]
pub struct PostFormContext {
    pub is_edit: bool,
    pub post_id: Option<u64>,
    pub current_image: Option<String>,
    pub groups: Vec<Group>,
    pub form: BoundForm,
}

pub fn post_create(rc: &RequestContext) -> Result<Response> {
    let Some(viewer) = rc.viewer() else {
        return Ok(redirect_to_login(rc.req));
    };

    let form = if rc.req.method() == Method::POST {
        let data = forms::parse_form(rc.req)?;
        match forms::validate_post_form(rc.db(), &data)? {
            Ok(input) => {
                create_post(rc.db(), &viewer.id, input, rc.app.clock.now())?;
                return Ok(redirect(&profile_url(&viewer.username)));
            }
            Err(bound) => bound,
        }
    } else {
        BoundForm::default()
    };

    let ctx = PostFormContext {
        is_edit: false,
        post_id: None,
        current_image: None,
        groups: groups::list_groups(rc.db())?,
        form,
    };
    templates::render_post_form(rc, &ctx)
}

pub fn post_edit(rc: &RequestContext, post_id: u64) -> Result<Response> {
    if rc.viewer().is_none() {
        return Ok(redirect_to_login(rc.req));
    }
    let post = require_post(rc.db(), post_id)?;
    if !rc.is_viewer(&post.author_id) {
        tracing::debug!(post_id, "edit by non-author redirected");
        return Ok(redirect(&post_detail_url(post_id)));
    }

    let form = if rc.req.method() == Method::POST {
        let data = forms::parse_form(rc.req)?;
        match forms::validate_post_form(rc.db(), &data)? {
            Ok(input) => {
                update_post(rc.db(), post_id, input, rc.app.clock.now())?;
                return Ok(redirect(&post_detail_url(post_id)));
            }
            Err(bound) => bound,
        }
    } else {
        let mut values = BTreeMap::new();
        values.insert("text".to_string(), post.text.clone());
        values.insert(
            "group".to_string(),
            post.group_id.map(|g| g.to_string()).unwrap_or_default(),
        );
        BoundForm {
            values,
            ..BoundForm::default()
        }
    };

    let ctx = PostFormContext {
        is_edit: true,
        post_id: Some(post_id),
        current_image: post.image.as_deref().map(media_url),
        groups: groups::list_groups(rc.db())?,
        form,
    };
    templates::render_post_form(rc, &ctx)
}

// === Comments ===

pub fn add_comment(rc: &RequestContext, post_id: u64) -> Result<Response> {
    let Some(viewer) = rc.viewer() else {
        return Ok(redirect_to_login(rc.req));
    };
    allow(rc.req.method(), POST_ONLY)?;
    let post = require_post(rc.db(), post_id)?;

    let data = forms::parse_form(rc.req)?;
    match forms::validate_comment_form(&data) {
        Ok(input) => {
            create_comment(rc.db(), post_id, &viewer.id, input, rc.app.clock.now())?;
            Ok(redirect(&post_detail_url(post_id)))
        }
        Err(bound) => {
            let ctx = detail_context(rc, post, Some(bound))?;
            templates::render_post_detail(rc, &ctx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AppContext;
    use crate::core::helpers::{Clock, ManualClock, Request};
    use crate::config::Settings;
    use std::sync::Arc;

    fn input(text: &str) -> PostInput {
        PostInput {
            text: text.to_string(),
            group_id: None,
            image: None,
        }
    }

    fn author(db: &Db, username: &str) -> User {
        let user = User::new(username, "", Utc::now());
        users::insert_user(db, &user).unwrap();
        user
    }

    fn get(uri: &str) -> Request {
        http::Request::builder().uri(uri).body(Vec::new()).unwrap()
    }

    fn get_json(uri: &str) -> Request {
        http::Request::builder()
            .uri(uri)
            .header("Accept", "application/json")
            .body(Vec::new())
            .unwrap()
    }

    fn body_json(resp: Response) -> serde_json::Value {
        serde_json::from_slice(resp.body()).unwrap()
    }

    #[test]
    fn merge_interleaves_feeds_newest_first() {
        let db = Db::in_memory();
        let start = Utc::now();
        let mut feeds = vec![Vec::new(), Vec::new()];
        for i in 0..6i64 {
            let author = if i % 2 == 0 { "a" } else { "b" };
            let post = create_post(&db, author, input("пост из ленты"), start + Duration::seconds(i)).unwrap();
            feeds[(i % 2) as usize].insert(0, post.id);
        }
        let tied = create_post(&db, "a", input("пост в ту же секунду"), start + Duration::seconds(5)).unwrap();
        feeds[0].insert(0, tied.id);

        let ids: Vec<u64> = merge_newest_first(&db, &feeds, 4)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![tied.id, 6, 5, 4]);
        assert_eq!(merge_newest_first(&db, &feeds, 100).unwrap().len(), 7);
        assert!(merge_newest_first(&db, &[], 10).unwrap().is_empty());
    }

    #[test]
    fn edit_moves_post_between_groups() {
        let db = Db::in_memory();
        let bears = groups::create_group(&db, "Bears", "bear", "").unwrap();
        let cats = groups::create_group(&db, "Cats", "cat", "").unwrap();
        let post = create_post(
            &db,
            "u",
            PostInput {
                group_id: Some(bears.id),
                ..input("пост про медведей")
            },
            Utc::now(),
        )
        .unwrap();

        update_post(
            &db,
            post.id,
            PostInput {
                group_id: Some(cats.id),
                ..input("теперь про котов")
            },
            Utc::now(),
        )
        .unwrap();

        assert!(db.get_list::<u64>(&group_posts_key(bears.id)).unwrap().is_empty());
        assert_eq!(db.get_list::<u64>(&group_posts_key(cats.id)).unwrap(), vec![post.id]);
        assert_eq!(require_post(&db, post.id).unwrap().text, "теперь про котов");
    }

    #[test]
    fn clashing_image_names_get_a_suffix() {
        let db = Db::in_memory();
        let upload = ImageUpload {
            name: "../cat.png".to_string(),
            data: forms::tiny_png(),
        };
        let first = store_image(&db, &upload).unwrap();
        let second = store_image(&db, &upload).unwrap();
        assert_eq!(first, "posts/cat.png");
        assert_ne!(first, second);
        assert!(second.starts_with("posts/cat_") && second.ends_with(".png"));
    }

    #[test]
    fn deleting_post_cascades_to_comments() {
        let db = Db::in_memory();
        let post = create_post(&db, "u", input("пост с комментарием"), Utc::now()).unwrap();
        let comment = create_comment(
            &db,
            post.id,
            "c",
            CommentInput {
                text: "комментарий".to_string(),
            },
            Utc::now(),
        )
        .unwrap();

        delete_post(&db, post.id).unwrap();
        assert!(get_post(&db, post.id).unwrap().is_none());
        assert!(!db.exists(&comment_key(comment.id)).unwrap());
        assert!(db.get_list::<u64>(&author_comments_key("c")).unwrap().is_empty());
        assert!(db.get_list::<u64>(POSTS_INDEX_KEY).unwrap().is_empty());
    }

    #[test]
    fn joiner_loads_each_author_once() {
        let db = Db::in_memory();
        let user = author(&db, "leo");
        let mut joiner = Joiner::new(&db);
        let first = joiner.card(create_post(&db, &user.id, input("первый пост"), Utc::now()).unwrap()).unwrap();

        // A second card still resolves after the user record is gone.
        db.delete(&user_key(&user.id)).unwrap();
        let second = joiner.card(create_post(&db, &user.id, input("второй пост"), Utc::now()).unwrap()).unwrap();
        assert_eq!(first.author.username, "leo");
        assert_eq!(second.author.username, "leo");
    }

    #[test]
    fn listing_json_uses_context_object_name() {
        let app = AppContext::in_memory();
        let user = author(&app.db, "leo");
        for i in 0..15 {
            create_post(&app.db, &user.id, input(&format!("тестовый пост {}", i)), Utc::now()).unwrap();
        }
        let req = get_json("/profile/leo/?page=2");
        let rc = RequestContext {
            app: &app,
            req: &req,
            viewer: None,
        };
        let value = body_json(profile(&rc, "leo").unwrap());
        assert_eq!(value["posts"].as_array().unwrap().len(), 5);
        assert_eq!(value["page"]["number"], 2);
        assert_eq!(value["post_count"], 15);
        assert_eq!(value["following"], false);
    }

    #[test]
    fn detail_offers_comment_form_only_to_viewers() {
        let app = AppContext::in_memory();
        let user = author(&app.db, "leo");
        let post = create_post(&app.db, &user.id, input("пост для деталей"), Utc::now()).unwrap();
        let req = get_json(&post_detail_url(post.id));

        let anon = RequestContext {
            app: &app,
            req: &req,
            viewer: None,
        };
        assert!(body_json(post_detail(&anon, post.id).unwrap())["comment_form"].is_null());

        let logged_in = RequestContext {
            app: &app,
            req: &req,
            viewer: Some(user),
        };
        let value = body_json(post_detail(&logged_in, post.id).unwrap());
        assert!(value["comment_form"].is_object());
        assert_eq!(value["can_edit"], true);
    }

    #[test]
    fn index_serves_cached_bytes_until_ttl() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let app = AppContext::with_clock(Db::in_memory(), Settings::default(), clock.clone());
        let user = author(&app.db, "leo");
        let post = create_post(&app.db, &user.id, input("исходный текст"), clock.now()).unwrap();

        let req = get("/");
        let rc = RequestContext {
            app: &app,
            req: &req,
            viewer: None,
        };
        let first = index(&rc).unwrap();
        assert!(String::from_utf8_lossy(first.body()).contains("исходный текст"));

        update_post(&app.db, post.id, input("изменённый текст"), clock.now()).unwrap();
        let cached = index(&rc).unwrap();
        assert_eq!(cached.body(), first.body());

        clock.advance(Duration::seconds(INDEX_CACHE_TTL_SECS));
        let fresh = index(&rc).unwrap();
        assert!(String::from_utf8_lossy(fresh.body()).contains("изменённый текст"));
    }

    #[test]
    fn unrelated_query_parameters_share_one_cache_entry() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let app = AppContext::with_clock(Db::in_memory(), Settings::default(), clock.clone());
        let cached = || app.db.keys_with_prefix(CACHE_KEY_PREFIX).unwrap().len();

        for i in 0..100 {
            let req = get(&format!("/?x={}", i));
            let rc = RequestContext {
                app: &app,
                req: &req,
                viewer: None,
            };
            index(&rc).unwrap();
        }
        assert_eq!(cached(), 1);

        clock.advance(Duration::hours(1));
        let req = get("/?page=1");
        let rc = RequestContext {
            app: &app,
            req: &req,
            viewer: None,
        };
        index(&rc).unwrap();
        assert_eq!(cached(), 1);
    }

    #[test]
    fn out_of_range_page_is_not_found() {
        let app = AppContext::in_memory();
        let req = get("/?page=2");
        let rc = RequestContext {
            app: &app,
            req: &req,
            viewer: None,
        };
        assert!(matches!(index(&rc), Err(AppError::NotFound(_))));

        let req = get("/?page=");
        let rc = RequestContext {
            app: &app,
            req: &req,
            viewer: None,
        };
        assert_eq!(index(&rc).unwrap().status(), StatusCode::OK);
    }
}

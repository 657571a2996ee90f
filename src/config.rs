use serde::Deserialize;

// === Listing / validation ===
pub const POSTS_PER_PAGE: usize = 10;
pub const MIN_TEXT_LENGTH: usize = 10;
pub const POST_PREVIEW_LENGTH: usize = 15;

// === Home page cache ===
pub const INDEX_CACHE_PREFIX: &str = "index_page";
pub const INDEX_CACHE_TTL_SECS: i64 = 20;
pub const CACHE_MAX_ENTRIES: usize = 300;

// === Identity ===
pub const SESSION_COOKIE: &str = "sessionid";
pub const LOGIN_URL: &str = "/auth/login/";
pub const MAX_USERNAME_LENGTH: usize = 150;
pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const UNUSABLE_PASSWORD: &str = "!";

// === Storage key layout ===
pub const USERS_LIST_KEY: &str = "users_list";
pub const GROUPS_LIST_KEY: &str = "groups_list";
pub const POSTS_INDEX_KEY: &str = "feed";
pub const CACHE_KEY_PREFIX: &str = "cache:";
pub const POST_SEQUENCE: &str = "post";
pub const COMMENT_SEQUENCE: &str = "comment";
pub const GROUP_SEQUENCE: &str = "group";

pub fn user_key(id: &str) -> String {
    format!("user:{}", id)
}

pub fn username_key(username: &str) -> String {
    format!("username:{}", username)
}

pub fn token_key(token: &str) -> String {
    format!("token:{}", token)
}

pub fn user_tokens_key(user_id: &str) -> String {
    format!("tokens:{}", user_id)
}

pub fn post_key(id: u64) -> String {
    format!("post:{}", id)
}

pub fn author_posts_key(user_id: &str) -> String {
    format!("posts_by:{}", user_id)
}

pub fn group_key(id: u64) -> String {
    format!("group:{}", id)
}

pub fn group_slug_key(slug: &str) -> String {
    format!("group_slug:{}", slug)
}

pub fn group_posts_key(group_id: u64) -> String {
    format!("group_posts:{}", group_id)
}

pub fn comment_key(id: u64) -> String {
    format!("comment:{}", id)
}

pub fn post_comments_key(post_id: u64) -> String {
    format!("comments:{}", post_id)
}

pub fn author_comments_key(user_id: &str) -> String {
    format!("comments_by:{}", user_id)
}

pub fn follow_key(user_id: &str, author_id: &str) -> String {
    format!("follow:{}:{}", user_id, author_id)
}

pub fn followings_key(user_id: &str) -> String {
    format!("followings:{}", user_id)
}

pub fn followers_key(author_id: &str) -> String {
    format!("followers:{}", author_id)
}

pub fn media_key(path: &str) -> String {
    format!("media:{}", path)
}

pub fn sequence_key(name: &str) -> String {
    format!("seq:{}", name)
}

// === Runtime settings ===

/// Runtime settings, read from `YATUBE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_token_expiration_hours")]
    pub token_expiration_hours: i64,
    #[serde(default)]
    pub seed_demo_data: bool,
    #[serde(default)]
    pub log_json: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_token_expiration_hours() -> i64 {
    24
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::prefixed("YATUBE_")
            .from_env::<Settings>()
            .map_err(|e| anyhow::anyhow!("Invalid YATUBE_* configuration: {}", e))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            token_expiration_hours: default_token_expiration_hours(),
            seed_demo_data: false,
            log_json: false,
        }
    }
}

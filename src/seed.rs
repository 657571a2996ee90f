//! Demo content for a fresh store.

use crate::context::AppContext;
use crate::core::errors::Result;
use crate::core::helpers::hash_password;
use crate::follow;
use crate::forms::PostInput;
use crate::groups;
use crate::models::models::User;
use crate::posts;
use crate::users;

pub const DEMO_PASSWORD: &str = "test";

fn demo_user(app: &AppContext, username: &str, first_name: &str, last_name: &str) -> Result<User> {
    let mut user = User::new(username, &format!("{}@example.com", username), app.clock.now());
    user.first_name = first_name.to_string();
    user.last_name = last_name.to_string();
    user.password = hash_password(DEMO_PASSWORD)?;
    users::insert_user(&app.db, &user)?;
    Ok(user)
}

fn demo_post(app: &AppContext, author: &User, text: &str, group_id: Option<u64>) -> Result<()> {
    let input = PostInput {
        text: text.to_string(),
        group_id,
        image: None,
    };
    posts::create_post(&app.db, &author.id, input, app.clock.now())?;
    Ok(())
}

/// Create users `test`, `alice` and `bob`, a group and a few posts, with
/// `test` following `bob`. Does nothing once `test` exists.
pub fn seed_demo_data(app: &AppContext) -> Result<()> {
    if users::find_by_username(&app.db, "test")?.is_some() {
        return Ok(());
    }

    let test = demo_user(app, "test", "", "")?;
    let alice = demo_user(app, "alice", "Алиса", "Селезнёва")?;
    let bob = demo_user(app, "bob", "Боб", "Марли")?;
    let cats = groups::create_group(&app.db, "Котики", "cats", "Всё о котиках и их людях")?;

    demo_post(app, &test, "Первая запись тестового пользователя.", None)?;
    demo_post(app, &alice, "Сегодня кот опять спал на клавиатуре.", Some(cats.id))?;
    demo_post(app, &bob, "Новый альбом почти готов, скоро покажу.", None)?;
    demo_post(app, &bob, "Заметки с репетиции: https://example.com/notes", None)?;

    follow::get_or_create_follow(&app.db, &test.id, &bob.id)?;

    tracing::info!("demo data seeded");
    Ok(())
}

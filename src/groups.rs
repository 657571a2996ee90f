use crate::config::*;
use crate::core::db::Db;
use crate::core::errors::{AppError, Result};
use crate::models::models::{Group, Post};

pub fn get_group(db: &Db, id: u64) -> Result<Option<Group>> {
    db.get_json(&group_key(id))
}

pub fn get_by_slug(db: &Db, slug: &str) -> Result<Group> {
    let id = db
        .get_json::<u64>(&group_slug_key(slug))?
        .ok_or_else(|| AppError::not_found(format!("No group {}", slug)))?;
    get_group(db, id)?.ok_or_else(|| AppError::not_found(format!("No group {}", slug)))
}

/// All groups, ordered by title.
pub fn list_groups(db: &Db) -> Result<Vec<Group>> {
    let mut groups = Vec::new();
    for id in db.get_list::<u64>(GROUPS_LIST_KEY)? {
        if let Some(group) = get_group(db, id)? {
            groups.push(group);
        }
    }
    groups.sort_by(|a, b| a.title.cmp(&b.title));
    Ok(groups)
}

pub fn create_group(db: &Db, title: &str, slug: &str, description: &str) -> Result<Group> {
    let valid_slug = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid_slug {
        return Err(AppError::BadRequest(format!("Invalid slug {:?}", slug)));
    }

    let _guard = db.write_guard();
    if db.exists(&group_slug_key(slug))? {
        return Err(AppError::Conflict(format!("Group slug {} exists", slug)));
    }

    let group = Group {
        id: db.next_id(GROUP_SEQUENCE)?,
        title: title.to_string(),
        slug: slug.to_string(),
        description: description.to_string(),
    };
    db.set_json(&group_key(group.id), &group)?;
    db.set_json(&group_slug_key(slug), &group.id)?;
    db.list_push_back(GROUPS_LIST_KEY, group.id)?;

    tracing::info!(slug, "group created");
    Ok(group)
}

/// Delete a group. Its posts stay, with their group reference cleared.
pub fn delete_group(db: &Db, id: u64) -> Result<()> {
    let _guard = db.write_guard();
    let Some(group) = get_group(db, id)? else {
        return Ok(());
    };

    for post_id in db.get_list::<u64>(&group_posts_key(id))? {
        if let Some(mut post) = db.get_json::<Post>(&post_key(post_id))? {
            post.group_id = None;
            db.set_json(&post_key(post_id), &post)?;
        }
    }

    db.delete(&group_posts_key(id))?;
    db.delete(&group_slug_key(&group.slug))?;
    db.delete(&group_key(id))?;
    db.list_remove(GROUPS_LIST_KEY, &id)?;

    tracing::info!(slug = %group.slug, "group deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_are_unique_and_url_safe() {
        let db = Db::in_memory();
        create_group(&db, "Bears", "bear", "").unwrap();
        assert!(matches!(create_group(&db, "Other bears", "bear", ""), Err(AppError::Conflict(_))));
        assert!(matches!(create_group(&db, "Bad", "no spaces", ""), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn groups_list_by_title() {
        let db = Db::in_memory();
        create_group(&db, "Zebras", "zebra", "").unwrap();
        create_group(&db, "Ants", "ant", "").unwrap();
        let titles: Vec<String> = list_groups(&db).unwrap().into_iter().map(|g| g.title).collect();
        assert_eq!(titles, vec!["Ants", "Zebras"]);
    }

    #[test]
    fn deleting_group_keeps_its_posts() {
        let db = Db::in_memory();
        let group = create_group(&db, "Bears", "bear", "").unwrap();
        let post = Post {
            id: 1,
            text: "пост про медведей".to_string(),
            pub_date: chrono::Utc::now(),
            author_id: "u".to_string(),
            group_id: Some(group.id),
            image: None,
        };
        db.set_json(&post_key(post.id), &post).unwrap();
        db.list_push_front(&group_posts_key(group.id), post.id).unwrap();

        delete_group(&db, group.id).unwrap();
        let kept = db.get_json::<Post>(&post_key(post.id)).unwrap().unwrap();
        assert_eq!(kept.group_id, None);
        assert!(matches!(get_by_slug(&db, "bear"), Err(AppError::NotFound(_))));
        assert!(list_groups(&db).unwrap().is_empty());
    }

    #[test]
    fn unknown_slug_is_not_found() {
        let db = Db::in_memory();
        assert!(matches!(get_by_slug(&db, "nope"), Err(AppError::NotFound(_))));
    }
}

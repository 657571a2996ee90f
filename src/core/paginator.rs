use serde::Serialize;

use crate::core::errors::{AppError, Result};

/// Which page a listing request asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    Number(usize),
    Last,
}

impl PageRequest {
    /// A missing or empty `page` parameter means the first page. Anything else
    /// that is not a positive integer or `last` is not-found.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw.map(str::trim) {
            None | Some("") => Ok(PageRequest::Number(1)),
            Some("last") => Ok(PageRequest::Last),
            Some(value) => value
                .parse::<usize>()
                .map(PageRequest::Number)
                .map_err(|_| AppError::not_found(format!("Invalid page ({})", value))),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: usize,
    pub num_pages: usize,
    pub count: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

/// Page position without the items, for contexts that carry items elsewhere.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PageMeta {
    pub number: usize,
    pub num_pages: usize,
    pub count: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

impl<T> Page<T> {
    pub fn meta(&self) -> PageMeta {
        PageMeta {
            number: self.number,
            num_pages: self.num_pages,
            count: self.count,
            has_next: self.has_next,
            has_previous: self.has_previous,
        }
    }

    pub fn try_map<U>(self, f: impl FnMut(T) -> Result<U>) -> Result<Page<U>> {
        Ok(Page {
            items: self.items.into_iter().map(f).collect::<Result<Vec<U>>>()?,
            number: self.number,
            num_pages: self.num_pages,
            count: self.count,
            has_next: self.has_next,
            has_previous: self.has_previous,
        })
    }
}

/// Resolve `request` against `count` items and fetch just that page through
/// `fetch(offset, limit)`. An empty listing still has a (empty) first page.
pub fn paginate_with<T>(
    count: usize,
    request: &PageRequest,
    per_page: usize,
    fetch: impl FnOnce(usize, usize) -> Result<Vec<T>>,
) -> Result<Page<T>> {
    let per_page = per_page.max(1);
    let num_pages = count.div_ceil(per_page).max(1);

    let number = match request {
        PageRequest::Last => num_pages,
        PageRequest::Number(n) => *n,
    };
    if number < 1 {
        return Err(AppError::not_found("That page number is less than 1"));
    }
    if number > num_pages {
        return Err(AppError::not_found("That page contains no results"));
    }

    Ok(Page {
        items: fetch((number - 1) * per_page, per_page)?,
        number,
        num_pages,
        count,
        has_next: number < num_pages,
        has_previous: number > 1,
    })
}

/// Cut one page out of `items`.
pub fn paginate<T>(items: Vec<T>, request: &PageRequest, per_page: usize) -> Result<Page<T>> {
    paginate_with(items.len(), request, per_page, |offset, limit| {
        Ok(items.into_iter().skip(offset).take(limit).collect())
    })
}

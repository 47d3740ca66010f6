//! Page-number pagination for list endpoints.

use serde::Deserialize;
use shared::Page;
use url::form_urlencoded;

use crate::error::AppError;

/// Query parameters accepted by every list endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page_size: i64,
    pub max_page_size: i64,
}

/// The slice of a collection one request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub page: i64,
    pub size: i64,
    pub offset: i64,
}

impl Paging {
    pub fn window(&self, params: &ListParams) -> Result<Window, AppError> {
        let page = params.page.unwrap_or(1);
        if page < 1 {
            return Err(AppError::InvalidPage);
        }
        let size = match params.page_size {
            Some(size) if size > 0 => size.min(self.max_page_size),
            _ => self.page_size,
        };
        // A page whose offset does not fit in an i64 is past any real table
        let offset = (page - 1).checked_mul(size).ok_or(AppError::InvalidPage)?;
        Ok(Window { page, size, offset })
    }

    /// Wrap one page of results. Pages past the end are an error, except
    /// the first page of an empty collection.
    pub fn page<T>(
        &self,
        path: &str,
        params: &ListParams,
        window: Window,
        count: i64,
        results: Vec<T>,
    ) -> Result<Page<T>, AppError> {
        if window.page > 1 && window.offset >= count {
            return Err(AppError::InvalidPage);
        }

        let link = |page: i64| {
            let mut query = form_urlencoded::Serializer::new(String::new());
            query.append_pair("page", &page.to_string());
            if params.page_size.is_some() {
                query.append_pair("page_size", &window.size.to_string());
            }
            if let Some(search) = &params.search {
                query.append_pair("search", search);
            }
            format!("{}?{}", path, query.finish())
        };

        let has_next = window.offset.saturating_add(window.size) < count;
        Ok(Page {
            count,
            next: has_next.then(|| link(window.page + 1)),
            previous: (window.page > 1).then(|| link(window.page - 1)),
            results,
        })
    }
}

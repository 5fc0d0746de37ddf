//! Page request/result model shared by every paginated resource.
//!
//! Keyset pagination only: a page is resumed from a [`Cursor`], never from an
//! offset, so results stay stable under concurrent inserts and deletes.

use crate::cursor::Cursor;

/// Server-enforced page size, clamped regardless of client input.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageLimit(u32);

impl PageLimit {
    pub const MAX: u32 = 100;
    pub const DEFAULT: u32 = 20;

    /// Clamp a requested limit into `1..=MAX`; `None` takes the default.
    pub fn new(requested: Option<u32>) -> Self {
        Self(requested.unwrap_or(Self::DEFAULT).clamp(1, Self::MAX))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Rows to fetch: one past the page size, to learn whether more exist
    /// without a second query.
    pub fn fetch_size(self) -> i64 {
        i64::from(self.0) + 1
    }
}

impl Default for PageLimit {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

/// Comparison operator of a validated filter triple.
///
/// The closed set of operators the query layer will render; anything a client
/// sends that does not map onto one of these is rejected before query
/// construction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gte,
    Lte,
    Contains,
}

impl FilterOp {
    /// SQL comparison fragment; `Contains` binds an `ILIKE` pattern.
    pub fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Contains => "ILIKE",
        }
    }
}

/// One page of results plus continuation state.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    /// Present iff `has_more`; opaque token for the next call.
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl<T> PageResult<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }

    /// Assemble a page from up to `limit + 1` fetched rows.
    ///
    /// The extra row, when present, only signals continuation: it is dropped
    /// and the cursor is minted from the last row actually returned.
    pub fn assemble(mut rows: Vec<T>, limit: PageLimit, make_cursor: impl Fn(&T) -> Cursor) -> Self {
        let limit = limit.get() as usize;
        let has_more = rows.len() > limit;
        if has_more {
            rows.truncate(limit);
        }
        let next_cursor = if has_more {
            rows.last().map(|row| make_cursor(row).encode())
        } else {
            None
        };
        Self {
            items: rows,
            next_cursor,
            has_more,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PageResult<U> {
        PageResult {
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
            has_more: self.has_more,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{SortDirection, SortValue};
    use uuid::Uuid;

    fn cursor_for(n: &i64) -> Cursor {
        Cursor::new(SortValue::Integer(*n), Uuid::nil(), SortDirection::Asc)
    }

    #[test]
    fn limit_clamps_both_ends() {
        assert_eq!(PageLimit::new(None).get(), 20);
        assert_eq!(PageLimit::new(Some(0)).get(), 1);
        assert_eq!(PageLimit::new(Some(55)).get(), 55);
        assert_eq!(PageLimit::new(Some(10_000)).get(), 100);
    }

    #[test]
    fn fetch_size_is_limit_plus_one() {
        assert_eq!(PageLimit::new(Some(20)).fetch_size(), 21);
    }

    #[test]
    fn assemble_full_page_drops_sentinel_row_and_mints_cursor() {
        let rows: Vec<i64> = (0..21).collect();
        let page = PageResult::assemble(rows, PageLimit::new(Some(20)), cursor_for);

        assert_eq!(page.items.len(), 20);
        assert_eq!(*page.items.last().unwrap(), 19);
        assert!(page.has_more);
        let cursor = Cursor::decode(page.next_cursor.as_deref().unwrap()).unwrap();
        assert_eq!(cursor.sort_value, SortValue::Integer(19));
    }

    #[test]
    fn assemble_short_page_has_no_cursor() {
        let rows: Vec<i64> = (0..5).collect();
        let page = PageResult::assemble(rows, PageLimit::new(Some(20)), cursor_for);

        assert_eq!(page.items.len(), 5);
        assert!(!page.has_more);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn assemble_exact_page_has_no_cursor() {
        let rows: Vec<i64> = (0..20).collect();
        let page = PageResult::assemble(rows, PageLimit::new(Some(20)), cursor_for);

        assert_eq!(page.items.len(), 20);
        assert!(!page.has_more);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn empty_page_invariant() {
        let page = PageResult::<i64>::empty();
        assert!(page.items.is_empty());
        assert!(!page.has_more);
        assert!(page.next_cursor.is_none());
    }
}

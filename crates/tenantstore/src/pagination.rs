//! Bidirectional keyset pagination.
//!
//! [`run`] turns a page request (limit, order, optional `next` / `prev`
//! cursor) into a single [`QueryInput`] for a backend-supplied fetch
//! callback, then builds the cursors for the returned page.
//!
//! Backward traversal is expressed as forward traversal of the reversed
//! order: walking back from a cursor flips both the comparison operator and
//! the sort direction, and the fetched rows are reversed into the caller's
//! order afterwards. Backends therefore implement exactly one query shape:
//! "rows strictly beyond `cursor_pos` under `compare`, sorted by `sort`,
//! at most `limit` of them".
//!
//! The callback is asked for one row more than the page size. Its presence
//! tells the engine whether another page exists without a second query.
//!
//! # Cursor rules
//!
//! | Page | `prev` | `next` |
//! |------|--------|--------|
//! | first | never | if more rows follow |
//! | reached via `next` | always | if more rows follow |
//! | reached via `prev` | if more rows precede | always |

use std::{fmt, future::Future, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::TenantStoreError;

/// Sort order of a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest first.
    Asc,
    /// Newest first.
    #[default]
    Desc,
}

impl SortOrder {
    /// The opposite order.
    #[must_use]
    pub fn flip(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }

    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = TenantStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(TenantStoreError::InvalidOrder),
        }
    }
}

/// Traversal direction, derived from which cursor is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// First page or following a `next` cursor.
    Forward,
    /// Following a `prev` cursor.
    Backward,
}

/// How rows compare against the cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Rows whose sort key is strictly less than the cursor.
    LessThan,
    /// Rows whose sort key is strictly greater than the cursor.
    GreaterThan,
}

impl Comparison {
    /// Returns `true` if `value` lies beyond `cursor` under this comparison.
    #[must_use]
    pub fn admits<K: Ord>(self, value: &K, cursor: &K) -> bool {
        match self {
            Self::LessThan => value < cursor,
            Self::GreaterThan => value > cursor,
        }
    }
}

/// Parameters handed to the fetch callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryInput {
    /// Maximum number of rows to return (page size plus one).
    pub limit: usize,
    /// Filter relative to `cursor_pos`.
    pub compare: Comparison,
    /// Sort order of the query, which is the reverse of the requested order
    /// when walking backward.
    pub sort: SortOrder,
    /// Decoded cursor position, `None` on the first page.
    pub cursor_pos: Option<String>,
}

/// A page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Page size. Must be positive.
    pub limit: usize,
    /// Requested order.
    pub order: SortOrder,
    /// Cursor from a previous page's `next`.
    pub next: Option<String>,
    /// Cursor from a previous page's `prev`.
    pub prev: Option<String>,
}

impl PageRequest {
    /// A first-page request.
    #[must_use]
    pub fn first(limit: usize, order: SortOrder) -> Self {
        Self { limit, order, next: None, prev: None }
    }

    fn next_cursor(&self) -> Option<&str> {
        self.next.as_deref().filter(|c| !c.is_empty())
    }

    fn prev_cursor(&self) -> Option<&str> {
        self.prev.as_deref().filter(|c| !c.is_empty())
    }

    /// Direction implied by the cursors: backward iff `prev` is set.
    #[must_use]
    pub fn direction(&self) -> Direction {
        if self.prev_cursor().is_some() { Direction::Backward } else { Direction::Forward }
    }
}

/// A page of results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Rows in the requested order.
    pub items: Vec<T>,
    /// Cursor to the following page.
    pub next: Option<String>,
    /// Cursor to the preceding page.
    pub prev: Option<String>,
}

/// Converts between rows and opaque cursors.
pub trait CursorCodec<T> {
    /// Error produced by [`decode`](Self::decode).
    type Error;

    /// Encodes the position of `item`.
    fn encode(&self, item: &T) -> String;

    /// Decodes a cursor into the position handed to the fetch callback.
    ///
    /// # Errors
    ///
    /// Returns an error if the cursor is malformed.
    fn decode(&self, cursor: &str) -> Result<String, Self::Error>;
}

/// Computes the query parameters for a request.
///
/// Descending-forward and ascending-backward both look for smaller keys.
#[must_use]
pub fn query_shape(order: SortOrder, direction: Direction) -> (Comparison, SortOrder) {
    let backward = direction == Direction::Backward;
    let compare = if (order == SortOrder::Desc) != backward {
        Comparison::LessThan
    } else {
        Comparison::GreaterThan
    };
    let sort = if backward { order.flip() } else { order };
    (compare, sort)
}

/// Executes one paginated query.
///
/// When both cursors are present, `next` supplies the position and `prev`
/// the direction; callers that must reject that combination check before
/// calling.
///
/// # Errors
///
/// Returns the codec's error for an undecodable cursor and the fetch
/// callback's error unchanged.
pub async fn run<T, C, F, Fut, E>(request: PageRequest, codec: &C, fetch: F) -> Result<Page<T>, E>
where
    C: CursorCodec<T>,
    E: From<C::Error>,
    F: FnOnce(QueryInput) -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
{
    let direction = request.direction();
    let first_page = request.next_cursor().is_none() && request.prev_cursor().is_none();

    let cursor_pos = match request.next_cursor().or_else(|| request.prev_cursor()) {
        Some(cursor) => Some(codec.decode(cursor)?),
        None => None,
    };

    let (compare, sort) = query_shape(request.order, direction);
    let limit = request.limit;
    let mut items = fetch(QueryInput { limit: limit + 1, compare, sort, cursor_pos }).await?;

    let has_more = items.len() > limit;
    items.truncate(limit);
    if direction == Direction::Backward {
        items.reverse();
    }

    let (mut next, mut prev) = (None, None);
    if let (Some(first), Some(last)) = (items.first(), items.last()) {
        match (first_page, direction) {
            (true, _) => {
                if has_more {
                    next = Some(codec.encode(last));
                }
            },
            (false, Direction::Forward) => {
                prev = Some(codec.encode(first));
                if has_more {
                    next = Some(codec.encode(last));
                }
            },
            (false, Direction::Backward) => {
                next = Some(codec.encode(last));
                if has_more {
                    prev = Some(codec.encode(first));
                }
            },
        }
    }

    Ok(Page { items, next, prev })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Test codec over integer rows; the cursor is the decimal key.
    struct IntCodec;

    #[derive(Debug, PartialEq)]
    enum TestError {
        BadCursor,
    }

    impl CursorCodec<i64> for IntCodec {
        type Error = TestError;

        fn encode(&self, item: &i64) -> String {
            format!("c{item}")
        }

        fn decode(&self, cursor: &str) -> Result<String, Self::Error> {
            cursor.strip_prefix('c').map(str::to_string).ok_or(TestError::BadCursor)
        }
    }

    fn fetch_from(rows: &[i64], q: &QueryInput) -> Vec<i64> {
        let cursor = q.cursor_pos.as_ref().map(|c| c.parse::<i64>().unwrap());
        let mut out: Vec<i64> = rows
            .iter()
            .copied()
            .filter(|row| cursor.is_none_or(|c| q.compare.admits(row, &c)))
            .collect();
        out.sort_unstable();
        if q.sort == SortOrder::Desc {
            out.reverse();
        }
        out.truncate(q.limit);
        out
    }

    async fn page(rows: &[i64], request: PageRequest) -> Page<i64> {
        run(request, &IntCodec, |q| {
            let result = fetch_from(rows, &q);
            async move { Ok::<_, TestError>(result) }
        })
        .await
        .unwrap()
    }

    fn req(limit: usize, order: SortOrder, next: Option<String>, prev: Option<String>) -> PageRequest {
        PageRequest { limit, order, next, prev }
    }

    #[test]
    fn test_query_shape() {
        use Comparison::*;
        use Direction::*;
        use SortOrder::*;
        assert_eq!(query_shape(Desc, Forward), (LessThan, Desc));
        assert_eq!(query_shape(Desc, Backward), (GreaterThan, Asc));
        assert_eq!(query_shape(Asc, Forward), (GreaterThan, Asc));
        assert_eq!(query_shape(Asc, Backward), (LessThan, Desc));
    }

    #[test]
    fn test_sort_order_parsing() {
        assert_eq!("asc".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert_eq!("desc".parse::<SortOrder>().unwrap(), SortOrder::Desc);
        assert!(matches!("up".parse::<SortOrder>(), Err(TenantStoreError::InvalidOrder)));
    }

    #[tokio::test]
    async fn test_first_page_has_no_prev() {
        let rows: Vec<i64> = (1..=5).collect();
        let p = page(&rows, PageRequest::first(2, SortOrder::Asc)).await;
        assert_eq!(p.items, vec![1, 2]);
        assert_eq!(p.prev, None);
        assert_eq!(p.next.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn test_single_page_has_no_cursors() {
        let rows: Vec<i64> = (1..=3).collect();
        let p = page(&rows, PageRequest::first(3, SortOrder::Desc)).await;
        assert_eq!(p.items, vec![3, 2, 1]);
        assert_eq!((p.next, p.prev), (None, None));
    }

    #[tokio::test]
    async fn test_empty_result() {
        let p = page(&[], PageRequest::first(10, SortOrder::Desc)).await;
        assert!(p.items.is_empty());
        assert_eq!((p.next, p.prev), (None, None));
    }

    #[tokio::test]
    async fn test_forward_pages_desc() {
        let rows: Vec<i64> = (1..=5).collect();
        let p1 = page(&rows, PageRequest::first(2, SortOrder::Desc)).await;
        assert_eq!(p1.items, vec![5, 4]);
        let p2 = page(&rows, req(2, SortOrder::Desc, p1.next.clone(), None)).await;
        assert_eq!(p2.items, vec![3, 2]);
        assert_eq!(p2.prev.as_deref(), Some("c3"));
        let p3 = page(&rows, req(2, SortOrder::Desc, p2.next.clone(), None)).await;
        assert_eq!(p3.items, vec![1]);
        assert_eq!(p3.next, None);
        assert_eq!(p3.prev.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_exact_boundary_has_no_trailing_page() {
        let rows: Vec<i64> = (1..=4).collect();
        let p1 = page(&rows, PageRequest::first(2, SortOrder::Asc)).await;
        let p2 = page(&rows, req(2, SortOrder::Asc, p1.next, None)).await;
        assert_eq!(p2.items, vec![3, 4]);
        assert_eq!(p2.next, None);
    }

    #[tokio::test]
    async fn test_backward_mirrors_forward() {
        let rows: Vec<i64> = (1..=7).collect();
        let p1 = page(&rows, PageRequest::first(3, SortOrder::Asc)).await;
        let p2 = page(&rows, req(3, SortOrder::Asc, p1.next.clone(), None)).await;
        let back = page(&rows, req(3, SortOrder::Asc, None, p2.prev.clone())).await;
        assert_eq!(back.items, p1.items);
        assert_eq!(back.prev, None);
        assert_eq!(back.next, p1.next);
    }

    #[tokio::test]
    async fn test_empty_string_cursors_mean_first_page() {
        let rows: Vec<i64> = (1..=3).collect();
        let p = page(&rows, req(2, SortOrder::Asc, Some(String::new()), Some(String::new()))).await;
        assert_eq!(p.items, vec![1, 2]);
        assert_eq!(p.prev, None);
    }

    #[tokio::test]
    async fn test_bad_cursor_propagates_codec_error() {
        let result = run(req(2, SortOrder::Asc, Some("zz".into()), None), &IntCodec, |_q| async {
            Ok::<Vec<i64>, TestError>(Vec::new())
        })
        .await;
        assert_eq!(result, Err(TestError::BadCursor));
    }

    #[tokio::test]
    async fn test_fetch_receives_n_plus_one() {
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        let _ = run(PageRequest::first(10, SortOrder::Desc), &IntCodec, move |q| {
            *seen_clone.lock().unwrap() = Some(q);
            async { Ok::<Vec<i64>, TestError>(Vec::new()) }
        })
        .await;
        let q = seen.lock().unwrap().clone().unwrap();
        assert_eq!(q.limit, 11);
        assert_eq!(q.cursor_pos, None);
    }

    #[tokio::test]
    async fn test_insert_during_traversal_does_not_duplicate() {
        let mut rows: Vec<i64> = (10..=50).step_by(10).collect();
        let p1 = page(&rows, PageRequest::first(2, SortOrder::Desc)).await;
        assert_eq!(p1.items, vec![50, 40]);
        // A newer row arrives between page requests.
        rows.push(60);
        let p2 = page(&rows, req(2, SortOrder::Desc, p1.next, None)).await;
        assert_eq!(p2.items, vec![30, 20]);
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        fn runtime() -> tokio::runtime::Runtime {
            tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
        }

        proptest! {
            /// Forward traversal visits every row once; walking back from
            /// every page reproduces its predecessor exactly.
            #[test]
            fn traversal_law(
                keys in proptest::collection::btree_set(0i64..10_000, 0..40),
                limit in 1usize..8,
                desc in any::<bool>(),
            ) {
                let rows: Vec<i64> = keys.iter().copied().collect();
                let order = if desc { SortOrder::Desc } else { SortOrder::Asc };
                runtime().block_on(async {
                    let mut pages = vec![page(&rows, PageRequest::first(limit, order)).await];
                    while let Some(next) = pages.last().and_then(|p| p.next.clone()) {
                        pages.push(page(&rows, req(limit, order, Some(next), None)).await);
                    }

                    let seen: Vec<i64> = pages.iter().flat_map(|p| p.items.clone()).collect();
                    let mut expected = rows.clone();
                    if desc {
                        expected.reverse();
                    }
                    prop_assert_eq!(seen, expected);
                    prop_assert!(pages[0].prev.is_none());
                    prop_assert!(pages.last().is_some_and(|p| p.next.is_none()));

                    for pair in pages.windows(2) {
                        let back = page(&rows, req(limit, order, None, pair[1].prev.clone())).await;
                        prop_assert_eq!(&back.items, &pair[0].items);
                    }
                    Ok(())
                })?;
            }
        }
    }
}

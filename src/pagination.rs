/*!
 * Images Emulator - Keyset Pagination
 *
 * Listing pages are ordered by (uploaded, id), both ascending or both
 * descending. The id breaks ties between equal timestamps so the order is
 * strict, and a cursor naming the last returned pair resumes the scan right
 * after it. Pages never overlap and never skip a record as long as the
 * already-returned key range is not written to between requests.
 *
 * A next cursor is produced only when a page comes back full. A short or
 * empty page means the listing is exhausted.
 */

use std::cmp::Ordering;
use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::model::Image;

/// Default page size of the keyset listing
pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Largest accepted page size
pub const MAX_PAGE_SIZE: usize = 100;
/// Largest number of metadata filters a request may carry
pub const MAX_FILTERS: usize = 5;

/// Listing errors caused by caller input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListError {
    /// The continuation token could not be decoded
    MalformedCursor,
    /// A metadata filter named an operator outside eq/ne/lt/gt/lte/gte
    UnsupportedOperator(String),
    /// More metadata filters than `MAX_FILTERS`
    TooManyFilters(usize),
}

impl fmt::Display for ListError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListError::MalformedCursor => write!(f, "invalid cursor"),
            ListError::UnsupportedOperator(op) => {
                write!(f, "unsupported metadata filter operator: {}", op)
            }
            ListError::TooManyFilters(_) => {
                write!(f, "too many metadata filters (max {})", MAX_FILTERS)
            }
        }
    }
}

impl std::error::Error for ListError {}

/// Sort direction of the (uploaded, id) key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// `desc` in any case selects descending; anything else is ascending.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("desc") {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

/// Position of the last record of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub uploaded: DateTime<Utc>,
    pub id: String,
}

impl Cursor {
    pub fn after(image: &Image) -> Self {
        Self {
            uploaded: image.uploaded,
            id: image.id.clone(),
        }
    }

    /// Opaque token form: base64url of `<rfc3339 nanos>|<id>`.
    pub fn encode(&self) -> String {
        let raw = format!(
            "{}|{}",
            self.uploaded.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.id
        );
        URL_SAFE_NO_PAD.encode(raw)
    }

    /// Decodes a token. An empty token means "from the start".
    pub fn decode(token: &str) -> Result<Option<Self>, ListError> {
        if token.is_empty() {
            return Ok(None);
        }
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| ListError::MalformedCursor)?;
        let raw = String::from_utf8(raw).map_err(|_| ListError::MalformedCursor)?;
        let (uploaded, id) = raw.split_once('|').ok_or(ListError::MalformedCursor)?;
        let uploaded = DateTime::parse_from_rfc3339(uploaded)
            .map_err(|_| ListError::MalformedCursor)?
            .with_timezone(&Utc);
        Ok(Some(Self {
            uploaded,
            id: id.to_string(),
        }))
    }

    /// Compares a record's key with this cursor's key in ascending order.
    fn compare(&self, image: &Image) -> Ordering {
        image
            .uploaded
            .cmp(&self.uploaded)
            .then_with(|| image.id.as_str().cmp(self.id.as_str()))
    }

    /// Whether `image` comes strictly after this cursor in `order`.
    pub fn precedes(&self, image: &Image, order: SortOrder) -> bool {
        order.apply(self.compare(image)) == Ordering::Greater
    }
}

/// Comparison operator of a metadata filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
}

impl FilterOp {
    pub fn parse(op: &str) -> Result<Self, ListError> {
        match op {
            "eq" => Ok(FilterOp::Eq),
            "ne" => Ok(FilterOp::Ne),
            "lt" => Ok(FilterOp::Lt),
            "gt" => Ok(FilterOp::Gt),
            "lte" => Ok(FilterOp::Lte),
            "gte" => Ok(FilterOp::Gte),
            other => Err(ListError::UnsupportedOperator(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Ne => "ne",
            FilterOp::Lt => "lt",
            FilterOp::Gt => "gt",
            FilterOp::Lte => "lte",
            FilterOp::Gte => "gte",
        }
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            FilterOp::Eq => ordering == Ordering::Equal,
            FilterOp::Ne => ordering != Ordering::Equal,
            FilterOp::Lt => ordering == Ordering::Less,
            FilterOp::Gt => ordering == Ordering::Greater,
            FilterOp::Lte => ordering != Ordering::Greater,
            FilterOp::Gte => ordering != Ordering::Less,
        }
    }
}

/// A single `key {op} value` predicate over image metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFilter {
    pub key: String,
    pub op: FilterOp,
    pub value: String,
}

impl MetadataFilter {
    pub fn new(key: &str, op: FilterOp, value: &str) -> Self {
        Self {
            key: key.to_string(),
            op,
            value: value.to_string(),
        }
    }

    /// Images without the key never match, whatever the operator.
    /// Values compare as plain strings.
    pub fn matches(&self, image: &Image) -> bool {
        match image.meta_value(&self.key) {
            Some(stored) => self.op.holds(stored.as_str().cmp(self.value.as_str())),
            None => false,
        }
    }
}

/// Splits `metadata[key][op]` into `(key, op)`. Other names yield `None`.
pub fn parse_filter_param(name: &str) -> Option<(&str, &str)> {
    let rest = name.strip_prefix("metadata[")?;
    let (key, rest) = rest.split_once(']')?;
    let op = rest.strip_prefix('[')?.strip_suffix(']')?;
    Some((key, op))
}

/// Collects metadata filters from decoded query pairs, in query order.
///
/// Only the first value of a repeated parameter counts. Fails on an
/// unsupported operator or on more than `MAX_FILTERS` filters.
pub fn parse_filters<I, K, V>(pairs: I) -> Result<Vec<MetadataFilter>, ListError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut seen: Vec<String> = Vec::new();
    let mut filters = Vec::new();

    for (name, value) in pairs {
        let name = name.as_ref();
        let Some((key, op)) = parse_filter_param(name) else {
            continue;
        };
        let op = FilterOp::parse(op)?;
        if seen.iter().any(|s| s == name) {
            continue;
        }
        seen.push(name.to_string());
        filters.push(MetadataFilter::new(key, op, value.as_ref()));
    }

    if filters.len() > MAX_FILTERS {
        return Err(ListError::TooManyFilters(filters.len()));
    }
    Ok(filters)
}

/// Parameters of one listing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub cursor: Option<Cursor>,
    pub page_size: usize,
    pub order: SortOrder,
    pub filter: Option<MetadataFilter>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            cursor: None,
            page_size: DEFAULT_PAGE_SIZE,
            order: SortOrder::Asc,
            filter: None,
        }
    }
}

impl ListQuery {
    pub fn new(page_size: usize, order: SortOrder) -> Self {
        Self {
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            order,
            ..Default::default()
        }
    }

    pub fn with_cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn with_filter(mut self, filter: Option<MetadataFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// Whether `image` passes the filter and lies after the cursor.
    pub fn admits(&self, image: &Image) -> bool {
        let filtered_in = self.filter.as_ref().map_or(true, |f| f.matches(image));
        let after_cursor = self
            .cursor
            .as_ref()
            .map_or(true, |c| c.precedes(image, self.order));
        filtered_in && after_cursor
    }

    /// Orders two records by (uploaded, id) in this query's direction.
    pub fn compare(&self, a: &Image, b: &Image) -> Ordering {
        self.order.apply(
            a.uploaded
                .cmp(&b.uploaded)
                .then_with(|| a.id.as_str().cmp(b.id.as_str())),
        )
    }
}

/// One page of a keyset listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub images: Vec<Image>,
    pub next_cursor: Option<Cursor>,
}

impl Page {
    /// Builds a page from records already filtered, ordered and limited to
    /// `page_size`. Only a full page carries a cursor.
    pub fn from_ordered(images: Vec<Image>, page_size: usize) -> Self {
        let next_cursor = if !images.is_empty() && images.len() == page_size {
            images.last().map(Cursor::after)
        } else {
            None
        };
        Self {
            images,
            next_cursor,
        }
    }

    /// Token for the next request, empty once the listing is exhausted.
    pub fn continuation_token(&self) -> String {
        self.next_cursor
            .as_ref()
            .map(Cursor::encode)
            .unwrap_or_default()
    }

    pub fn is_exhausted(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Computes the next page over an account's records.
pub fn paginate<'a, I>(records: I, query: &ListQuery) -> Page
where
    I: IntoIterator<Item = &'a Image>,
{
    let mut candidates: Vec<&Image> = records.into_iter().filter(|i| query.admits(i)).collect();
    candidates.sort_by(|a, b| query.compare(a, b));

    let images = candidates
        .into_iter()
        .take(query.page_size)
        .cloned()
        .collect();
    Page::from_ordered(images, query.page_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use std::collections::HashSet;

    fn base_time() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn image(id: &str, offset_secs: i64) -> Image {
        let mut image = Image::new("acct", id, &format!("{}.png", id));
        image.uploaded = base_time() + Duration::seconds(offset_secs);
        image
    }

    fn dataset(count: usize) -> Vec<Image> {
        (0..count)
            .map(|i| image(&format!("img-{:02}", i), i as i64))
            .collect()
    }

    fn drain(records: &[Image], mut query: ListQuery) -> Vec<Vec<String>> {
        let mut pages = Vec::new();
        loop {
            let page = paginate(records, &query);
            pages.push(page.images.iter().map(|i| i.id.clone()).collect());
            match page.next_cursor {
                Some(cursor) => {
                    let token = cursor.encode();
                    query.cursor = Cursor::decode(&token).unwrap();
                }
                None => return pages,
            }
        }
    }

    #[test]
    fn test_twenty_five_records_in_pages_of_ten() {
        let records = dataset(25);
        let first = paginate(&records, &ListQuery::new(10, SortOrder::Asc));
        assert_eq!(first.images.len(), 10);

        let second_query = ListQuery::new(10, SortOrder::Asc).with_cursor(first.next_cursor.clone());
        let second = paginate(&records, &second_query);
        assert_eq!(second.images.len(), 10);

        let third_query = ListQuery::new(10, SortOrder::Asc).with_cursor(second.next_cursor.clone());
        let third = paginate(&records, &third_query);
        assert_eq!(third.images.len(), 5);
        assert!(third.is_exhausted());
        assert_eq!(third.continuation_token(), "");

        // Resuming after the last record of the short page yields nothing
        let last = third.images.last().map(Cursor::after);
        let fourth = paginate(&records, &ListQuery::new(10, SortOrder::Asc).with_cursor(last));
        assert!(fourth.images.is_empty());
        assert_eq!(fourth.continuation_token(), "");

        let ids: HashSet<_> = first
            .images
            .iter()
            .chain(&second.images)
            .chain(&third.images)
            .map(|i| i.id.clone())
            .collect();
        assert_eq!(ids.len(), 25);
    }

    #[test]
    fn test_exact_multiple_ends_with_empty_page() {
        let records = dataset(20);
        let pages = drain(&records, ListQuery::new(10, SortOrder::Asc));
        let sizes: Vec<_> = pages.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 10, 0]);
    }

    #[test]
    fn test_descending_order() {
        let records = dataset(7);
        let pages = drain(&records, ListQuery::new(3, SortOrder::Desc));
        let ids: Vec<String> = pages.into_iter().flatten().collect();
        let expected: Vec<String> = (0..7).rev().map(|i| format!("img-{:02}", i)).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_equal_timestamps_break_ties_by_id() {
        let records: Vec<Image> = ["e", "a", "d", "b", "c", "f", "g"]
            .iter()
            .map(|id| image(id, 0))
            .collect();

        for order in [SortOrder::Asc, SortOrder::Desc] {
            let ids: Vec<String> = drain(&records, ListQuery::new(2, order))
                .into_iter()
                .flatten()
                .collect();
            let mut expected: Vec<String> =
                ["a", "b", "c", "d", "e", "f", "g"].iter().map(|s| s.to_string()).collect();
            if order == SortOrder::Desc {
                expected.reverse();
            }
            assert_eq!(ids, expected);
        }
    }

    #[test]
    fn test_page_size_is_clamped() {
        assert_eq!(ListQuery::new(0, SortOrder::Asc).page_size, 1);
        assert_eq!(ListQuery::new(500, SortOrder::Asc).page_size, MAX_PAGE_SIZE);
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!(SortOrder::parse("DESC"), SortOrder::Desc);
        assert_eq!(SortOrder::parse("desc"), SortOrder::Desc);
        assert_eq!(SortOrder::parse("asc"), SortOrder::Asc);
        assert_eq!(SortOrder::parse("sideways"), SortOrder::Asc);
    }

    #[test]
    fn test_cursor_token_round_trip() {
        let cursor = Cursor {
            uploaded: base_time() + Duration::milliseconds(123),
            id: "with|pipe".to_string(),
        };
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, Some(cursor));
        assert_eq!(Cursor::decode("").unwrap(), None);
    }

    #[test]
    fn test_malformed_cursor() {
        assert_eq!(Cursor::decode("%%%"), Err(ListError::MalformedCursor));
        let no_separator = URL_SAFE_NO_PAD.encode("2024-01-01T00:00:00Z");
        assert_eq!(Cursor::decode(&no_separator), Err(ListError::MalformedCursor));
        let bad_time = URL_SAFE_NO_PAD.encode("yesterday|img-1");
        assert_eq!(Cursor::decode(&bad_time), Err(ListError::MalformedCursor));
    }

    #[test]
    fn test_filter_operator_parse() {
        assert_eq!(FilterOp::parse("gte"), Ok(FilterOp::Gte));
        assert_eq!(
            FilterOp::parse("like"),
            Err(ListError::UnsupportedOperator("like".to_string()))
        );
    }

    #[test]
    fn test_filter_eq_and_ne() {
        let mut records = dataset(6);
        for (i, record) in records.iter_mut().enumerate() {
            match i % 3 {
                0 => {
                    record.meta.insert("color".into(), json!("red"));
                }
                1 => {
                    record.meta.insert("color".into(), json!("blue"));
                }
                _ => {}
            }
        }

        let eq = ListQuery::new(100, SortOrder::Asc)
            .with_filter(Some(MetadataFilter::new("color", FilterOp::Eq, "red")));
        let ids: Vec<_> = paginate(&records, &eq).images.into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["img-00", "img-03"]);

        // ne only considers images that carry the key
        let ne = ListQuery::new(100, SortOrder::Asc)
            .with_filter(Some(MetadataFilter::new("color", FilterOp::Ne, "red")));
        let ids: Vec<_> = paginate(&records, &ne).images.into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["img-01", "img-04"]);
    }

    #[test]
    fn test_filter_compares_lexicographically() {
        let mut records = dataset(3);
        records[0].meta.insert("size".into(), json!(9));
        records[1].meta.insert("size".into(), json!(10));
        records[2].meta.insert("size".into(), json!("2"));

        let gt = ListQuery::new(100, SortOrder::Asc)
            .with_filter(Some(MetadataFilter::new("size", FilterOp::Gt, "5")));
        let ids: Vec<_> = paginate(&records, &gt).images.into_iter().map(|i| i.id).collect();
        // "10" < "5" as strings
        assert_eq!(ids, vec!["img-00"]);

        let lte = ListQuery::new(100, SortOrder::Asc)
            .with_filter(Some(MetadataFilter::new("size", FilterOp::Lte, "2")));
        let ids: Vec<_> = paginate(&records, &lte).images.into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["img-01", "img-02"]);
    }

    #[test]
    fn test_filtered_pagination_has_no_gaps() {
        let mut records = dataset(30);
        for record in records.iter_mut().step_by(2) {
            record.meta.insert("tier".into(), json!("gold"));
        }

        let query = ListQuery::new(4, SortOrder::Desc)
            .with_filter(Some(MetadataFilter::new("tier", FilterOp::Eq, "gold")));
        let pages = drain(&records, query);
        let ids: Vec<String> = pages.into_iter().flatten().collect();

        let expected: Vec<String> = (0..30)
            .rev()
            .filter(|i| i % 2 == 0)
            .map(|i| format!("img-{:02}", i))
            .collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_parse_filter_param() {
        assert_eq!(parse_filter_param("metadata[size][gte]"), Some(("size", "gte")));
        assert_eq!(parse_filter_param("metadata[size]"), None);
        assert_eq!(parse_filter_param("per_page"), None);
    }

    #[test]
    fn test_parse_filters_keeps_query_order() {
        let pairs = vec![
            ("per_page", "10"),
            ("metadata[tier][eq]", "gold"),
            ("metadata[size][lt]", "9"),
            ("metadata[tier][eq]", "silver"),
        ];
        let filters = parse_filters(pairs).unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0], MetadataFilter::new("tier", FilterOp::Eq, "gold"));
        assert_eq!(filters[1].op, FilterOp::Lt);
    }

    #[test]
    fn test_parse_filters_rejects_bad_input() {
        let bad_op = vec![("metadata[tier][like]", "gold")];
        assert_eq!(
            parse_filters(bad_op),
            Err(ListError::UnsupportedOperator("like".to_string()))
        );

        let too_many: Vec<(String, String)> = (0..6)
            .map(|i| (format!("metadata[k{}][eq]", i), "v".to_string()))
            .collect();
        assert_eq!(parse_filters(too_many), Err(ListError::TooManyFilters(6)));
    }
}

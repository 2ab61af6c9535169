//! Client-side search: case-insensitive substring matching over a fixed set
//! of fields per entity, optionally narrowed to one category.

/// Category selector value that disables category filtering.
pub const ALL_CATEGORIES: &str = "All";

pub trait Searchable {
    /// Fields a text query is matched against.
    fn search_fields(&self) -> Vec<&str>;

    fn category(&self) -> Option<&str> {
        None
    }
}

/// True when `query` is blank or occurs in any of `fields`, ignoring case.
pub fn matches_query(fields: &[&str], query: &str) -> bool {
    if query.trim().is_empty() {
        return true;
    }
    let needle = query.to_lowercase();
    fields
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
}

pub fn matches_category<T: Searchable + ?Sized>(item: &T, category: Option<&str>) -> bool {
    match category {
        None => true,
        Some(ALL_CATEGORIES) => true,
        Some(wanted) => item.category() == Some(wanted),
    }
}

/// Items matching both the text query and the category, in their original
/// order.
pub fn filter_items<'a, T: Searchable>(
    items: &'a [T],
    query: &str,
    category: Option<&str>,
) -> Vec<&'a T> {
    items
        .iter()
        .filter(|item| matches_category(*item, category))
        .filter(|item| matches_query(&item.search_fields(), query))
        .collect()
}

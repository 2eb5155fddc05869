/// Fixed number of books per listing page.
pub const PAGE_SIZE: i64 = 10;

/// PageWindow
///
/// The page actually served once the requested page has been clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub total_pages: i64,
    pub offset: i64,
}

/// resolve_page
///
/// Lenient page resolution: a missing, non-numeric or < 1 page becomes 1, a page past the
/// end becomes the last page. An empty result set still has one (empty) page.
pub fn resolve_page(raw: Option<&str>, total_items: i64) -> PageWindow {
    let total_pages = ((total_items.max(0) + PAGE_SIZE - 1) / PAGE_SIZE).max(1);
    let requested = raw
        .and_then(|p| p.trim().parse::<i64>().ok())
        .filter(|p| *p >= 1)
        .unwrap_or(1);
    let page = requested.min(total_pages);

    PageWindow {
        page,
        total_pages,
        offset: (page - 1) * PAGE_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_and_small_pages_fall_back_to_first() {
        for raw in [None, Some("abc"), Some("0"), Some("-3"), Some("")] {
            assert_eq!(resolve_page(raw, 25).page, 1, "raw = {raw:?}");
        }
    }

    #[test]
    fn page_past_the_end_is_clamped_to_last() {
        let window = resolve_page(Some("99"), 25);
        assert_eq!(window.page, 3);
        assert_eq!(window.total_pages, 3);
        assert_eq!(window.offset, 20);
    }

    #[test]
    fn empty_listing_has_one_page() {
        let window = resolve_page(Some("2"), 0);
        assert_eq!(window, PageWindow { page: 1, total_pages: 1, offset: 0 });
    }

    #[test]
    fn exact_multiple_of_page_size() {
        assert_eq!(resolve_page(Some("2"), 20).total_pages, 2);
        assert_eq!(resolve_page(Some("2"), 20).offset, 10);
    }
}

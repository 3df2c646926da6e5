//! 1-indexed page sets.

use std::collections::BTreeSet;

use crate::error::{CoreError, Result};

/// A sorted, de-duplicated set of 1-indexed page numbers.
pub type PageSet = BTreeSet<u32>;

/// Parse page ranges such as `"1,2,3"`, `"1-5"` or `"1,3-5,8"`.
///
/// Whitespace is ignored. Page 0, reversed ranges and non-numeric parts are
/// rejected.
pub fn parse_page_range(input: &str) -> Result<PageSet> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let invalid = |reason: &str| CoreError::InvalidPageRange {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    if compact.is_empty() {
        return Err(invalid("empty"));
    }

    let mut pages = PageSet::new();
    for part in compact.split(',') {
        if part.is_empty() {
            return Err(invalid("empty element"));
        }
        match part.split_once('-') {
            Some((start, end)) => {
                let start: u32 = start.parse().map_err(|_| invalid("bad range start"))?;
                let end: u32 = end.parse().map_err(|_| invalid("bad range end"))?;
                if start == 0 {
                    return Err(invalid("pages start at 1"));
                }
                if start > end {
                    return Err(invalid("reversed range"));
                }
                pages.extend(start..=end);
            }
            None => {
                let page: u32 = part.parse().map_err(|_| invalid("not a number"))?;
                if page == 0 {
                    return Err(invalid("pages start at 1"));
                }
                pages.insert(page);
            }
        }
    }

    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mixed_spec() {
        let pages = parse_page_range("1, 3-5,8").unwrap();
        assert_eq!(pages.into_iter().collect::<Vec<_>>(), vec![1, 3, 4, 5, 8]);
    }

    #[test]
    fn test_duplicates_collapse() {
        let pages = parse_page_range("2,2,1-3").unwrap();
        assert_eq!(pages.len(), 3);
    }

    #[test]
    fn test_rejects_junk() {
        assert!(parse_page_range("").is_err());
        assert!(parse_page_range("a").is_err());
        assert!(parse_page_range("5-2").is_err());
        assert!(parse_page_range("0").is_err());
        assert!(parse_page_range("1,,2").is_err());
    }

    proptest! {
        #[test]
        fn test_formatted_set_parses_back(pages in prop::collection::btree_set(1u32..500, 1..40)) {
            let spec = pages.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
            prop_assert_eq!(parse_page_range(&spec).unwrap(), pages);
        }
    }
}

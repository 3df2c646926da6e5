//! Keyword search over page text.

use lopdf::Document;
use tracing::{debug, warn};

use ferry_core::PageSet;

use crate::error::Result;

/// Pages whose extracted text contains any of `keywords`, case-insensitively.
///
/// Pages whose text cannot be extracted are skipped. Blank keywords are
/// ignored; with no usable keyword the result is empty.
pub fn find_pages_with_keywords(document: &[u8], keywords: &[String]) -> Result<PageSet> {
    let needles: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    if needles.is_empty() {
        return Ok(PageSet::new());
    }

    let doc = Document::load_mem(document)?;
    let mut found = PageSet::new();

    for page in doc.get_pages().keys().copied() {
        let text = match doc.extract_text(&[page]) {
            Ok(text) => text.to_lowercase(),
            Err(e) => {
                warn!(page, error = %e, "text extraction failed, skipping page");
                continue;
            }
        };
        if let Some(hit) = needles.iter().find(|n| text.contains(n.as_str())) {
            debug!(page, keyword = %hit, "keyword match");
            found.insert(page);
        }
    }

    Ok(found)
}

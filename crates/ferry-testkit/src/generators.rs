//! Proptest generators for property-based testing.

use proptest::prelude::*;

use ferry_core::{InsertPosition, PageSet};
use ferry_store::TransferFault;

/// Page sets that may include 0, duplicates collapsed, and pages past the
/// end of a `max_page` document.
pub fn page_set(max_page: u32) -> impl Strategy<Value = PageSet> {
    prop::collection::btree_set(0..=max_page.saturating_mul(2), 0..=max_page as usize)
}

/// Any insertion position, including ones past the end.
pub fn insert_position(max_page: u32) -> impl Strategy<Value = InsertPosition> {
    prop_oneof![
        Just(InsertPosition::Start),
        Just(InsertPosition::End),
        (0..=max_page.saturating_mul(2)).prop_map(InsertPosition::After),
    ]
}

/// Any fault a message-store primitive can return.
pub fn transfer_fault() -> impl Strategy<Value = TransferFault> {
    prop_oneof![
        Just(TransferFault::StaleReference),
        (1u64..=600).prop_map(|seconds| TransferFault::RateLimited { seconds }),
        "[a-z ]{1,20}".prop_map(TransferFault::ResourceExhausted),
        "[a-z ]{1,20}".prop_map(TransferFault::other),
    ]
}

/// `(object_size, chunk_size, queue_capacity)` for stream tests.
pub fn stream_geometry() -> impl Strategy<Value = (usize, usize, usize)> {
    (0usize..4096, 1usize..512, 1usize..6)
}

/// Page-range strings in the operator syntax, e.g. `"1, 3-5,8"`.
pub fn page_range_text(max_page: u32) -> impl Strategy<Value = String> {
    let part = prop_oneof![
        (1..=max_page).prop_map(|p| p.to_string()),
        (1..=max_page, 0..=3u32).prop_map(|(start, len)| format!("{}-{}", start, start + len)),
    ];
    prop::collection::vec(part, 1..6).prop_map(|parts| parts.join(", "))
}

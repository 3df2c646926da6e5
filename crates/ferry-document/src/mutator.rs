//! Page removal and image-page insertion on PDF documents.
//!
//! Both operations parse the input, edit the page tree, and serialize a
//! complete new document. The input is never modified in place, and a
//! failure at any step yields no output at all.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, info};

use ferry_core::{InsertPosition, PageSet};

use crate::error::{DocumentError, Result};

/// A4 in PDF points.
pub const A4: PageFormat = PageFormat {
    width: 595.0,
    height: 842.0,
};

/// Target size of an inserted page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageFormat {
    pub width: f32,
    pub height: f32,
}

/// Outcome of [`DocumentMutator::remove_pages`].
#[derive(Debug, Clone)]
pub struct RemovalReport {
    pub document: Bytes,
    pub original_pages: u32,
    pub kept: u32,
    pub removed: u32,
}

impl RemovalReport {
    /// Nothing in the page set was in range; `document` is the input.
    pub fn is_noop(&self) -> bool {
        self.removed == 0
    }
}

/// Outcome of [`DocumentMutator::insert_image_page`].
#[derive(Debug, Clone)]
pub struct InsertionReport {
    pub document: Bytes,
    /// Number of existing pages before the new one.
    pub inserted_after: u32,
    pub total_pages: u32,
}

/// Applies page-level edits to a PDF.
#[derive(Debug, Clone)]
pub struct DocumentMutator {
    page_format: PageFormat,
    jpeg_quality: u8,
}

impl Default for DocumentMutator {
    fn default() -> Self {
        Self {
            page_format: A4,
            jpeg_quality: 90,
        }
    }
}

impl DocumentMutator {
    pub fn new(page_format: PageFormat, jpeg_quality: u8) -> Self {
        Self {
            page_format,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    /// Remove every page in `pages` (1-indexed).
    ///
    /// Out-of-range entries are ignored. If none are in range the input is
    /// returned unchanged and the report says so.
    pub fn remove_pages(&self, document: &[u8], pages: &PageSet) -> Result<RemovalReport> {
        let mut doc = Document::load_mem(document)?;
        let total = doc.get_pages().len() as u32;

        let targets: Vec<u32> = pages
            .iter()
            .copied()
            .filter(|p| (1..=total).contains(p))
            .collect();

        if targets.is_empty() {
            debug!(total, requested = pages.len(), "no removable pages in range");
            return Ok(RemovalReport {
                document: Bytes::copy_from_slice(document),
                original_pages: total,
                kept: total,
                removed: 0,
            });
        }

        doc.delete_pages(&targets);
        doc.prune_objects();
        let kept = doc.get_pages().len() as u32;
        let out = save(&mut doc)?;

        info!(total, kept, removed = targets.len(), "pages removed");
        Ok(RemovalReport {
            document: out,
            original_pages: total,
            kept,
            removed: total - kept,
        })
    }

    /// Add `image` as one new page at `position`.
    ///
    /// `After(n)` is clamped to the current page count. Existing pages and
    /// their content streams are left untouched.
    pub fn insert_image_page(
        &self,
        document: &[u8],
        image: &DynamicImage,
        position: InsertPosition,
    ) -> Result<InsertionReport> {
        let mut doc = Document::load_mem(document)?;
        let pages = doc.get_pages();
        let total = pages.len() as u32;

        let after = match position {
            InsertPosition::Start => 0,
            InsertPosition::End => total,
            InsertPosition::After(n) => n.min(total),
        };

        // Where in the page tree the new leaf goes.
        let (parent_id, index) = if total == 0 {
            (page_tree_root(&doc)?, 0)
        } else if after == 0 {
            let first = pages
                .get(&1)
                .copied()
                .ok_or_else(|| DocumentError::PageTree("missing page 1".into()))?;
            let parent = parent_of(&doc, first)?;
            (parent, kid_index(&doc, parent, first)?)
        } else {
            let anchor = pages
                .get(&after)
                .copied()
                .ok_or_else(|| DocumentError::PageTree(format!("missing page {after}")))?;
            let parent = parent_of(&doc, anchor)?;
            (parent, kid_index(&doc, parent, anchor)? + 1)
        };

        let page_id = self.add_image_page(&mut doc, parent_id, image)?;

        let kids = doc
            .get_object_mut(parent_id)?
            .as_dict_mut()?
            .get_mut(b"Kids")?
            .as_array_mut()?;
        let index = index.min(kids.len());
        kids.insert(index, Object::Reference(page_id));

        // Every ancestor counts one more leaf.
        let mut cursor = Some(parent_id);
        while let Some(id) = cursor {
            let node = doc.get_object_mut(id)?.as_dict_mut()?;
            let count = node.get(b"Count").and_then(Object::as_i64).unwrap_or(0);
            node.set("Count", count + 1);
            cursor = node.get(b"Parent").and_then(Object::as_reference).ok();
        }

        let total_pages = doc.get_pages().len() as u32;
        let out = save(&mut doc)?;

        info!(after, total_pages, "image page inserted");
        Ok(InsertionReport {
            document: out,
            inserted_after: after,
            total_pages,
        })
    }

    /// Create the page object and its resources. Returns the page id.
    fn add_image_page(
        &self,
        doc: &mut Document,
        parent_id: ObjectId,
        image: &DynamicImage,
    ) -> Result<ObjectId> {
        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        let (img_w, img_h) = (rgb.width(), rgb.height());
        if img_w == 0 || img_h == 0 {
            return Err(DocumentError::PageTree("image has no pixels".into()));
        }

        let mut jpeg = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, self.jpeg_quality))?;

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => img_w as i64,
                "Height" => img_h as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        ));

        let PageFormat { width, height } = self.page_format;
        let (draw_w, draw_h, x, y) = fit_centered(img_w as f32, img_h as f32, width, height);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(draw_w),
                        Object::Real(0.0),
                        Object::Real(0.0),
                        Object::Real(draw_h),
                        Object::Real(x),
                        Object::Real(y),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => parent_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(width),
                Object::Real(height),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    "Im0" => image_id,
                },
            },
        });
        Ok(page_id)
    }
}

/// Number of pages in a PDF.
pub fn page_count(document: &[u8]) -> Result<u32> {
    Ok(Document::load_mem(document)?.get_pages().len() as u32)
}

/// Uniform scale to fit inside the page, then center.
/// Returns `(width, height, x, y)` in page units.
fn fit_centered(img_w: f32, img_h: f32, page_w: f32, page_h: f32) -> (f32, f32, f32, f32) {
    let scale = (page_w / img_w).min(page_h / img_h);
    let (w, h) = (img_w * scale, img_h * scale);
    (w, h, (page_w - w) / 2.0, (page_h - h) / 2.0)
}

fn page_tree_root(doc: &Document) -> Result<ObjectId> {
    Ok(doc.catalog()?.get(b"Pages")?.as_reference()?)
}

fn parent_of(doc: &Document, page: ObjectId) -> Result<ObjectId> {
    Ok(doc.get_dictionary(page)?.get(b"Parent")?.as_reference()?)
}

fn kid_index(doc: &Document, parent: ObjectId, child: ObjectId) -> Result<usize> {
    doc.get_dictionary(parent)?
        .get(b"Kids")?
        .as_array()?
        .iter()
        .position(|kid| kid.as_reference().ok() == Some(child))
        .ok_or_else(|| DocumentError::PageTree(format!("page {child:?} not among its parent's kids")))
}

fn save(doc: &mut Document) -> Result<Bytes> {
    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_testkit::fixtures::{checkerboard, numbered_pdf};
    use ferry_testkit::generators::{insert_position, page_set};
    use proptest::prelude::*;

    fn contents(document: &[u8]) -> Vec<Vec<u8>> {
        let doc = Document::load_mem(document).unwrap();
        doc.get_pages()
            .values()
            .map(|id| doc.get_page_content(*id).unwrap())
            .collect()
    }

    #[test]
    fn test_remove_pages_keeps_order() {
        let pdf = numbered_pdf(6);
        let before = contents(&pdf);

        let report = DocumentMutator::default()
            .remove_pages(&pdf, &PageSet::from([2, 5]))
            .unwrap();

        assert_eq!(report.original_pages, 6);
        assert_eq!(report.kept, 4);
        assert_eq!(report.removed, 2);
        let after = contents(&report.document);
        assert_eq!(after, vec![before[0].clone(), before[2].clone(), before[3].clone(), before[5].clone()]);
    }

    #[test]
    fn test_remove_empty_set_is_noop() {
        let pdf = numbered_pdf(3);
        let report = DocumentMutator::default()
            .remove_pages(&pdf, &PageSet::new())
            .unwrap();
        assert!(report.is_noop());
        assert_eq!(report.kept, 3);
        assert_eq!(&report.document[..], &pdf[..]);
    }

    #[test]
    fn test_out_of_range_pages_ignored() {
        let pdf = numbered_pdf(3);
        let report = DocumentMutator::default()
            .remove_pages(&pdf, &PageSet::from([0, 4, 99]))
            .unwrap();
        assert!(report.is_noop());

        let report = DocumentMutator::default()
            .remove_pages(&pdf, &PageSet::from([3, 4]))
            .unwrap();
        assert_eq!(report.kept, 2);
        assert_eq!(report.removed, 1);
    }

    #[test]
    fn test_garbage_input_is_reported() {
        let err = DocumentMutator::default()
            .remove_pages(b"not a pdf", &PageSet::from([1]))
            .unwrap_err();
        assert!(matches!(err, DocumentError::Pdf(_)));

        let err = DocumentMutator::default()
            .insert_image_page(b"%PDF-broken", &checkerboard(10, 10, 2), InsertPosition::End)
            .unwrap_err();
        assert!(matches!(err, DocumentError::Pdf(_)));
    }

    #[test]
    fn test_insert_start_then_end() {
        let pdf = numbered_pdf(4);
        let original = contents(&pdf);
        let mutator = DocumentMutator::default();

        let first = mutator
            .insert_image_page(&pdf, &checkerboard(40, 30, 5), InsertPosition::Start)
            .unwrap();
        assert_eq!(first.inserted_after, 0);
        assert_eq!(first.total_pages, 5);

        let second = mutator
            .insert_image_page(&first.document, &checkerboard(30, 40, 5), InsertPosition::End)
            .unwrap();
        assert_eq!(second.inserted_after, 5);
        assert_eq!(second.total_pages, 6);

        let after = contents(&second.document);
        assert_eq!(&after[1..5], &original[..]);
        assert_eq!(page_count(&second.document).unwrap(), 6);
    }

    #[test]
    fn test_insert_after_clamps_to_page_count() {
        let pdf = numbered_pdf(3);
        let original = contents(&pdf);

        let report = DocumentMutator::default()
            .insert_image_page(&pdf, &checkerboard(8, 8, 2), InsertPosition::After(50))
            .unwrap();
        assert_eq!(report.inserted_after, 3);
        assert_eq!(report.total_pages, 4);
        assert_eq!(&contents(&report.document)[..3], &original[..]);
    }

    #[test]
    fn test_insert_in_the_middle() {
        let pdf = numbered_pdf(4);
        let original = contents(&pdf);

        let report = DocumentMutator::default()
            .insert_image_page(&pdf, &checkerboard(8, 8, 2), InsertPosition::After(2))
            .unwrap();
        let after = contents(&report.document);
        assert_eq!(after.len(), 5);
        assert_eq!(&after[..2], &original[..2]);
        assert_eq!(&after[3..], &original[2..]);
    }

    #[test]
    fn test_fit_centered_preserves_aspect() {
        let (w, h, x, y) = fit_centered(200.0, 100.0, 595.0, 842.0);
        assert!((w - 595.0).abs() < 1e-3);
        assert!((h - 297.5).abs() < 1e-3);
        assert!(x.abs() < 1e-3);
        assert!((y - (842.0 - 297.5) / 2.0).abs() < 1e-3);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_kept_plus_removed_is_total(total in 1u32..8, pages in page_set(8)) {
            let pdf = numbered_pdf(total);
            let report = DocumentMutator::default().remove_pages(&pdf, &pages).unwrap();

            let in_range = pages.iter().filter(|p| (1..=total).contains(*p)).count() as u32;
            prop_assert_eq!(report.kept + report.removed, total);
            prop_assert_eq!(report.removed, in_range);
        }

        #[test]
        fn test_insertion_adds_one_page_and_keeps_the_rest(
            total in 0u32..6,
            position in insert_position(6),
        ) {
            let pdf = numbered_pdf(total);
            let original = contents(&pdf);
            let report = DocumentMutator::default()
                .insert_image_page(&pdf, &checkerboard(12, 8, 4), position)
                .unwrap();

            prop_assert_eq!(report.total_pages, total + 1);
            let after = contents(&report.document);
            let at = report.inserted_after as usize;
            prop_assert_eq!(&after[..at], &original[..at]);
            prop_assert_eq!(&after[at + 1..], &original[at..]);
        }
    }
}

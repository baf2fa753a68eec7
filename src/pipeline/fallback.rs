//! Image fallback: the page raster as one full-bleed picture.
//!
//! The last tier of the chain. It needs nothing but the raster every page
//! already has, so it cannot fail; the resulting slide looks right but is
//! not editable.

use crate::document::Page;
use crate::layout::{
    BoundingBox, ElementKind, ExtractionMethod, ImageBlock, ImageSource, LayoutElement, PageLayout,
};
use std::sync::Arc;

/// Layout holding a single image element that covers the whole page.
pub fn image_layout(page: &Page) -> PageLayout {
    let (w, h) = page.raster_size();
    let (w, h) = (w.max(1) as f64, h.max(1) as f64);
    PageLayout {
        index: page.index,
        page_width: w,
        page_height: h,
        elements: vec![LayoutElement {
            kind: ElementKind::Image(ImageBlock {
                image: Arc::clone(&page.raster),
                crop: None,
                source: ImageSource::PageRaster,
            }),
            bbox: BoundingBox::new(0.0, 0.0, w, h),
            z: 0,
        }],
        method: ExtractionMethod::ImageFallback,
        background: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    #[test]
    fn covers_the_page_with_the_shared_raster() {
        let raster = Arc::new(DynamicImage::ImageRgb8(RgbImage::new(320, 180)));
        let page = Page {
            index: 4,
            raster: Arc::clone(&raster),
            content: None,
        };
        let layout = image_layout(&page);
        assert_eq!(layout.method, ExtractionMethod::ImageFallback);
        assert_eq!(layout.index, 4);
        assert_eq!(layout.elements.len(), 1);
        assert_eq!(layout.elements[0].bbox, BoundingBox::new(0.0, 0.0, 320.0, 180.0));
        match &layout.elements[0].kind {
            ElementKind::Image(img) => assert!(Arc::ptr_eq(&img.image, &raster)),
            _ => panic!("expected image"),
        }
    }
}

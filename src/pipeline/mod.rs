//! Pipeline stages for PDF/image-to-PPTX conversion.
//!
//! Each submodule implements one step. The three extraction tiers share a
//! single output type, [`crate::layout::PageLayout`], so the chain in
//! [`strategy`] can swap between them freely.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ loader ──▶ strategy ──┬─▶ direct   (content ◀── lopdf)
//! (bytes)   (render)              ├─▶ vision   (encode ──▶ VLM)
//!                                 └─▶ fallback (page raster)
//! ```
//!
//! 1. [`input`]: resolve paths/URLs to bytes and validate the input set
//! 2. [`loader`] + [`render`]: parse structure and rasterise pages; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`content`] + [`direct`]: interpret the page content stream into a
//!    paint list, then group it into text, shape and image elements
//! 4. [`encode`] + [`vision`]: downscale and PNG/base64 the raster, call the
//!    vision service with retry/timeout, parse its JSON reply
//! 5. [`fallback`]: the full-bleed raster layout that cannot fail
//! 6. [`strategy`]: the per-page chain tying the tiers together

pub mod content;
pub mod direct;
pub mod encode;
pub mod fallback;
pub mod input;
pub mod loader;
pub mod render;
pub mod strategy;
pub mod vision;

//! PPTX output: layout → slide model → OOXML package.
//!
//! ```text
//! PageLayout ──▶ builder ──▶ model::Slide ──▶ writer ──▶ .pptx bytes
//!               (scale, z, drop)             (XML + zip)
//! ```

pub mod builder;
pub mod model;
pub mod writer;

pub use builder::{build_presentation, build_slide, SlideTransform};
pub use model::Presentation;
pub use writer::write_pptx;

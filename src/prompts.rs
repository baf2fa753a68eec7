//! System prompts for vision-based slide layout analysis.
//!
//! Centralising the prompt here serves two purposes:
//!
//! 1. **Single source of truth**: the JSON contract the parser in
//!    [`crate::pipeline::vision`] expects is described in exactly one place.
//!
//! 2. **Testability**: unit tests can inspect the prompt directly without a
//!    live model, so contract regressions are caught early.
//!
//! Callers can override the default via
//! [`crate::config::VisionConfig::system_prompt`]; the constant here is used
//! only when no override is provided. An override must keep the same JSON
//! shape or every page will fall through to the image fallback.

/// Default prompt asking the model for a slide's editable elements as JSON.
pub const DEFAULT_LAYOUT_PROMPT: &str = r##"You are an expert presentation slide analyzer. Analyze this slide image and extract ALL visual elements into a structured JSON format.

For each element, identify:
1. Text blocks: all text content with approximate position, font size, color, and styling
2. Images/Graphics: areas containing photos, charts, or illustrations (NOT the background)
3. Shapes: background panels, colored boxes, dividers, decorative elements

Return a JSON object with this exact structure:
{
    "background_color": "#hex_color",
    "elements": [
        {
            "type": "text",
            "content": "the actual text content here",
            "x": 5,
            "y": 10,
            "width": 40,
            "height": 8,
            "font_size": 24,
            "font_color": "#333333",
            "bold": true,
            "italic": false,
            "alignment": "left"
        },
        {
            "type": "shape",
            "x": 0,
            "y": 0,
            "width": 100,
            "height": 15,
            "background_color": "#2c3e50"
        },
        {
            "type": "image",
            "x": 60,
            "y": 20,
            "width": 35,
            "height": 60
        }
    ]
}

CRITICAL RULES:
- All positions (x, y, width, height) are PERCENTAGES (0-100) of the full slide width and height
- Extract EVERY piece of text visible on the slide
- Keep multi-line text together in one element using newline characters
- font_size is in points for a 7.5 inch tall slide: titles 24-44, subtitles 18-24, body 14-18, small text 10-12
- Give colors as #RRGGBB hex
- alignment is one of "left", "center", "right"
- Include ALL shapes, boxes and containers as "shape" elements with their background colors
- Order elements: shapes first (background layer), then text, then images
- Return ONLY valid JSON, nothing else: no markdown, no explanation"##;

/// Height of the reference slide the prompt's point sizes refer to.
pub const PROMPT_SLIDE_HEIGHT_PT: f64 = 540.0;

//! Screen capture and target relocation seams.

use image::RgbaImage;

use crate::error::Result;
use crate::events::{CursorType, Position, Rect, TargetImageType};

/// Captures screen content around recorded clicks.
pub trait ScreenCapture: Send + Sync {
    /// Grabs the screen region that will later be searched for the click
    /// target. `rect` is in absolute screen coordinates.
    fn take_screenshot(&self, rect: Rect) -> Result<RgbaImage>;

    /// Narrows a capture down to the rectangle most likely to contain the
    /// click target, given where the click landed and what the cursor looked
    /// like. The returned rect is relative to the screenshot.
    fn isolate_target(
        &self,
        screenshot: &RgbaImage,
        click: Position,
        cursor: CursorType,
    ) -> (Rect, TargetImageType);
}

/// Finds a previously captured target on the current screen at replay time.
pub trait TargetLocator: Send + Sync {
    /// Searches the screen for `target` (the `rect` portion of `screenshot`)
    /// and returns its current bounding rect, or `None` when it cannot be
    /// found confidently.
    fn locate_target(&self, screenshot: &RgbaImage, rect: Rect) -> Option<Rect>;
}

/// Capture stub for headless use and tests: blank screenshots, widget-sized
/// target rects centered on the click.
#[derive(Default)]
pub struct NullCapture;

impl ScreenCapture for NullCapture {
    fn take_screenshot(&self, rect: Rect) -> Result<RgbaImage> {
        Ok(RgbaImage::new(rect.width.max(1) as u32, rect.height.max(1) as u32))
    }

    fn isolate_target(
        &self,
        screenshot: &RgbaImage,
        click: Position,
        cursor: CursorType,
    ) -> (Rect, TargetImageType) {
        let (width, height) = match cursor {
            // Text carets want a wide, short context.
            CursorType::IBeam => (120, 32),
            _ => (64, 64),
        };
        let rect = Rect::new(
            (click.x - width / 2).clamp(0, (screenshot.width() as i32 - width).max(0)),
            (click.y - height / 2).clamp(0, (screenshot.height() as i32 - height).max(0)),
            width,
            height,
        );
        let kind = if cursor == CursorType::IBeam {
            TargetImageType::Text
        } else {
            TargetImageType::Widget
        };
        (rect, kind)
    }
}

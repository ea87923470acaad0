use crate::ocr::PixelBox;

pub(super) fn union_bbox(a: &PixelBox, b: &PixelBox) -> PixelBox {
    PixelBox {
        left: a.left.min(b.left),
        top: a.top.min(b.top),
        right: a.right.max(b.right),
        bottom: a.bottom.max(b.bottom),
    }
}

/// Converts an origin-plus-extent box into inclusive edges. Empty extents yield `None`.
pub(super) fn from_extent(left: u32, top: u32, width: u32, height: u32) -> Option<PixelBox> {
    if width == 0 || height == 0 {
        return None;
    }
    Some(PixelBox {
        left,
        top,
        right: left.checked_add(width - 1)?,
        bottom: top.checked_add(height - 1)?,
    })
}

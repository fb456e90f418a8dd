//! Coordinate-addressing strategy, snapshotted from the default bounds
//! once per batch operation.
//!
//! Plain addressing forwards device coordinates unchanged (infinite
//! canvas). Wraparound addressing reduces every coordinate modulo the
//! wrap rect before it reaches the store, so painting past one edge
//! continues from the opposite edge. Switching strategies never touches
//! stored tiles; only the interpretation of coordinates changes.

use model::{Rect, wrap_coordinate};

use crate::bounds::DefaultBounds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AccessStrategy {
    Plain,
    WrapAround(Rect),
}

/// One wrap piece: a sub-rect of the logical request plus the
/// translation taking it into storage coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WrapPiece {
    pub(crate) logical: Rect,
    pub(crate) dx: i32,
    pub(crate) dy: i32,
}

impl AccessStrategy {
    pub(crate) fn snapshot(bounds: &dyn DefaultBounds) -> Self {
        if bounds.wrap_around_mode() {
            let wrap_rect = bounds.bounds();
            assert!(
                !wrap_rect.is_empty(),
                "wraparound mode requires non-empty default bounds"
            );
            Self::WrapAround(wrap_rect)
        } else {
            Self::Plain
        }
    }

    /// Splits a logical rect into pieces that each map contiguously into
    /// storage space. Plain addressing yields the rect itself.
    pub(crate) fn split(self, rect: Rect) -> Vec<WrapPiece> {
        if rect.is_empty() {
            return Vec::new();
        }
        match self {
            Self::Plain => vec![WrapPiece {
                logical: rect,
                dx: 0,
                dy: 0,
            }],
            Self::WrapAround(wrap_rect) => wrap_pieces(rect, wrap_rect),
        }
    }
}

fn wrap_pieces(rect: Rect, wrap_rect: Rect) -> Vec<WrapPiece> {
    let mut pieces = Vec::new();
    let mut y = rect.top();
    while y <= rect.bottom() {
        let wrapped_y = wrap_coordinate(y, wrap_rect.y, wrap_rect.height);
        let row_span = (wrap_rect.bottom() - wrapped_y + 1).min(rect.bottom() - y + 1);
        let mut x = rect.left();
        while x <= rect.right() {
            let wrapped_x = wrap_coordinate(x, wrap_rect.x, wrap_rect.width);
            let col_span = (wrap_rect.right() - wrapped_x + 1).min(rect.right() - x + 1);
            pieces.push(WrapPiece {
                logical: Rect::new(x, y, col_span, row_span),
                dx: wrapped_x - x,
                dy: wrapped_y - y,
            });
            x += col_span;
        }
        y += row_span;
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_split_is_the_identity() {
        let rect = Rect::new(-5, -5, 500, 500);
        let pieces = AccessStrategy::Plain.split(rect);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].logical, rect);
        assert_eq!((pieces[0].dx, pieces[0].dy), (0, 0));
    }

    #[test]
    fn wrap_split_covers_the_request_without_overlap() {
        let wrap_rect = Rect::new(0, 0, 100, 100);
        let rect = Rect::new(98, 98, 5, 5);
        let pieces = AccessStrategy::WrapAround(wrap_rect).split(rect);
        assert_eq!(pieces.len(), 4);
        let area: i32 = pieces
            .iter()
            .map(|piece| piece.logical.width * piece.logical.height)
            .sum();
        assert_eq!(area, 25);
        for piece in &pieces {
            let storage = piece.logical.translated(piece.dx, piece.dy);
            assert!(wrap_rect.contains_rect(storage), "piece must land inside the wrap rect");
        }
    }

    #[test]
    fn interior_rect_wraps_to_itself() {
        let wrap_rect = Rect::new(0, 0, 100, 100);
        let rect = Rect::new(10, 10, 20, 20);
        let pieces = AccessStrategy::WrapAround(wrap_rect).split(rect);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].logical, rect);
        assert_eq!((pieces[0].dx, pieces[0].dy), (0, 0));
    }
}

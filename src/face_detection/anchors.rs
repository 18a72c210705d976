use nalgebra::Point2;

/// Anchor centres of one detector output scale.
///
/// Points are emitted row-major over the feature map and each raster position
/// is repeated `anchors_per_location` times back to back, which is the order
/// the detector flattens its score/box/keypoint outputs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorGrid {
    pub height: usize,
    pub width: usize,
    pub stride: usize,
    pub anchors_per_location: usize,
}

impl AnchorGrid {
    pub fn new(height: usize, width: usize, stride: usize, anchors_per_location: usize) -> Self {
        Self {
            height,
            width,
            stride,
            anchors_per_location,
        }
    }

    /// Grid for a detector input of `input_height` x `input_width` at `stride`.
    pub fn for_input(
        input_height: usize,
        input_width: usize,
        stride: usize,
        anchors_per_location: usize,
    ) -> Self {
        Self::new(
            input_height.div_ceil(stride),
            input_width.div_ceil(stride),
            stride,
            anchors_per_location,
        )
    }

    pub fn len(&self) -> usize {
        self.height * self.width * self.anchors_per_location
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn centers(&self) -> Vec<Point2<f32>> {
        let mut points = Vec::with_capacity(self.len());
        for row in 0..self.height {
            for col in 0..self.width {
                let center = Point2::new((col * self.stride) as f32, (row * self.stride) as f32);
                for _ in 0..self.anchors_per_location {
                    points.push(center);
                }
            }
        }
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_8_grid_is_row_major() {
        let grid = AnchorGrid::new(80, 80, 8, 1);
        let centers = grid.centers();

        assert_eq!(centers.len(), 6400);
        assert_eq!(centers[0], Point2::new(0.0, 0.0));
        for (r, c) in [(0, 1), (1, 0), (7, 13), (79, 79)] {
            assert_eq!(centers[r * 80 + c], Point2::new((c * 8) as f32, (r * 8) as f32));
        }
    }

    #[test]
    fn anchors_are_replicated_contiguously() {
        let grid = AnchorGrid::for_input(640, 640, 32, 2);
        assert_eq!((grid.height, grid.width), (20, 20));

        let centers = grid.centers();
        assert_eq!(centers.len(), 800);
        assert_eq!(centers[0], centers[1]);
        assert_eq!(centers[2], Point2::new(32.0, 0.0));
        assert_eq!(centers[2 * 20 * 2], Point2::new(0.0, 64.0));
    }

    #[test]
    fn input_size_is_rounded_up() {
        let grid = AnchorGrid::for_input(100, 90, 32, 1);
        assert_eq!((grid.height, grid.width), (4, 3));
    }
}

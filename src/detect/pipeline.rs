//! Contour-based ball localisation.
//!
//! grayscale -> gaussian smoothing -> canny edges -> outer contours ->
//! largest enclosed area -> centroid from contour moments.

use anyhow::{anyhow, Result};
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::point::Point as PixelPoint;

use crate::detect::result::Point;
use crate::frame::Frame;

/// Smoothing strength; the sigma a 15x15 gaussian kernel implies.
pub const BLUR_SIGMA: f32 = 2.6;

/// Canny hysteresis thresholds.
pub const CANNY_LOW: f32 = 30.0;
pub const CANNY_HIGH: f32 = 150.0;

/// Zeroth and first order spatial moments of a closed polygon.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl Moments {
    /// Moments of the polygon traced by `points` (implicitly closed), via
    /// Green's theorem. The sign of `m00` follows the winding direction;
    /// the centroid is independent of it.
    pub fn of_polygon(points: &[PixelPoint<i32>]) -> Self {
        let mut moments = Moments::default();
        if points.len() < 3 {
            return moments;
        }
        for (i, a) in points.iter().enumerate() {
            let b = &points[(i + 1) % points.len()];
            let (xa, ya) = (f64::from(a.x), f64::from(a.y));
            let (xb, yb) = (f64::from(b.x), f64::from(b.y));
            let cross = xa * yb - xb * ya;
            moments.m00 += cross;
            moments.m10 += (xa + xb) * cross;
            moments.m01 += (ya + yb) * cross;
        }
        moments.m00 /= 2.0;
        moments.m10 /= 6.0;
        moments.m01 /= 6.0;
        moments
    }

    /// Area-weighted centroid, truncated toward zero. `None` for a
    /// degenerate (zero-area) polygon.
    pub fn centroid(&self) -> Option<Point> {
        if self.m00 == 0.0 {
            return None;
        }
        Some(Point::new(
            (self.m10 / self.m00) as i32,
            (self.m01 / self.m00) as i32,
        ))
    }
}

/// Unsigned enclosed area of a contour.
pub fn contour_area(points: &[PixelPoint<i32>]) -> f64 {
    Moments::of_polygon(points).m00.abs()
}

/// Edge map of a grayscale image.
pub fn edge_map(gray: &GrayImage) -> GrayImage {
    let blurred = gaussian_blur_f32(gray, BLUR_SIGMA);
    canny(&blurred, CANNY_LOW, CANNY_HIGH)
}

/// Outer borders that are not nested inside another border.
pub fn external_contours(edges: &GrayImage) -> Vec<Contour<i32>> {
    find_contours::<i32>(edges)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
        .collect()
}

/// Locate the dominant object in a grayscale image.
pub fn locate_in_gray(gray: &GrayImage) -> Option<Point> {
    let edges = edge_map(gray);
    let largest = external_contours(&edges)
        .into_iter()
        .map(|contour| (contour_area(&contour.points), contour))
        .max_by(|a, b| a.0.total_cmp(&b.0))?;
    Moments::of_polygon(&largest.1.points).centroid()
}

/// Locate the dominant object in an RGB frame.
pub fn locate(frame: &Frame) -> Result<Option<Point>> {
    let rgb = frame.as_image().ok_or_else(|| {
        anyhow!(
            "frame buffer of {} bytes does not match {}x{}",
            frame.pixels().len(),
            frame.width,
            frame.height
        )
    })?;
    let gray = image::imageops::grayscale(&rgb);
    Ok(locate_in_gray(&gray))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::render_ball;
    use image::Luma;
    use imageproc::drawing::draw_filled_circle_mut;

    fn pt(x: i32, y: i32) -> PixelPoint<i32> {
        PixelPoint::new(x, y)
    }

    #[test]
    fn square_moments() {
        let square = [pt(0, 0), pt(10, 0), pt(10, 10), pt(0, 10)];
        let m = Moments::of_polygon(&square);
        assert_eq!(m.m00, 100.0);
        assert_eq!(m.centroid(), Some(Point::new(5, 5)));

        let reversed: Vec<_> = square.iter().rev().copied().collect();
        let m = Moments::of_polygon(&reversed);
        assert_eq!(m.m00, -100.0);
        assert_eq!(m.centroid(), Some(Point::new(5, 5)));
    }

    #[test]
    fn degenerate_contours_have_no_centroid() {
        assert_eq!(Moments::of_polygon(&[pt(3, 3)]).centroid(), None);
        assert_eq!(Moments::of_polygon(&[pt(1, 1), pt(5, 5)]).centroid(), None);
        let line = [pt(0, 0), pt(4, 0), pt(8, 0)];
        assert_eq!(Moments::of_polygon(&line).centroid(), None);
    }

    #[test]
    fn centroid_truncates_toward_zero() {
        let m = Moments {
            m00: 2.0,
            m10: 7.0,
            m01: -7.0,
        };
        assert_eq!(m.centroid(), Some(Point::new(3, -3)));
    }

    #[test]
    fn white_circle_is_located() {
        let mut gray = GrayImage::new(640, 480);
        draw_filled_circle_mut(&mut gray, (320, 240), 20, Luma([255u8]));
        let found = locate_in_gray(&gray).expect("circle located");
        assert!((found.x - 320).abs() <= 2, "{:?}", found);
        assert!((found.y - 240).abs() <= 2, "{:?}", found);
    }

    #[test]
    fn rendered_ball_is_located() {
        let frame = render_ball(640, 480, (150, 333), 20, 0);
        let found = locate(&frame).unwrap().expect("ball located");
        assert!((found.x - 150).abs() <= 2, "{:?}", found);
        assert!((found.y - 333).abs() <= 2, "{:?}", found);
    }

    #[test]
    fn largest_object_wins() {
        let mut gray = GrayImage::new(640, 480);
        draw_filled_circle_mut(&mut gray, (100, 100), 8, Luma([255u8]));
        draw_filled_circle_mut(&mut gray, (450, 300), 30, Luma([255u8]));
        let found = locate_in_gray(&gray).expect("circle located");
        assert!((found.x - 450).abs() <= 2, "{:?}", found);
        assert!((found.y - 300).abs() <= 2, "{:?}", found);
    }

    #[test]
    fn empty_frame_has_no_contours() {
        let frame = Frame::blank(640, 480, 0);
        assert_eq!(locate(&frame).unwrap(), None);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let mut frame = Frame::blank(64, 48, 0);
        frame.width = 65;
        assert!(locate(&frame).is_err());
    }
}

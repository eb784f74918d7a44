//! Bouncing ball physics for the origin endpoint.
//!
//! The ball is the ground truth of the whole loop: the origin rasterizes it
//! into frames and pushes its position over the side channel every tick.

/// Default ball radius in pixels.
pub const DEFAULT_RADIUS: i32 = 20;

/// Default per-tick velocity on both axes.
pub const DEFAULT_SPEED: i32 = 5;

/// A ball bouncing inside a `width` x `height` box.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ball {
    pub x: i32,
    pub y: i32,
    pub dx: i32,
    pub dy: i32,
    pub width: i32,
    pub height: i32,
    pub radius: i32,
}

impl Ball {
    /// Centered ball with the default radius and velocity.
    pub fn new(width: i32, height: i32) -> Self {
        Self::with_radius(width, height, DEFAULT_RADIUS)
    }

    pub fn with_radius(width: i32, height: i32, radius: i32) -> Self {
        Self {
            x: width / 2,
            y: height / 2,
            dx: DEFAULT_SPEED,
            dy: DEFAULT_SPEED,
            width,
            height,
            radius,
        }
    }

    /// Advance one tick.
    ///
    /// Each axis bounces independently: a velocity component flips when the
    /// ball overlaps the corresponding wall, then both components are applied.
    pub fn step(&mut self) {
        if self.x - self.radius < 0 || self.x + self.radius > self.width {
            self.dx = -self.dx;
        }
        if self.y - self.radius < 0 || self.y + self.radius > self.height {
            self.dy = -self.dy;
        }

        self.x += self.dx;
        self.y += self.dy;
    }

    pub fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_centered() {
        let ball = Ball::new(640, 480);
        assert_eq!(ball.position(), (320, 240));
        assert_eq!((ball.dx, ball.dy), (5, 5));
        assert_eq!(ball.radius, 20);
    }

    #[test]
    fn step_moves_without_contact() {
        let mut ball = Ball::new(640, 480);
        ball.step();
        assert_eq!(ball.position(), (325, 245));
        assert_eq!((ball.dx, ball.dy), (5, 5));
    }

    #[test]
    fn step_reverses_on_left_wall() {
        let mut ball = Ball::new(640, 480);
        ball.x = ball.radius - 1;
        ball.step();
        assert_eq!(ball.dx, -5);
        assert_eq!(ball.dy, 5);
    }

    #[test]
    fn corner_contact_flips_both_axes() {
        let mut ball = Ball::new(640, 480);
        ball.x = 640 - ball.radius + 1;
        ball.y = 480 - ball.radius + 1;
        ball.step();
        assert_eq!((ball.dx, ball.dy), (-5, -5));
        assert_eq!(ball.position(), (616, 456));
    }

    /// The bounce is triggered by overlap, so the ball may sit at most one
    /// velocity step past the inner band before it turns around.
    #[test]
    fn stays_inside_bounds_over_many_steps() {
        for (dx, dy) in [(1, 1), (1, -1), (-1, 1), (-1, -1), (1, 0), (0, 1)] {
            for radius in [1, 20, 100, 239] {
                let mut ball = Ball::with_radius(640, 480, radius);
                ball.dx = dx;
                ball.dy = dy;
                for _ in 0..5_000 {
                    ball.step();
                    assert!(ball.x >= radius - 1 && ball.x <= 640 - radius + 1, "{:?}", ball);
                    assert!(ball.y >= radius - 1 && ball.y <= 480 - radius + 1, "{:?}", ball);
                }
            }
        }
    }

    #[test]
    fn larger_speeds_stay_within_one_step_of_bounds() {
        for (dx, dy) in [(5, 5), (7, -3), (-13, 11)] {
            let mut ball = Ball::new(640, 480);
            ball.dx = dx;
            ball.dy = dy;
            for _ in 0..5_000 {
                ball.step();
                assert!(ball.x >= ball.radius - dx.abs() && ball.x <= 640 - ball.radius + dx.abs());
                assert!(ball.y >= ball.radius - dy.abs() && ball.y <= 480 - ball.radius + dy.abs());
            }
        }
    }
}

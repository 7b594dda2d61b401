use nalgebra as na;

pub type Vector2d = na::Vector2::<f64>;
pub type Vector2i = na::Vector2::<i32>;

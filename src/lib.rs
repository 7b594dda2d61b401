pub mod blob;
pub mod config;
pub mod export;
pub mod motion;
pub mod my_types;
pub mod object;
pub mod pipeline;
pub mod preview;
pub mod synthetic;
pub mod tracker;
pub mod video;
pub mod visualization;

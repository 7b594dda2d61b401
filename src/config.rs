use std::str::FromStr;

use anyhow::{anyhow, bail, Result};

/// Size of the encoded output video.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputResolution {
    MatchInput,
    Fixed { width: i32, height: i32 },
}

impl OutputResolution {
    /// Resolve against the input video size.
    pub fn resolve(&self, input: (i32, i32)) -> (i32, i32) {
        match *self {
            OutputResolution::MatchInput => input,
            OutputResolution::Fixed { width, height } => (width, height),
        }
    }
}

impl FromStr for OutputResolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("match-input") {
            return Ok(OutputResolution::MatchInput);
        }
        let (w, h) = s
            .split_once(|c: char| c == 'x' || c == 'X')
            .ok_or(anyhow!("expected `match-input` or WIDTHxHEIGHT, got `{}`", s))?;
        let width: i32 = w.trim().parse()?;
        let height: i32 = h.trim().parse()?;
        if width <= 0 || height <= 0 {
            bail!("output resolution must be positive, got {}x{}", width, height);
        }
        Ok(OutputResolution::Fixed { width, height })
    }
}

#[derive(Clone, Debug)]
#[derive(clap::Parser)]
pub struct Config {
    /// Optical flow magnitude above which a pixel counts as moving
    #[clap(long, default_value = "1.0")]
    pub motion_threshold: f64,

    /// Minimum blob area in pixels accepted by the detector
    #[clap(long, default_value = "50")]
    pub min_area: f32,

    /// Multiplier applied to the detected blob diameter
    #[clap(long, default_value = "0.5")]
    pub blob_size_scale: f64,

    /// Objects closer than this are joined by a line
    #[clap(long, default_value = "150")]
    pub max_connection_distance: i32,

    #[clap(long, default_value = "0.2")]
    pub trail_opacity: f64,

    /// `match-input` or WIDTHxHEIGHT
    #[clap(long, default_value = "match-input")]
    pub output_resolution: OutputResolution,

    /// Four character code of the output codec
    #[clap(long, default_value = "XVID")]
    pub fourcc: String,

    /// Publish a preview every N frames
    #[clap(long, default_value = "10")]
    pub preview_interval: usize,

    #[clap(long, default_value = "0")]
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            motion_threshold: 1.0,
            min_area: 50.,
            blob_size_scale: 0.5,
            max_connection_distance: 150,
            trail_opacity: 0.2,
            output_resolution: OutputResolution::MatchInput,
            fourcc: "XVID".to_string(),
            preview_interval: 10,
            seed: 0,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !(self.motion_threshold > 0.) {
            bail!("motion threshold must be > 0, got {}", self.motion_threshold);
        }
        if !(self.min_area > 0.) {
            bail!("min area must be > 0, got {}", self.min_area);
        }
        if !(self.blob_size_scale > 0.) {
            bail!("blob size scale must be > 0, got {}", self.blob_size_scale);
        }
        if self.max_connection_distance <= 0 {
            bail!(
                "max connection distance must be > 0, got {}",
                self.max_connection_distance
            );
        }
        if !(self.trail_opacity > 0. && self.trail_opacity <= 1.) {
            bail!("trail opacity must be in (0, 1], got {}", self.trail_opacity);
        }
        if self.preview_interval == 0 {
            bail!("preview interval must be > 0");
        }
        if self.fourcc.chars().count() != 4 {
            bail!("fourcc must be four characters, got `{}`", self.fourcc);
        }
        Ok(())
    }

    pub fn fourcc_chars(&self) -> [char; 4] {
        let mut out = [' '; 4];
        for (slot, c) in out.iter_mut().zip(self.fourcc.chars()) {
            *slot = c;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();

        let parsed = Config::parse_from(["motion-blobs"]);
        assert_eq!(parsed.motion_threshold, config.motion_threshold);
        assert_eq!(parsed.min_area, config.min_area);
        assert_eq!(parsed.max_connection_distance, config.max_connection_distance);
        assert_eq!(parsed.output_resolution, OutputResolution::MatchInput);
        assert_eq!(parsed.preview_interval, 10);
    }

    #[test]
    fn test_output_resolution() {
        assert_eq!(
            "1920x1080".parse::<OutputResolution>().unwrap(),
            OutputResolution::Fixed { width: 1920, height: 1080 }
        );
        assert_eq!(
            "match-input".parse::<OutputResolution>().unwrap(),
            OutputResolution::MatchInput
        );
        assert!("1920".parse::<OutputResolution>().is_err());
        assert!("0x1080".parse::<OutputResolution>().is_err());
        assert_eq!(
            OutputResolution::MatchInput.resolve((640, 480)),
            (640, 480)
        );
        assert_eq!(
            "3840x2160".parse::<OutputResolution>().unwrap().resolve((640, 480)),
            (3840, 2160)
        );
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = Config::default();
        config.trail_opacity = 0.;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.motion_threshold = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fourcc = "MP4".to_string();
        assert!(config.validate().is_err());

        let config = Config::parse_from(["motion-blobs", "--fourcc", "mp4v"]);
        assert_eq!(config.fourcc_chars(), ['m', 'p', '4', 'v']);
    }
}

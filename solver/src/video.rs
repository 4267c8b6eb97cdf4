use std::{path::Path, process::Command};

use log::{debug, info};

use crate::{Result, SolverErr};

pub const FRAME_RATE: u32 = 25;

/// The pattern frames must be named after, `00000.png`, `00001.png`...
pub const FRAME_PATTERN: &str = "%05d.png";

/// Returns the file name of the frame at `index`.
pub fn frame_name(index: usize) -> String {
    format!("{index:05}.png")
}

/// Assembles a directory of frames into a video.
pub trait VideoMuxer {
    fn mux(&self, frames_dir: &Path, out: &Path) -> Result<()>;
}

/// Muxes frames into an H.264, YUV 4:2:0 video by running `ffmpeg`.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: String,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Ffmpeg {
    /// Creates a muxer running the given executable.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl VideoMuxer for Ffmpeg {
    fn mux(&self, frames_dir: &Path, out: &Path) -> Result<()> {
        let rate = FRAME_RATE.to_string();
        let rate = rate.as_str();
        let mut cmd = Command::new(&self.program);
        cmd.arg("-y")
            .args(["-framerate", rate, "-i"])
            .arg(frames_dir.join(FRAME_PATTERN))
            .args(["-c:v", "libx264", "-r", rate, "-pix_fmt", "yuv420p"])
            .arg(out);

        debug!("running {cmd:?}");
        let status = cmd.status()?;

        if !status.success() {
            return Err(SolverErr::Subprocess {
                program: self.program.clone(),
                code: status.code(),
            });
        }

        info!("wrote video {}", out.display());
        Ok(())
    }
}

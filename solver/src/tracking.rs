use std::{
    cell::RefCell,
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    rc::Rc,
};

use log::{debug, info};
use serde::Serialize;

use crate::{Result, imaging::{self, Image}};

/// Where experiment scalars, images and weight files are reported to.
pub trait Tracker {
    /// Records a point of the scalar series `tag`.
    fn add_scalar(&mut self, tag: &str, value: f32, step: usize) -> Result<()>;

    /// Records an image, values are expected in `[0, 1]`.
    fn add_image(&mut self, tag: &str, image: &Image, step: usize) -> Result<()>;

    /// Copies a saved file into the tracked run.
    fn mirror(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTracker;

impl Tracker for NullTracker {
    fn add_scalar(&mut self, _tag: &str, _value: f32, _step: usize) -> Result<()> {
        Ok(())
    }

    fn add_image(&mut self, _tag: &str, _image: &Image, _step: usize) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct ScalarRecord<'a> {
    tag: &'a str,
    value: f32,
    step: usize,
    wall_time: String,
}

/// Tracks a run on disk: scalars go to `scalars.jsonl`, one JSON object per line, and images to
/// `tracked/<tag>_<step>.png`. Mirrored files are copied into an optional directory.
#[derive(Debug)]
pub struct FileTracker {
    dir: PathBuf,
    scalars: BufWriter<File>,
    mirror_dir: Option<PathBuf>,
}

impl FileTracker {
    /// Creates a new `FileTracker` writing under `dir`, appending to any previous record.
    pub fn new(dir: impl Into<PathBuf>, mirror_dir: Option<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        if let Some(mirror_dir) = &mirror_dir {
            fs::create_dir_all(mirror_dir)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("scalars.jsonl"))?;

        info!("tracking run at {}", dir.display());

        Ok(Self {
            dir,
            scalars: BufWriter::new(file),
            mirror_dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Tracker for FileTracker {
    fn add_scalar(&mut self, tag: &str, value: f32, step: usize) -> Result<()> {
        let record = ScalarRecord {
            tag,
            value,
            step,
            wall_time: chrono::Local::now().to_rfc3339(),
        };

        serde_json::to_writer(&mut self.scalars, &record)?;
        self.scalars.write_all(b"\n")?;
        self.scalars.flush()?;
        Ok(())
    }

    fn add_image(&mut self, tag: &str, image: &Image, step: usize) -> Result<()> {
        let name = format!("{}_{step}.png", tag.replace('/', "_"));
        imaging::save_png(image, &self.dir.join("tracked").join(name))
    }

    fn mirror(&mut self, path: &Path) -> Result<()> {
        let (Some(mirror_dir), Some(name)) = (&self.mirror_dir, path.file_name()) else {
            return Ok(());
        };

        let target = mirror_dir.join(name);
        fs::copy(path, &target)?;
        debug!("mirrored {} to {}", path.display(), target.display());
        Ok(())
    }
}

/// Everything a `MemoryTracker` received.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TrackedRecord {
    pub scalars: Vec<(String, f32, usize)>,
    pub images: Vec<(String, usize, (usize, usize, usize))>,
    pub mirrored: Vec<PathBuf>,
}

/// Keeps everything in memory. Clones share the same record, so a handle can be kept to inspect
/// what a solver reported.
#[derive(Debug, Default, Clone)]
pub struct MemoryTracker {
    record: Rc<RefCell<TrackedRecord>>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) -> TrackedRecord {
        self.record.borrow().clone()
    }

    /// Returns the values of the scalar series `tag`, in the order they were added.
    pub fn scalars(&self, tag: &str) -> Vec<(usize, f32)> {
        self.record
            .borrow()
            .scalars
            .iter()
            .filter(|(t, ..)| t == tag)
            .map(|&(_, value, step)| (step, value))
            .collect()
    }
}

impl Tracker for MemoryTracker {
    fn add_scalar(&mut self, tag: &str, value: f32, step: usize) -> Result<()> {
        self.record
            .borrow_mut()
            .scalars
            .push((tag.to_string(), value, step));
        Ok(())
    }

    fn add_image(&mut self, tag: &str, image: &Image, step: usize) -> Result<()> {
        self.record
            .borrow_mut()
            .images
            .push((tag.to_string(), step, image.dim()));
        Ok(())
    }

    fn mirror(&mut self, path: &Path) -> Result<()> {
        self.record.borrow_mut().mirrored.push(path.to_path_buf());
        Ok(())
    }
}

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context as AnyhowContext, Result};
use opencv::core::Mat;
use serde::Serialize;

use crate::object::{ObjectId, TrackedObject};
use crate::pipeline::TickObserver;

#[derive(Serialize)]
struct ObjectRecord {
    id: ObjectId,
    x: i32,
    y: i32,
    size: f64,
    area: f64,
    age: u32,
    activity: f64,
}

#[derive(Serialize)]
struct FrameRecord {
    frame: usize,
    objects: Vec<ObjectRecord>,
}

impl From<&TrackedObject> for ObjectRecord {
    fn from(object: &TrackedObject) -> Self {
        ObjectRecord {
            id: object.id,
            x: object.center.x,
            y: object.center.y,
            size: object.size,
            area: object.area,
            age: object.age,
            activity: object.activity,
        }
    }
}

/// Writes one JSON line per frame with the tracked-object table.
pub struct TrackWriter<W: Write> {
    writer: W,
}

impl TrackWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create track log: {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> TrackWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_frame(&mut self, frame_index: usize, objects: &[TrackedObject]) -> Result<()> {
        let record = FrameRecord {
            frame: frame_index,
            objects: objects.iter().map(ObjectRecord::from).collect(),
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TickObserver for TrackWriter<W> {
    fn on_tick(
        &mut self,
        frame_index: usize,
        _total_frames: Option<usize>,
        _frame: &Mat,
        objects: &[TrackedObject],
    ) -> Result<()> {
        self.write_frame(frame_index, objects)
    }

    fn finish(&mut self) -> Result<()> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::my_types::*;

    #[test]
    fn test_writes_json_lines() {
        let mut writer = TrackWriter::new(Vec::new());
        let object = TrackedObject {
            id: ObjectId(4),
            center: Vector2i::new(12, 34),
            size: 10.5,
            area: 86.,
            age: 3,
            activity: 1.5,
        };
        writer.write_frame(1, &[]).unwrap();
        writer.write_frame(2, &[object]).unwrap();

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["frame"], 1);
        assert_eq!(first["objects"].as_array().unwrap().len(), 0);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        let object = &second["objects"][0];
        assert_eq!(object["id"], 4);
        assert_eq!(object["x"], 12);
        assert_eq!(object["y"], 34);
        assert_eq!(object["size"], 10.5);
        assert_eq!(object["age"], 3);
    }
}

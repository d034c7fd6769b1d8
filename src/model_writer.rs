use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use cqdb::CQDBWriter;

use crate::dictionary::Dictionary;
use crate::error::Result;
use crate::model::{LabelModel, CHUNK_SIZE, MAGIC, MODEL_TYPE, VERSION};

/// Offsets of the sections that follow the header
#[derive(Debug, Default)]
struct Offsets {
    params: u32,
    workers: u32,
    labels: u32,
    size: u32,
}

/// Write a fitted label model to file
///
/// Layout: a 48-byte header, a `PARM` chunk of little-endian weights
/// (accuracies, then propensities), the worker dictionary and, when class
/// names are attached, the class dictionary. Both dictionaries are CQDB.
pub struct ModelWriter;

impl ModelWriter {
    /// Write model to file
    pub fn write(filename: &Path, model: &LabelModel) -> Result<()> {
        let mut file = File::create(filename)?;
        let mut offsets = Offsets::default();

        // Placeholder header, rewritten once the offsets are known
        Self::write_header(&mut file, model, &offsets)?;

        offsets.params = pos_to_u32(file.stream_position()?)?;
        Self::write_params(&mut file, model)?;

        offsets.workers = pos_to_u32(file.stream_position()?)?;
        Self::write_cqdb(&mut file, model.workers())?;

        if let Some(labels) = model.labels() {
            Self::align_to_u32(&mut file)?;
            offsets.labels = pos_to_u32(file.stream_position()?)?;
            let names: Dictionary = labels.iter().map(|(name, _)| name).collect();
            Self::write_cqdb(&mut file, &names)?;
        }

        offsets.size = pos_to_u32(file.seek(SeekFrom::End(0))?)?;
        file.seek(SeekFrom::Start(0))?;
        Self::write_header(&mut file, model, &offsets)?;
        file.flush()?;
        Ok(())
    }

    fn write_header(file: &mut File, model: &LabelModel, offsets: &Offsets) -> io::Result<()> {
        file.write_all(MAGIC)?;
        file.write_all(&offsets.size.to_le_bytes())?;
        file.write_all(MODEL_TYPE)?;
        file.write_all(&VERSION.to_le_bytes())?;
        file.write_all(&model.flags().bits().to_le_bytes())?;
        file.write_all(&(model.cardinality() as u32).to_le_bytes())?;
        file.write_all(&(model.workers().len() as u32).to_le_bytes())?;
        file.write_all(&offsets.params.to_le_bytes())?;
        file.write_all(&offsets.workers.to_le_bytes())?;
        file.write_all(&offsets.labels.to_le_bytes())?;
        file.write_all(&0u32.to_le_bytes())?;
        file.write_all(&0u32.to_le_bytes())?;
        Ok(())
    }

    fn write_params(file: &mut File, model: &LabelModel) -> io::Result<()> {
        let accuracy = model.accuracy_weights();
        let propensity = model.propensity_weights().unwrap_or(&[]);
        let count = accuracy.len() + propensity.len();

        file.write_all(b"PARM")?;
        file.write_all(&((CHUNK_SIZE + 8 * count) as u32).to_le_bytes())?;
        file.write_all(&(count as u32).to_le_bytes())?;
        for w in accuracy.iter().chain(propensity) {
            file.write_all(&w.to_le_bytes())?;
        }
        Ok(())
    }

    /// Align the file position to a 4-byte boundary with zero padding.
    fn align_to_u32(file: &mut File) -> io::Result<()> {
        let mut pos = file.stream_position()?;
        while pos % 4 != 0 {
            file.write_all(&[0])?;
            pos += 1;
        }
        Ok(())
    }

    /// Write CQDB dictionary
    fn write_cqdb(file: &mut File, dict: &Dictionary) -> io::Result<()> {
        let mut writer = CQDBWriter::new(file)?;
        for (s, id) in dict.iter() {
            writer.put(s, id)?;
        }
        // The database is flushed when the writer is dropped
        Ok(())
    }
}

fn pos_to_u32(pos: u64) -> io::Result<u32> {
    u32::try_from(pos)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "file position exceeds u32::MAX"))
}

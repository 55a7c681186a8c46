use crate::data::{FrameBatch, FrameBatcher, FrameGeometry, FrameSample};
use crate::error::{HarnessError, Result};
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::Dataset;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Supported sample file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    JsonLines,
    GzippedJsonLines,
}

impl FileFormat {
    /// Detect file format from path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str());
        let stem = path.file_stem().and_then(|s| s.to_str());

        match (ext, stem) {
            (Some("gz"), Some(stem)) if stem.ends_with(".jsonl") || stem.ends_with(".json") => {
                Ok(FileFormat::GzippedJsonLines)
            }
            (Some("jsonl"), _) | (Some("json"), _) => Ok(FileFormat::JsonLines),
            _ => Err(HarnessError::InvalidConfig(format!(
                "Unsupported sample file format: {:?}",
                path
            ))),
        }
    }

    /// Check if format is gzipped
    pub fn is_gzipped(&self) -> bool {
        matches!(self, FileFormat::GzippedJsonLines)
    }
}

/// In-memory dataset of validated samples
#[derive(Debug, Clone)]
pub struct FrameDataset {
    samples: Vec<FrameSample>,
    geometry: FrameGeometry,
}

impl FrameDataset {
    /// Wrap samples after checking each against the geometry
    pub fn from_samples(samples: Vec<FrameSample>, geometry: FrameGeometry) -> Result<Self> {
        geometry.validate()?;
        for (index, sample) in samples.iter().enumerate() {
            sample.validate(index, &geometry)?;
        }
        Ok(Self { samples, geometry })
    }

    /// Load samples from a JSON-lines file, gzipped or plain
    pub fn load<P: AsRef<Path>>(path: P, geometry: FrameGeometry) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading samples from {:?}", path);

        let format = FileFormat::from_path(path)?;
        debug!("Detected file format: {:?}", format);

        let file = File::open(path).map_err(|e| HarnessError::io(path, e))?;
        let samples = if format.is_gzipped() {
            parse_samples(BufReader::new(GzDecoder::new(file)), path)?
        } else {
            parse_samples(BufReader::new(file), path)?
        };

        info!("Loaded {} samples", samples.len());
        Self::from_samples(samples, geometry)
    }

    /// Write samples as JSON lines, compressing when the path ends in `.gz`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_samples(path, &self.samples)
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn samples(&self) -> &[FrameSample] {
        &self.samples
    }
}

impl Dataset<FrameSample> for FrameDataset {
    fn get(&self, index: usize) -> Option<FrameSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

fn parse_samples<R: Read>(reader: BufReader<R>, path: &Path) -> Result<Vec<FrameSample>> {
    let mut samples = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| HarnessError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let sample: FrameSample =
            serde_json::from_str(&line).map_err(|e| HarnessError::InvalidSample {
                index: line_no,
                reason: e.to_string(),
            })?;
        samples.push(sample);
    }
    Ok(samples)
}

/// Write samples as JSON lines
pub fn write_samples<P: AsRef<Path>>(path: P, samples: &[FrameSample]) -> Result<()> {
    let path = path.as_ref();
    let format = FileFormat::from_path(path)?;
    let file = File::create(path).map_err(|e| HarnessError::io(path, e))?;

    let written = if format.is_gzipped() {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        write_lines(&mut encoder, samples)
            .and_then(|_| encoder.finish())
            .and_then(|mut inner| inner.flush())
    } else {
        let mut writer = BufWriter::new(file);
        write_lines(&mut writer, samples).and_then(|_| writer.flush())
    };
    written.map_err(|e| HarnessError::io(path, e))
}

fn write_lines<W: Write>(writer: &mut W, samples: &[FrameSample]) -> std::io::Result<()> {
    for sample in samples {
        serde_json::to_writer(&mut *writer, sample)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Batches a loader yields per pass
///
/// With workers, burn splits the dataset into `num_workers` contiguous parts
/// (the last one takes the remainder) and batches each part on its own, so
/// every part ends with its own partial batch.
pub fn batch_count(len: usize, batch_size: usize, num_workers: usize) -> usize {
    let batch_size = batch_size.max(1);
    if num_workers == 0 {
        return len.div_ceil(batch_size);
    }
    let part = len / num_workers;
    let last = len - part * (num_workers - 1);
    part.div_ceil(batch_size) * (num_workers - 1) + last.div_ceil(batch_size)
}

/// Batched, optionally shuffled view over a [`FrameDataset`]
#[derive(Clone)]
pub struct FrameLoader<B: Backend> {
    inner: Arc<dyn DataLoader<FrameBatch<B>>>,
    batches: usize,
    device: B::Device,
}

impl<B: Backend> FrameLoader<B> {
    /// Build a loader; `shuffle` carries the seed when the order should be randomised
    pub fn new(
        dataset: FrameDataset,
        batch_size: usize,
        shuffle: Option<u64>,
        num_workers: usize,
        device: B::Device,
    ) -> Self {
        let batch_size = batch_size.max(1);
        let batches = batch_count(dataset.len(), batch_size, num_workers);
        let batcher = FrameBatcher::<B>::new(device.clone(), dataset.geometry());

        let mut builder = DataLoaderBuilder::new(batcher).batch_size(batch_size);
        if let Some(seed) = shuffle {
            builder = builder.shuffle(seed);
        }
        if num_workers > 0 {
            builder = builder.num_workers(num_workers);
        }

        Self {
            inner: builder.build(dataset),
            batches,
            device,
        }
    }

    /// Number of batches per pass
    pub fn len(&self) -> usize {
        self.batches
    }

    pub fn is_empty(&self) -> bool {
        self.batches == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = FrameBatch<B>> + '_ {
        self.inner.iter()
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }
}

/// Train loader (shuffled, autodiff backend) and test loader (in order, inner backend)
pub fn build_loaders<B: AutodiffBackend>(
    train: FrameDataset,
    test: FrameDataset,
    batch_size: usize,
    num_workers: usize,
    seed: u64,
    device: &B::Device,
) -> (FrameLoader<B>, FrameLoader<B::InnerBackend>) {
    let trainloader = FrameLoader::<B>::new(train, batch_size, Some(seed), num_workers, device.clone());
    let testloader = FrameLoader::<B::InnerBackend>::new(test, batch_size, None, 1, device.clone());
    info!(
        "Train batches: {}, test batches: {}",
        trainloader.len(),
        testloader.len()
    );
    (trainloader, testloader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{generate, StormConfig};
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_file_format_detection() {
        assert_eq!(FileFormat::from_path("a.jsonl").unwrap(), FileFormat::JsonLines);
        assert_eq!(FileFormat::from_path("a.json").unwrap(), FileFormat::JsonLines);
        assert_eq!(
            FileFormat::from_path("a.jsonl.gz").unwrap(),
            FileFormat::GzippedJsonLines
        );
        assert!(FileFormat::from_path("a.csv").is_err());
    }

    #[test]
    fn test_save_and_load_gzipped() {
        let dir = TempDir::new().unwrap();
        let g = FrameGeometry::tiny();
        let samples = generate(&g, &StormConfig::default(), 5, 7);
        let dataset = FrameDataset::from_samples(samples, g).unwrap();

        for name in ["train.jsonl", "train.jsonl.gz"] {
            let path = dir.path().join(name);
            dataset.save(&path).unwrap();
            let loaded = FrameDataset::load(&path, g).unwrap();
            assert_eq!(loaded.len(), 5);
            assert_eq!(loaded.samples(), dataset.samples());
        }
    }

    #[test]
    fn test_load_rejects_wrong_geometry() {
        let dir = TempDir::new().unwrap();
        let g = FrameGeometry::tiny();
        let path = dir.path().join("samples.jsonl");
        write_samples(&path, &generate(&g, &StormConfig::default(), 2, 1)).unwrap();

        let other = FrameGeometry { height: 16, ..g };
        assert!(matches!(
            FrameDataset::load(&path, other),
            Err(HarnessError::InvalidSample { .. })
        ));
    }

    #[test]
    fn test_loader_batch_count() {
        let g = FrameGeometry::tiny();
        let dataset = FrameDataset::from_samples(generate(&g, &StormConfig::default(), 5, 3), g).unwrap();
        let loader = FrameLoader::<TestBackend>::new(dataset, 2, None, 1, Default::default());

        assert_eq!(loader.len(), 3);
        let sizes: Vec<usize> = loader.iter().map(|b| b.batch_size()).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 5);
        assert_eq!(sizes.len(), 3);
    }

    #[test]
    fn test_loader_batch_count_with_workers() {
        let g = FrameGeometry::tiny();
        for (count, batch_size, workers) in [(10, 4, 4), (10, 4, 0), (3, 2, 4), (12, 3, 2), (7, 1, 3)] {
            let dataset = FrameDataset::from_samples(generate(&g, &StormConfig::default(), count, 3), g).unwrap();
            let loader = FrameLoader::<TestBackend>::new(dataset, batch_size, Some(5), workers, Default::default());

            let sizes: Vec<usize> = loader.iter().map(|b| b.batch_size()).collect();
            assert_eq!(sizes.iter().sum::<usize>(), count);
            assert_eq!(
                sizes.len(),
                loader.len(),
                "{} samples, batch {}, {} workers",
                count,
                batch_size,
                workers
            );
        }

        assert_eq!(batch_count(10, 4, 4), 4);
        assert_eq!(batch_count(10, 4, 1), 3);
        assert_eq!(batch_count(0, 4, 4), 0);
    }
}

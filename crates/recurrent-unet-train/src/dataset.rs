//! Generic image/label folder dataset.
//!
//! A split lives under `{path}/{split}/` with two sibling folders:
//!
//! ```text
//! {path}/{split}/images/<stem>.{png,jpg,..}
//! {path}/{split}/labels/<stem>.png        grayscale class index per pixel
//! ```
//!
//! Items hold raw host data; the [`SegmentationBatcher`] creates tensors on the
//! target device.

use std::{
    marker::PhantomData,
    path::{Path, PathBuf},
};

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
    tensor::TensorData,
};
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use recurrent_unet_model::training::SegmentationBatch;
use walkdir::WalkDir;

use crate::error::{DatasetError, DatasetResult};

/// Data section of an experiment configuration.
#[derive(Config, Debug)]
pub struct DataConfig {
    /// Dataset name, used to name checkpoints.
    #[config(default = "\"folder\".to_string()")]
    pub dataset: String,
    /// Root directory holding one folder per split.
    pub path: String,
    #[config(default = "\"train\".to_string()")]
    pub train_split: String,
    #[config(default = "\"val\".to_string()")]
    pub val_split: String,
    /// Height every image and label map is resized to.
    #[config(default = 256)]
    pub img_rows: u32,
    /// Width every image and label map is resized to.
    #[config(default = 256)]
    pub img_cols: u32,
    pub n_classes: usize,
    /// Maps label values above 127 to class 1 and the rest to class 0.
    #[config(default = false)]
    pub binarize_labels: bool,
    /// Label assigned to pixels whose value is not a valid class.
    #[config(default = 250)]
    pub ignore_index: i64,
}

impl DataConfig {
    /// # Errors
    ///
    /// Returns `DatasetError::InvalidConfiguration` for empty sizes or no classes.
    pub fn validate(&self) -> DatasetResult<()> {
        if self.img_rows == 0 || self.img_cols == 0 {
            return Err(DatasetError::InvalidConfiguration {
                reason: format!(
                    "image size must be positive, got {}x{}",
                    self.img_rows, self.img_cols
                ),
            });
        }
        if self.n_classes == 0 {
            return Err(DatasetError::InvalidConfiguration {
                reason: "n_classes must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// A single image with its label map, as raw host data.
#[derive(Debug, Clone)]
pub struct SegmentationItem {
    /// RGB values in `[0, 1]`, `[height, width, 3]` row-major.
    pub image: Vec<f32>,
    /// Class index per pixel, `[height, width]` row-major.
    pub labels: Vec<i64>,
    pub height: usize,
    pub width: usize,
}

/// Converts [`SegmentationItem`]s into a [`SegmentationBatch`].
#[derive(Clone, Default)]
pub struct SegmentationBatcher<B: Backend> {
    _phantom: PhantomData<B>,
}

impl<B: Backend> SegmentationBatcher<B> {
    pub const fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<B: Backend> Batcher<B, SegmentationItem, SegmentationBatch<B>> for SegmentationBatcher<B> {
    fn batch(&self, items: Vec<SegmentationItem>, device: &B::Device) -> SegmentationBatch<B> {
        let mut images = Vec::with_capacity(items.len());
        let mut labels = Vec::with_capacity(items.len());

        for item in items {
            let image = Tensor::<B, 3>::from_data(
                TensorData::new(item.image, [item.height, item.width, 3]),
                device,
            )
            .permute([2, 0, 1]);
            let label = Tensor::<B, 2, Int>::from_data(
                TensorData::new(item.labels, [item.height, item.width]),
                device,
            );

            images.push(image);
            labels.push(label);
        }

        SegmentationBatch::new(Tensor::stack(images, 0), Tensor::stack(labels, 0))
    }
}

/// Image/label pairs of one split, loaded lazily.
pub struct SegmentationDataset {
    items: Vec<(PathBuf, PathBuf)>,
    size: (u32, u32),
    n_classes: usize,
    binarize_labels: bool,
    ignore_index: i64,
}

impl SegmentationDataset {
    /// Discovers the image/label pairs of `split`.
    ///
    /// Images without a matching label file, and pairs whose headers cannot
    /// be decoded, are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Fails when a split folder is missing, cannot be read, or holds no
    /// pairs.
    pub fn new(config: &DataConfig, split: &str) -> DatasetResult<Self> {
        config.validate()?;
        let split_root = Path::new(&config.path).join(split);
        let items = collect_pairs(&split_root)?;

        tracing::info!(
            pairs = items.len(),
            split,
            root = %split_root.display(),
            "loaded dataset split"
        );

        Ok(Self {
            items,
            size: (config.img_cols, config.img_rows),
            n_classes: config.n_classes,
            binarize_labels: config.binarize_labels,
            ignore_index: config.ignore_index,
        })
    }

    /// Paths of the discovered `(image, label)` pairs, sorted by image path.
    pub fn pairs(&self) -> &[(PathBuf, PathBuf)] {
        &self.items
    }

    fn load(&self, index: usize) -> DatasetResult<Option<SegmentationItem>> {
        let Some((image_path, label_path)) = self.items.get(index) else {
            return Ok(None);
        };
        let (width, height) = self.size;

        let image = open(image_path)?.resize_exact(width, height, FilterType::Triangle);
        let labels = open(label_path)?.resize_exact(width, height, FilterType::Nearest);

        Ok(Some(SegmentationItem {
            image: image.to_rgb32f().into_raw(),
            labels: self.encode_labels(&labels),
            height: height as usize,
            width: width as usize,
        }))
    }

    fn encode_labels(&self, labels: &DynamicImage) -> Vec<i64> {
        encode_labels(
            labels.to_luma8().as_raw(),
            self.n_classes,
            self.binarize_labels,
            self.ignore_index,
        )
    }
}

impl Dataset<SegmentationItem> for SegmentationDataset {
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        match self.load(index) {
            Ok(item) => item,
            Err(err) => {
                tracing::error!(index, error = %err, "failed to load dataset item");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Maps raw grayscale label values to class indices.
///
/// With `binarize` every value above 127 becomes class 1 and the rest class 0.
/// Otherwise values outside `0..n_classes` become `ignore_index`.
pub fn encode_labels(raw: &[u8], n_classes: usize, binarize: bool, ignore_index: i64) -> Vec<i64> {
    raw.iter()
        .map(|&value| {
            if binarize {
                i64::from(value > 127)
            } else if usize::from(value) < n_classes {
                i64::from(value)
            } else {
                ignore_index
            }
        })
        .collect()
}

fn open(path: &Path) -> DatasetResult<DynamicImage> {
    image::open(path).map_err(|source| DatasetError::ImageOpenFailed {
        path: path.to_path_buf(),
        source,
    })
}

fn is_readable_image(path: &Path) -> bool {
    ImageFormat::from_path(path)
        .map(|format| format.reading_enabled())
        .unwrap_or(false)
}

fn collect_pairs(split_root: &Path) -> DatasetResult<Vec<(PathBuf, PathBuf)>> {
    let image_root = split_root.join("images");
    let label_root = split_root.join("labels");
    if !image_root.is_dir() {
        return Err(DatasetError::ImageDirectoryNotFound { path: image_root });
    }
    if !label_root.is_dir() {
        return Err(DatasetError::LabelDirectoryNotFound { path: label_root });
    }

    let mut items = Vec::new();
    for entry in WalkDir::new(&image_root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|source| DatasetError::DirectoryReadFailed {
            path: image_root.clone(),
            source,
        })?;
        let image_path = entry.path();
        if !entry.file_type().is_file() || !is_readable_image(image_path) {
            continue;
        }

        let stem = image_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| DatasetError::InvalidFileStem {
                path: image_path.to_path_buf(),
            })?;
        let label_path = label_root.join(format!("{stem}.png"));
        if !label_path.is_file() {
            tracing::warn!(image = %image_path.display(), "no label found for image");
            continue;
        }
        // A decode failure inside `get` would end the epoch early.
        if let Err(err) = image::image_dimensions(image_path)
            .and_then(|_| image::image_dimensions(&label_path))
        {
            tracing::warn!(
                image = %image_path.display(),
                error = %err,
                "skipping pair that cannot be decoded"
            );
            continue;
        }
        items.push((image_path.to_path_buf(), label_path));
    }

    if items.is_empty() {
        return Err(DatasetError::NoValidPairs { path: image_root });
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use image::{GrayImage, Luma, Rgb, RgbImage};

    use super::*;
    use crate::tests::TestBackend;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir()
                .join(format!("recurrent-unet-{name}-{}", std::process::id()));
            let _ = fs::remove_dir_all(&path);
            fs::create_dir_all(&path).expect("Failed to create temp dir");
            Self(path)
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    fn write_pair(root: &Path, split: &str, stem: &str, label_value: u8) {
        let images = root.join(split).join("images");
        let labels = root.join(split).join("labels");
        fs::create_dir_all(&images).expect("Failed to create image dir");
        fs::create_dir_all(&labels).expect("Failed to create label dir");

        RgbImage::from_pixel(8, 6, Rgb([255, 0, 0]))
            .save(images.join(format!("{stem}.png")))
            .expect("Failed to write image");
        GrayImage::from_pixel(8, 6, Luma([label_value]))
            .save(labels.join(format!("{stem}.png")))
            .expect("Failed to write label");
    }

    fn config(root: &Path) -> DataConfig {
        DataConfig::new(root.to_string_lossy().into_owned(), 2)
            .with_img_rows(4)
            .with_img_cols(4)
    }

    #[test]
    fn batcher_creates_correct_batch_dimensions() {
        let device = Default::default();
        let batcher = SegmentationBatcher::<TestBackend>::new();
        let item = |value: f32, label: i64| SegmentationItem {
            image: vec![value; 5 * 7 * 3],
            labels: vec![label; 5 * 7],
            height: 5,
            width: 7,
        };

        let batch = batcher.batch(vec![item(0.5, 0), item(0.3, 1)], &device);

        assert_eq!(batch.images.dims(), [2, 3, 5, 7]);
        assert_eq!(batch.labels.dims(), [2, 5, 7]);
        assert_eq!(batch.labels.sum().into_scalar(), 35);
    }

    #[test]
    fn label_encoding_marks_invalid_classes() {
        assert_eq!(encode_labels(&[0, 1, 2, 255], 3, false, 250), vec![0, 1, 2, 250]);
        assert_eq!(encode_labels(&[0, 127, 128, 255], 2, true, 250), vec![0, 0, 1, 1]);
    }

    #[test]
    fn folder_dataset_pairs_and_resizes() {
        let dir = TempDir::new("pairs");
        write_pair(&dir.0, "train", "a", 1);
        write_pair(&dir.0, "train", "b", 0);
        // An image without a label is skipped.
        RgbImage::new(2, 2)
            .save(dir.0.join("train/images/orphan.png"))
            .expect("Failed to write image");

        let dataset = SegmentationDataset::new(&config(&dir.0), "train")
            .expect("dataset should load");
        assert_eq!(dataset.len(), 2);

        let item = dataset.get(0).expect("first item should load");
        assert_eq!((item.height, item.width), (4, 4));
        assert_eq!(item.image.len(), 4 * 4 * 3);
        assert_eq!(&item.image[..3], &[1.0, 0.0, 0.0]);
        assert!(item.labels.iter().all(|&l| l == 1));
        assert!(dataset.get(2).is_none());
    }

    #[test]
    fn undecodable_pairs_are_skipped() {
        let dir = TempDir::new("undecodable");
        write_pair(&dir.0, "train", "a", 1);
        write_pair(&dir.0, "train", "b", 0);
        fs::write(dir.0.join("train/images/b.png"), b"not a png").expect("Failed to write file");

        let dataset = SegmentationDataset::new(&config(&dir.0), "train")
            .expect("dataset should load");

        assert_eq!(dataset.len(), 1);
        assert!(dataset.pairs()[0].0.ends_with("a.png"));
        assert!(dataset.get(0).is_some());
    }

    #[test]
    fn missing_split_folders_are_reported() {
        let dir = TempDir::new("missing");

        let err = SegmentationDataset::new(&config(&dir.0), "val")
            .err()
            .expect("missing split should fail");

        assert!(matches!(err, DatasetError::ImageDirectoryNotFound { .. }));
    }

    #[test]
    fn split_without_pairs_is_rejected() {
        let dir = TempDir::new("empty");
        fs::create_dir_all(dir.0.join("train/images")).expect("Failed to create dir");
        fs::create_dir_all(dir.0.join("train/labels")).expect("Failed to create dir");

        let err = SegmentationDataset::new(&config(&dir.0), "train")
            .err()
            .expect("empty split should fail");

        assert!(matches!(err, DatasetError::NoValidPairs { .. }));
    }

    #[test]
    fn zero_sized_images_are_rejected() {
        let config = DataConfig::new("data".to_string(), 2).with_img_rows(0);
        assert!(matches!(
            config.validate(),
            Err(DatasetError::InvalidConfiguration { .. })
        ));
    }
}

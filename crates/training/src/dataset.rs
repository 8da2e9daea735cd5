use crate::error::{HarnessError, HarnessResult};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// One image with its binary segmentation mask.
#[derive(Debug, Clone, PartialEq)]
pub struct SegItem {
    /// CHW layout, normalized to [0, 1].
    pub image: Vec<f32>,
    /// HW layout, 1.0 for foreground and 0.0 for background.
    pub mask: Vec<f32>,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl SegItem {
    pub fn new(
        image: Vec<f32>,
        mask: Vec<f32>,
        channels: usize,
        height: usize,
        width: usize,
    ) -> HarnessResult<Self> {
        if image.len() != channels * height * width {
            return Err(HarnessError::Dataset(format!(
                "image buffer has {} values, expected {channels}x{height}x{width}",
                image.len()
            )));
        }
        if mask.len() != height * width {
            return Err(HarnessError::Dataset(format!(
                "mask buffer has {} values, expected {height}x{width}",
                mask.len()
            )));
        }
        Ok(Self {
            image,
            mask,
            channels,
            height,
            width,
        })
    }

    fn dims(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }
}

/// Random-access source of samples.
pub trait SegmentationDataset {
    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Option<SegItem>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    items: Vec<SegItem>,
}

impl InMemoryDataset {
    pub fn new(items: Vec<SegItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[SegItem] {
        &self.items
    }
}

impl SegmentationDataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn get(&self, index: usize) -> Option<SegItem> {
        self.items.get(index).cloned()
    }
}

/// Folder of `<images_subdir>/<name>.png` files paired with `<masks_subdir>/<name>.png`.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetPathConfig {
    pub root: PathBuf,
    pub images_subdir: String,
    pub masks_subdir: String,
}

impl DatasetPathConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            images_subdir: "images".into(),
            masks_subdir: "masks".into(),
        }
    }

    /// Load every pair, sorted by file name so the order is reproducible.
    pub fn load(&self) -> HarnessResult<InMemoryDataset> {
        let images_dir = self.root.join(&self.images_subdir);
        let masks_dir = self.root.join(&self.masks_subdir);
        let mut names = Vec::new();
        for entry in fs::read_dir(&images_dir).map_err(|e| HarnessError::io(&images_dir, e))? {
            let entry = entry.map_err(|e| HarnessError::io(&images_dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("png") {
                continue;
            }
            if let Some(name) = path.file_name() {
                names.push(name.to_os_string());
            }
        }
        names.sort();

        let mut items = Vec::with_capacity(names.len());
        for name in names {
            let image_path = images_dir.join(&name);
            let mask_path = masks_dir.join(&name);
            if !mask_path.exists() {
                return Err(HarnessError::Dataset(format!(
                    "mask missing for {}: expected {}",
                    image_path.display(),
                    mask_path.display()
                )));
            }
            items.push(load_pair(&image_path, &mask_path)?);
        }
        log::info!("loaded {} samples from {}", items.len(), self.root.display());
        Ok(InMemoryDataset::new(items))
    }
}

fn load_pair(image_path: &Path, mask_path: &Path) -> HarnessResult<SegItem> {
    let rgb = image::open(image_path)
        .map_err(|source| HarnessError::Image {
            path: image_path.to_path_buf(),
            source,
        })?
        .to_rgb8();
    let luma = image::open(mask_path)
        .map_err(|source| HarnessError::Image {
            path: mask_path.to_path_buf(),
            source,
        })?
        .to_luma8();
    let (width, height) = rgb.dimensions();
    if luma.dimensions() != (width, height) {
        let (mw, mh) = luma.dimensions();
        return Err(HarnessError::Dataset(format!(
            "{} is {mw}x{mh} but its image is {width}x{height}",
            mask_path.display()
        )));
    }

    let mut image = Vec::with_capacity(3 * (width * height) as usize);
    for c in 0..3 {
        for y in 0..height {
            for x in 0..width {
                image.push(rgb.get_pixel(x, y)[c] as f32 / 255.0);
            }
        }
    }
    let mask = luma
        .as_raw()
        .iter()
        .map(|v| if *v > 127 { 1.0 } else { 0.0 })
        .collect();
    SegItem::new(image, mask, 3, height as usize, width as usize)
}

/// Images `[N, C, H, W]` and masks `[N, 1, H, W]` for one step.
#[derive(Debug, Clone)]
pub struct SegBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub masks: Tensor<B, 4>,
}

impl<B: Backend> SegBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn collate<B: Backend>(items: &[SegItem], device: &B::Device) -> HarnessResult<SegBatch<B>> {
    let first = items
        .first()
        .ok_or_else(|| HarnessError::Dataset("cannot collate empty batch".into()))?;
    let (channels, height, width) = first.dims();
    let batch = items.len();

    let mut image_buf = Vec::with_capacity(batch * channels * height * width);
    let mut mask_buf = Vec::with_capacity(batch * height * width);
    for item in items {
        if item.dims() != (channels, height, width) {
            let (c, h, w) = item.dims();
            return Err(HarnessError::Dataset(format!(
                "sample dimensions differ within batch: {c}x{h}x{w}, expected \
                 {channels}x{height}x{width}"
            )));
        }
        image_buf.extend_from_slice(&item.image);
        mask_buf.extend_from_slice(&item.mask);
    }

    let images = Tensor::<B, 4>::from_data(
        TensorData::new(image_buf, [batch, channels, height, width]),
        device,
    );
    let masks =
        Tensor::<B, 4>::from_data(TensorData::new(mask_buf, [batch, 1, height, width]), device);
    Ok(SegBatch { images, masks })
}

/// Produces one pass of batches per call to [`BatchLoader::epoch`].
#[derive(Debug)]
pub struct BatchLoader {
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl BatchLoader {
    pub fn new(batch_size: usize, shuffle: bool, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self {
            batch_size: batch_size.max(1),
            shuffle,
            rng,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Start a new pass; the order is reshuffled on every call when shuffling is on.
    pub fn epoch<'a, D: SegmentationDataset>(&mut self, dataset: &'a D) -> Batches<'a, D> {
        let mut order: Vec<usize> = (0..dataset.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        Batches {
            dataset,
            order,
            cursor: 0,
            batch_size: self.batch_size,
        }
    }
}

pub struct Batches<'a, D> {
    dataset: &'a D,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
}

impl<D: SegmentationDataset> Batches<'_, D> {
    /// Number of batches in this pass, counting a trailing partial batch.
    pub fn len(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn indices(&self) -> &[usize] {
        &self.order
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> HarnessResult<Option<SegBatch<B>>> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let mut items = Vec::with_capacity(end - self.cursor);
        for &index in &self.order[self.cursor..end] {
            let item = self.dataset.get(index).ok_or_else(|| {
                HarnessError::Dataset(format!("dataset has no sample at index {index}"))
            })?;
            items.push(item);
        }
        self.cursor = end;
        collate(&items, device).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn dataset(n: usize) -> InMemoryDataset {
        let items = (0..n)
            .map(|i| SegItem::new(vec![i as f32; 3 * 2 * 2], vec![0.0; 4], 3, 2, 2).unwrap())
            .collect();
        InMemoryDataset::new(items)
    }

    #[test]
    fn keeps_trailing_partial_batch() {
        let data = dataset(10);
        let mut loader = BatchLoader::new(4, false, None);
        let mut batches = loader.epoch(&data);
        assert_eq!(batches.len(), 3);
        let device = Default::default();
        let mut sizes = Vec::new();
        while let Some(batch) = batches.next_batch::<B>(&device).unwrap() {
            assert_eq!(batch.masks.dims()[1..], [1, 2, 2]);
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn unshuffled_order_is_sequential() {
        let data = dataset(5);
        let mut loader = BatchLoader::new(2, false, None);
        assert_eq!(loader.epoch(&data).indices(), &[0, 1, 2, 3, 4]);
        assert_eq!(loader.epoch(&data).indices(), &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn shuffle_is_a_permutation_and_seeded() {
        let data = dataset(32);
        let mut a = BatchLoader::new(4, true, Some(7));
        let mut b = BatchLoader::new(4, true, Some(7));
        let first = a.epoch(&data).indices().to_vec();
        assert_eq!(first, b.epoch(&data).indices());
        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..32).collect::<Vec<_>>());
        // A fresh shuffle per epoch.
        assert_ne!(first, a.epoch(&data).indices());
    }

    #[test]
    fn collate_rejects_mixed_dims() {
        let items = vec![
            SegItem::new(vec![0.0; 12], vec![0.0; 4], 3, 2, 2).unwrap(),
            SegItem::new(vec![0.0; 27], vec![0.0; 9], 3, 3, 3).unwrap(),
        ];
        let device = Default::default();
        assert!(matches!(
            collate::<B>(&items, &device),
            Err(HarnessError::Dataset(_))
        ));
        assert!(collate::<B>(&[], &device).is_err());
    }

    #[test]
    fn item_validates_buffer_lengths() {
        assert!(SegItem::new(vec![0.0; 11], vec![0.0; 4], 3, 2, 2).is_err());
        assert!(SegItem::new(vec![0.0; 12], vec![0.0; 3], 3, 2, 2).is_err());
    }
}

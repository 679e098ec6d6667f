#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::{Array2, ArrayView4, Axis};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use xai_backend::config::AppConfig;
use xai_backend::context::AppContext;
use xai_backend::model::{Oracle, OracleError};
use xai_backend::storage::{ImageStore, MemoryStore};

/// Three classes scored from mean brightness: bright, dark, constant.
#[derive(Default)]
pub struct BrightnessOracle {
    calls: AtomicUsize,
}

impl BrightnessOracle {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Oracle for BrightnessOracle {
    fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = batch.shape()[0];
        let mut out = Array2::zeros((n, 3));
        for i in 0..n {
            let b = batch.index_axis(Axis(0), i).mean().unwrap_or(0.0) / 255.0;
            out[[i, 0]] = 0.8 * b;
            out[[i, 1]] = 0.8 * (1.0 - b);
            out[[i, 2]] = 0.2;
        }
        Ok(out)
    }

    fn num_classes(&self) -> usize {
        3
    }
}

pub enum Breakage {
    Error,
    Panic,
}

/// Answers the startup check, then breaks on every later call.
pub struct BrokenOracle {
    breakage: Breakage,
    calls: AtomicUsize,
}

impl BrokenOracle {
    pub fn new(breakage: Breakage) -> Self {
        Self {
            breakage,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Oracle for BrokenOracle {
    fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>, OracleError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(Array2::zeros((batch.shape()[0], 3)));
        }
        match self.breakage {
            Breakage::Error => Err(OracleError::Inference("device lost".to_string())),
            Breakage::Panic => panic!("model exploded"),
        }
    }

    fn num_classes(&self) -> usize {
        3
    }
}

pub fn context(
    config: AppConfig,
    oracle: Arc<dyn Oracle>,
    store: Arc<dyn ImageStore>,
) -> AppContext {
    AppContext::new(config, oracle, store).expect("context")
}

pub fn memory_context(oracle: Arc<dyn Oracle>) -> (AppContext, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(AppConfig::default(), oracle, store.clone());
    (ctx, store)
}

pub fn gradient(size: u32) -> RgbImage {
    RgbImage::from_fn(size, size, |x, y| Rgb([(x * 255 / size) as u8, (y * 255 / size) as u8, 96]))
}

pub fn png_bytes(img: &RgbImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img.clone())
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode png");
    buf.into_inner()
}

/// Answers the startup check, then returns no rows at all.
#[derive(Default)]
pub struct EmptyOutputOracle {
    calls: AtomicUsize,
}

impl Oracle for EmptyOutputOracle {
    fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>, OracleError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(Array2::zeros((batch.shape()[0], 3)));
        }
        Ok(Array2::zeros((0, 3)))
    }

    fn num_classes(&self) -> usize {
        3
    }
}
